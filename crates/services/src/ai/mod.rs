//! Hosted text generation: the HTTP client seam and quiz generation.

pub mod client;
pub mod quiz;

pub use client::{
    ChatMessage, ChatRole, GenerationRequest, ImageAttachment, OpenAiCompatibleClient, SseDecoder,
    SseEvent, TextGenerator,
};
pub use quiz::{QuizGenerator, topic_for_course};
