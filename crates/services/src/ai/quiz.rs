use std::sync::Arc;

use tracing::{info, warn};

use portal_core::ai::{Difficulty, build_quiz_prompt, parse_questions};
use portal_core::exam::Question;
use portal_core::model::{Course, LectureId};

use super::client::{ChatMessage, GenerationRequest, TextGenerator};
use crate::error::AiError;

const QUIZ_SYSTEM_PROMPT: &str =
    "You write exam questions for an online course. Reply with JSON only.";
const QUIZ_TEMPERATURE: f32 = 0.4;

/// Generates multiple-choice question sets through a `TextGenerator`.
#[derive(Clone)]
pub struct QuizGenerator {
    generator: Arc<dyn TextGenerator>,
    question_count: usize,
}

impl QuizGenerator {
    #[must_use]
    pub fn new(generator: Arc<dyn TextGenerator>, question_count: usize) -> Self {
        Self {
            generator,
            question_count: question_count.max(1),
        }
    }

    #[must_use]
    pub fn question_count(&self) -> usize {
        self.question_count
    }

    /// # Errors
    ///
    /// Returns `AiError::MalformedPayload` when the reply holds no usable
    /// question set, or the generator's own error.
    pub async fn generate(
        &self,
        topic: &str,
        difficulty: Difficulty,
    ) -> Result<Vec<Question>, AiError> {
        let request = GenerationRequest {
            messages: vec![
                ChatMessage::system(QUIZ_SYSTEM_PROMPT),
                ChatMessage::user(build_quiz_prompt(topic, self.question_count, difficulty)),
            ],
            temperature: QUIZ_TEMPERATURE,
        };
        let text = self.generator.generate(&request).await?;
        let questions = parse_questions(&text).inspect_err(|err| {
            warn!(error = %err, "AI returned an unusable question set");
        })?;
        info!(count = questions.len(), difficulty = difficulty.as_str(), "quiz generated");
        Ok(questions)
    }
}

/// Topic line for a course quiz, narrowed to one lecture when given.
#[must_use]
pub fn topic_for_course(course: &Course, lecture: Option<LectureId>) -> String {
    if let Some(path) = lecture.and_then(|id| course.find_lecture(id)) {
        return format!(
            "{} ({} / {}) in the course \"{}\"",
            path.lecture.title, path.subject.title, path.chapter.title, course.title
        );
    }
    let subjects: Vec<&str> = course.subjects.iter().map(|s| s.title.as_str()).collect();
    let mut topic = course.title.clone();
    if !subjects.is_empty() {
        topic.push_str(" covering ");
        topic.push_str(&subjects.join(", "));
    }
    let description = course.description.trim();
    if !description.is_empty() {
        topic.push_str(". ");
        topic.push_str(description);
    }
    topic
}
