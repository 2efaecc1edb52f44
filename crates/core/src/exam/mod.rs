//! Timed multiple-choice exams: questions, answer state, scoring and the
//! attempt lifecycle.

mod progress;
mod question;
mod session;

use thiserror::Error;

pub use progress::{AnswerSheet, ExamProgress, ExamResult, UNANSWERED, score};
pub use question::{OPTION_COUNT, Question, QuestionError, option_label, parse_option_label};
pub use session::{
    DEFAULT_PRESET_DURATION_SECS, ExamKind, ExamOutcome, ExamPhase, ExamSession, FinishReason,
    GenerationOutcome, GenerationTicket, ResumeOffer, ReviewRow, SECONDS_PER_QUESTION, TickEvent,
    TakingView, default_duration_secs,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExamError {
    #[error("cannot {action} while {phase}")]
    InvalidTransition {
        action: &'static str,
        phase: ExamPhase,
    },

    #[error("exam has no questions")]
    EmptyQuestionSet,

    #[error("question index {index} out of range ({len} questions)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("option {0} does not exist")]
    InvalidOption(u8),

    #[error("{answers} answers recorded for {questions} questions")]
    AnswerCountMismatch { questions: usize, answers: usize },

    #[error("question generation failed: {0}")]
    GenerationFailed(String),
}
