use thiserror::Error;

use crate::ai::QuizParseError;
use crate::exam::{ExamError, QuestionError};
use crate::model::{CourseError, SettingsError, UserError};
use crate::video::VideoSourceError;

/// Umbrella error for callers that do not care which domain check failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Course(#[from] CourseError),
    #[error(transparent)]
    User(#[from] UserError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Question(#[from] QuestionError),
    #[error(transparent)]
    Exam(#[from] ExamError),
    #[error(transparent)]
    QuizParse(#[from] QuizParseError),
    #[error(transparent)]
    VideoSource(#[from] VideoSourceError),
}
