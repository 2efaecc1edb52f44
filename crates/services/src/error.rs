//! Shared error types for the services crate.

use thiserror::Error;

use portal_core::ai::QuizParseError;
use portal_core::exam::{ExamError, QuestionError};
use portal_core::model::{
    BannerId, ChapterId, CourseError, CourseId, LectureId, OrderId, SettingsError, SubjectId,
    UserError, UserId,
};
use portal_core::video::VideoSourceError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `AuthService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    #[error("an account with this email already exists")]
    DuplicateEmail,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("you need to log in first")]
    NotLoggedIn,
    #[error("administrator access required")]
    Forbidden,
    #[error(transparent)]
    User(#[from] UserError),
}

/// Errors emitted by `CatalogService`.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error("subject {0} not found")]
    SubjectNotFound(SubjectId),
    #[error("chapter {0} not found")]
    ChapterNotFound(ChapterId),
    #[error("lecture {0} not found")]
    LectureNotFound(LectureId),
}

/// Errors emitted by `AccessService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AccessError {
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error("access key is not valid for this course")]
    InvalidKey,
    #[error("course cannot be unlocked with a key")]
    KeyNotAccepted,
    #[error("course is not for sale")]
    NotPurchasable,
    #[error("course is already unlocked")]
    AlreadyOwned,
    #[error("course is not sponsored")]
    NotSponsored,
    #[error("no sponsor link is configured")]
    NoSponsorLink,
    #[error("no sponsor verification is pending")]
    NoPendingVerification,
    #[error("verification needs {remaining_secs} more seconds")]
    VerificationTooEarly { remaining_secs: i64 },
    #[error("verification expired, please visit the sponsor link again")]
    VerificationExpired,
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Errors emitted by `AdminService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AdminError {
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error("subject {0} not found")]
    SubjectNotFound(SubjectId),
    #[error("chapter {0} not found")]
    ChapterNotFound(ChapterId),
    #[error("lecture {0} not found")]
    LectureNotFound(LectureId),
    #[error("user {0} not found")]
    UserNotFound(UserId),
    #[error("banner {0} not found")]
    BannerNotFound(BannerId),
    #[error("order {0} not found")]
    OrderNotFound(OrderId),
    #[error("administrators cannot delete their own account")]
    CannotDeleteSelf,
    #[error("the last administrator cannot be demoted")]
    LastAdmin,
    #[error("banner {0} cannot be empty")]
    InvalidBanner(&'static str),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Course(#[from] CourseError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    User(#[from] UserError),
    #[error(transparent)]
    VideoSource(#[from] VideoSourceError),
}

/// Errors emitted by `PlaybackService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PlaybackError {
    #[error("course {0} is locked")]
    Locked(CourseId),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    VideoSource(#[from] VideoSourceError),
}

/// Errors emitted by the AI client and assistants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AiError {
    #[error("AI assistant is not configured")]
    Disabled,
    #[error("message cannot be empty")]
    EmptyPrompt,
    #[error("AI service returned an empty response")]
    EmptyResponse,
    #[error("AI request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("AI response could not be used: {0}")]
    MalformedPayload(#[from] QuizParseError),
}

/// Errors emitted by `ExamService` and `ExamController`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExamServiceError {
    #[error("course has no question bank")]
    NoQuestionBank,
    #[error("course {0} is locked")]
    Locked(CourseId),
    #[error(transparent)]
    Exam(#[from] ExamError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Errors raised while reading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{var} must be a positive number, got `{raw}`")]
    InvalidNumber { var: &'static str, raw: String },
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Course(#[from] CourseError),
    #[error(transparent)]
    Question(#[from] QuestionError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
