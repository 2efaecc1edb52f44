mod banner;
mod course;
mod ids;
mod order;
mod progress;
mod settings;
mod user;

pub use banner::Banner;
pub use course::{
    Chapter, Course, CourseAccess, CourseDraft, CourseError, Lecture, LecturePath, Subject,
};
pub use ids::{
    BannerId, ChapterId, CourseId, LectureId, OrderId, ParseIdError, QuestionId, SubjectId,
    UserId,
};
pub use order::{Order, OrderStatus};
pub use progress::{COMPLETION_RATIO, PendingVerification, TempAccess, VideoProgress};
pub use settings::{DEFAULT_TEMP_ACCESS_HOURS, PortalSettings, PortalSettingsDraft, SettingsError};
pub use user::{MIN_PASSWORD_LEN, PasswordHash, Role, User, UserDraft, UserError, normalize_email};
