//! Namespaced keys for every persisted portal record.

use portal_core::model::{CourseId, UserId};

pub const PREFIX: &str = "portal.";

pub const USERS: &str = "portal.users";
pub const SESSION: &str = "portal.session";
pub const COURSES: &str = "portal.courses";
pub const BANNERS: &str = "portal.banners";
pub const ORDERS: &str = "portal.orders";
pub const SETTINGS: &str = "portal.settings";

pub const EXAM_PROGRESS: &str = "portal.exam_progress";
pub const EXAM_RESULTS: &str = "portal.exam_results";
pub const VIDEO_PROGRESS: &str = "portal.video_progress";
pub const TEMP_ACCESS: &str = "portal.temp_access";
pub const PENDING_VERIFICATION: &str = "portal.pending_verification";

/// In-flight exam attempt for one learner and course.
#[must_use]
pub fn exam_progress(user: UserId, course: CourseId) -> String {
    format!("{EXAM_PROGRESS}.{user}.{course}")
}

/// Prefix covering every saved attempt of one learner.
#[must_use]
pub fn exam_progress_prefix(user: UserId) -> String {
    format!("{EXAM_PROGRESS}.{user}.")
}

#[must_use]
pub fn exam_results(user: UserId) -> String {
    format!("{EXAM_RESULTS}.{user}")
}

#[must_use]
pub fn video_progress(user: UserId) -> String {
    format!("{VIDEO_PROGRESS}.{user}")
}

#[must_use]
pub fn temp_access(user: UserId) -> String {
    format!("{TEMP_ACCESS}.{user}")
}

#[must_use]
pub fn pending_verification(user: UserId) -> String {
    format!("{PENDING_VERIFICATION}.{user}")
}

/// Prefix covering one per-user namespace, e.g. `portal.exam_results.`.
#[must_use]
pub fn namespace_prefix(root: &str) -> String {
    format!("{root}.")
}

/// Recover the user from a key such as `portal.video_progress.7`.
#[must_use]
pub fn parse_user_key(root: &str, key: &str) -> Option<UserId> {
    key.strip_prefix(root)?.strip_prefix('.')?.parse().ok()
}

/// Recover user and course from `portal.exam_progress.<user>.<course>`.
#[must_use]
pub fn parse_exam_progress_key(key: &str) -> Option<(UserId, CourseId)> {
    let rest = key.strip_prefix(EXAM_PROGRESS)?.strip_prefix('.')?;
    let (user, course) = rest.split_once('.')?;
    Some((user.parse().ok()?, course.parse().ok()?))
}

/// Every per-user key, used when an account is deleted.
#[must_use]
pub fn user_scoped(user: UserId) -> Vec<String> {
    vec![
        exam_results(user),
        video_progress(user),
        temp_access(user),
        pending_verification(user),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_user_keys_do_not_collide() {
        let a = exam_progress(UserId::new(1), CourseId::new(12));
        let b = exam_progress(UserId::new(11), CourseId::new(2));
        assert_ne!(a, b);
        assert_eq!(a, "portal.exam_progress.1.12");
        assert!(a.starts_with(&exam_progress_prefix(UserId::new(1))));
        assert!(!b.starts_with(&exam_progress_prefix(UserId::new(1))));
    }

    #[test]
    fn keys_parse_back() {
        let key = exam_progress(UserId::new(4), CourseId::new(9));
        assert_eq!(
            parse_exam_progress_key(&key),
            Some((UserId::new(4), CourseId::new(9)))
        );
        assert_eq!(
            parse_user_key(VIDEO_PROGRESS, &video_progress(UserId::new(3))),
            Some(UserId::new(3))
        );
        assert_eq!(parse_user_key(VIDEO_PROGRESS, "portal.video_progress.x"), None);
        assert_eq!(parse_exam_progress_key("portal.exam_progress.1"), None);
    }
}
