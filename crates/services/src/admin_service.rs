use std::sync::Arc;

use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::info;

use portal_core::exam::Question;
use portal_core::model::{
    Banner, BannerId, Chapter, ChapterId, Course, CourseDraft, CourseError, CourseId, Lecture,
    LectureId, Order, OrderId, OrderStatus, PortalSettings, PortalSettingsDraft, Role, Subject,
    SubjectId, User, UserId,
};
use portal_core::video::VideoSource;

use crate::Clock;
use crate::auth_service::AuthService;
use crate::error::AdminError;
use crate::store::{Namespace, PortalStore};

const TEMP_PASSWORD_LEN: usize = 10;

/// Form input for a lecture.
#[derive(Debug, Clone, Default)]
pub struct LectureDraft {
    pub title: String,
    pub video_url: String,
    pub duration_secs: Option<u32>,
    pub notes: Option<String>,
}

/// Form input for a banner.
#[derive(Debug, Clone, Default)]
pub struct BannerDraft {
    pub title: String,
    pub image_url: String,
    pub link_url: Option<String>,
    pub active: bool,
    pub position: u32,
}

impl BannerDraft {
    fn validate(self, id: BannerId) -> Result<Banner, AdminError> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(AdminError::InvalidBanner("title"));
        }
        let image_url = self.image_url.trim().to_string();
        if image_url.is_empty() {
            return Err(AdminError::InvalidBanner("image url"));
        }
        Ok(Banner {
            id,
            title,
            image_url,
            link_url: self
                .link_url
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
            active: self.active,
            position: self.position,
        })
    }
}

/// Administrator CRUD over courses, users, banners, settings and orders.
///
/// Every operation checks the admin role of the logged-in user first.
#[derive(Clone)]
pub struct AdminService {
    clock: Clock,
    store: Arc<PortalStore>,
    auth: AuthService,
}

impl AdminService {
    #[must_use]
    pub fn new(clock: Clock, store: Arc<PortalStore>, auth: AuthService) -> Self {
        Self { clock, store, auth }
    }

    // ── courses ───────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `AdminError::Auth` without admin rights or `AdminError::Course`
    /// for invalid input.
    pub async fn create_course(&self, draft: CourseDraft) -> Result<Course, AdminError> {
        self.auth.require_admin().await?;
        let now = self.clock.now();
        let course = self
            .store
            .update(Namespace::Courses, |s| {
                let id = CourseId::next_after(s.courses.iter().map(|c| &c.id));
                let course = draft.validate(id, now)?;
                s.courses.push(course.clone());
                Ok::<_, CourseError>(course)
            })
            .await?;
        info!(course_id = %course.id, title = %course.title, "course created");
        Ok(course)
    }

    /// Replace a course's editable fields, keeping its id and creation time.
    ///
    /// # Errors
    ///
    /// Returns `AdminError::CourseNotFound` or `AdminError::Course`.
    pub async fn update_course(
        &self,
        course_id: CourseId,
        draft: CourseDraft,
    ) -> Result<Course, AdminError> {
        self.auth.require_admin().await?;
        let existing = self.course(course_id).await?;
        let course = draft.validate(course_id, existing.created_at)?;
        self.store.upsert_course(course.clone()).await;
        info!(course_id = %course_id, "course updated");
        Ok(course)
    }

    /// # Errors
    ///
    /// Returns `AdminError::CourseNotFound`.
    pub async fn delete_course(&self, course_id: CourseId) -> Result<(), AdminError> {
        self.auth.require_admin().await?;
        if !self.store.delete_course(course_id).await {
            return Err(AdminError::CourseNotFound(course_id));
        }
        info!(course_id = %course_id, "course deleted");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `AdminError::CourseNotFound`.
    pub async fn set_published(&self, course_id: CourseId, published: bool) -> Result<(), AdminError> {
        self.edit_course(course_id, |course| {
            course.published = published;
            Ok(())
        })
        .await
    }

    /// # Errors
    ///
    /// Returns `AdminError::CourseNotFound` or `AdminError::Course` for a blank title.
    pub async fn add_subject(&self, course_id: CourseId, title: &str) -> Result<SubjectId, AdminError> {
        let title = child_title(title, "subject")?;
        self.edit_course(course_id, |course| {
            let id = course.next_subject_id();
            course.subjects.push(Subject {
                id,
                title,
                chapters: Vec::new(),
            });
            Ok(id)
        })
        .await
    }

    /// # Errors
    ///
    /// Returns `AdminError::CourseNotFound` or `AdminError::SubjectNotFound`.
    pub async fn remove_subject(&self, course_id: CourseId, subject_id: SubjectId) -> Result<(), AdminError> {
        self.edit_course(course_id, |course| {
            let before = course.subjects.len();
            course.subjects.retain(|s| s.id != subject_id);
            if course.subjects.len() == before {
                return Err(AdminError::SubjectNotFound(subject_id));
            }
            Ok(())
        })
        .await
    }

    /// # Errors
    ///
    /// Returns `AdminError` when the course or subject is unknown or the title is blank.
    pub async fn add_chapter(
        &self,
        course_id: CourseId,
        subject_id: SubjectId,
        title: &str,
    ) -> Result<ChapterId, AdminError> {
        let title = child_title(title, "chapter")?;
        self.edit_course(course_id, |course| {
            let id = course.next_chapter_id();
            let subject = course
                .subject_mut(subject_id)
                .ok_or(AdminError::SubjectNotFound(subject_id))?;
            subject.chapters.push(Chapter {
                id,
                title,
                lectures: Vec::new(),
            });
            Ok(id)
        })
        .await
    }

    /// # Errors
    ///
    /// Returns `AdminError` when the course, subject or chapter is unknown.
    pub async fn remove_chapter(
        &self,
        course_id: CourseId,
        subject_id: SubjectId,
        chapter_id: ChapterId,
    ) -> Result<(), AdminError> {
        self.edit_course(course_id, |course| {
            let subject = course
                .subject_mut(subject_id)
                .ok_or(AdminError::SubjectNotFound(subject_id))?;
            let before = subject.chapters.len();
            subject.chapters.retain(|c| c.id != chapter_id);
            if subject.chapters.len() == before {
                return Err(AdminError::ChapterNotFound(chapter_id));
            }
            Ok(())
        })
        .await
    }

    /// Add a lecture after checking that its video link can be played.
    ///
    /// # Errors
    ///
    /// Returns `AdminError::VideoSource` for an unusable link, or a not-found
    /// error for the course, subject or chapter.
    pub async fn add_lecture(
        &self,
        course_id: CourseId,
        subject_id: SubjectId,
        chapter_id: ChapterId,
        draft: LectureDraft,
    ) -> Result<LectureId, AdminError> {
        let title = child_title(&draft.title, "lecture")?;
        let video_url = draft.video_url.trim().to_string();
        VideoSource::classify(&video_url)?;
        let notes = draft
            .notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        self.edit_course(course_id, |course| {
            let id = course.next_lecture_id();
            let chapter = course
                .subject_mut(subject_id)
                .ok_or(AdminError::SubjectNotFound(subject_id))?
                .chapter_mut(chapter_id)
                .ok_or(AdminError::ChapterNotFound(chapter_id))?;
            chapter.lectures.push(Lecture {
                id,
                title,
                video_url,
                duration_secs: draft.duration_secs,
                notes,
            });
            Ok(id)
        })
        .await
    }

    /// # Errors
    ///
    /// Returns `AdminError::CourseNotFound` or `AdminError::LectureNotFound`.
    pub async fn remove_lecture(&self, course_id: CourseId, lecture_id: LectureId) -> Result<(), AdminError> {
        self.edit_course(course_id, |course| {
            let chapter = course
                .subjects
                .iter_mut()
                .flat_map(|s| s.chapters.iter_mut())
                .find(|c| c.lectures.iter().any(|l| l.id == lecture_id))
                .ok_or(AdminError::LectureNotFound(lecture_id))?;
            chapter.lectures.retain(|l| l.id != lecture_id);
            Ok(())
        })
        .await
    }

    /// Replace the pre-authored exam of a course.
    ///
    /// # Errors
    ///
    /// Returns `AdminError::Course` for duplicate question ids or a zero
    /// duration.
    pub async fn replace_question_bank(
        &self,
        course_id: CourseId,
        questions: Vec<Question>,
        exam_duration_secs: Option<u32>,
    ) -> Result<(), AdminError> {
        self.auth.require_admin().await?;
        let existing = self.course(course_id).await?;
        let created_at = existing.created_at;
        let mut draft = CourseDraft::from(existing);
        draft.question_bank = questions;
        draft.exam_duration_secs = exam_duration_secs;
        let course = draft.validate(course_id, created_at)?;
        let count = course.question_bank.len();
        self.store.upsert_course(course).await;
        info!(course_id = %course_id, questions = count, "question bank replaced");
        Ok(())
    }

    async fn course(&self, course_id: CourseId) -> Result<Course, AdminError> {
        self.store
            .course(course_id)
            .await
            .ok_or(AdminError::CourseNotFound(course_id))
    }

    async fn edit_course<R>(
        &self,
        course_id: CourseId,
        f: impl FnOnce(&mut Course) -> Result<R, AdminError>,
    ) -> Result<R, AdminError> {
        self.auth.require_admin().await?;
        let mut course = self.course(course_id).await?;
        let result = f(&mut course)?;
        self.store.upsert_course(course).await;
        Ok(result)
    }

    // ── users ─────────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `AdminError::Auth` without admin rights.
    pub async fn list_users(&self) -> Result<Vec<User>, AdminError> {
        self.auth.require_admin().await?;
        Ok(self.store.users().await)
    }

    /// # Errors
    ///
    /// Returns `AdminError::UserNotFound`, or `AdminError::LastAdmin` when the
    /// change would leave no administrator.
    pub async fn set_role(&self, user_id: UserId, role: Role) -> Result<User, AdminError> {
        self.auth.require_admin().await?;
        let updated = self
            .store
            .update(Namespace::Users, |s| {
                let admins = s.users.iter().filter(|u| u.is_admin()).count();
                let user = s.user_mut(user_id).ok_or(AdminError::UserNotFound(user_id))?;
                if user.is_admin() && role != Role::Admin && admins <= 1 {
                    return Err(AdminError::LastAdmin);
                }
                user.role = role;
                Ok(user.clone())
            })
            .await?;
        info!(user_id = %user_id, role = role.as_str(), "role changed");
        Ok(updated)
    }

    /// Delete an account and everything stored for it.
    ///
    /// # Errors
    ///
    /// Returns `AdminError::CannotDeleteSelf` or `AdminError::UserNotFound`.
    pub async fn delete_user(&self, user_id: UserId) -> Result<(), AdminError> {
        let admin = self.auth.require_admin().await?;
        if admin.id == user_id {
            return Err(AdminError::CannotDeleteSelf);
        }
        if !self.store.delete_user(user_id).await {
            return Err(AdminError::UserNotFound(user_id));
        }
        info!(user_id = %user_id, "user deleted");
        Ok(())
    }

    /// Set a random temporary password and return it once.
    ///
    /// # Errors
    ///
    /// Returns `AdminError::UserNotFound`.
    pub async fn reset_password(&self, user_id: UserId) -> Result<String, AdminError> {
        self.auth.require_admin().await?;
        let password: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(TEMP_PASSWORD_LEN)
            .map(char::from)
            .collect();
        let mut user = self
            .store
            .user(user_id)
            .await
            .ok_or(AdminError::UserNotFound(user_id))?;
        user.set_password(&password)?;
        let hash = user.password_hash;
        self.store
            .update_user(user_id, |u| u.password_hash = hash)
            .await
            .ok_or(AdminError::UserNotFound(user_id))?;
        info!(user_id = %user_id, "password reset");
        Ok(password)
    }

    // ── banners ───────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `AdminError::InvalidBanner` for a blank title or image.
    pub async fn create_banner(&self, draft: BannerDraft) -> Result<Banner, AdminError> {
        self.auth.require_admin().await?;
        let banner = self
            .store
            .update(Namespace::Banners, |s| {
                let id = BannerId::next_after(s.banners.iter().map(|b| &b.id));
                let banner = draft.validate(id)?;
                s.banners.push(banner.clone());
                Ok::<_, AdminError>(banner)
            })
            .await?;
        info!(banner_id = %banner.id, "banner created");
        Ok(banner)
    }

    /// # Errors
    ///
    /// Returns `AdminError::BannerNotFound` or `AdminError::InvalidBanner`.
    pub async fn update_banner(&self, id: BannerId, draft: BannerDraft) -> Result<Banner, AdminError> {
        self.auth.require_admin().await?;
        self.banner(id).await?;
        let banner = draft.validate(id)?;
        self.store.upsert_banner(banner.clone()).await;
        Ok(banner)
    }

    /// # Errors
    ///
    /// Returns `AdminError::BannerNotFound`.
    pub async fn delete_banner(&self, id: BannerId) -> Result<(), AdminError> {
        self.auth.require_admin().await?;
        if self.store.delete_banner(id).await {
            Ok(())
        } else {
            Err(AdminError::BannerNotFound(id))
        }
    }

    /// Flip a banner's visibility; returns the new state.
    ///
    /// # Errors
    ///
    /// Returns `AdminError::BannerNotFound`.
    pub async fn toggle_banner(&self, id: BannerId) -> Result<bool, AdminError> {
        self.auth.require_admin().await?;
        let mut banner = self.banner(id).await?;
        banner.active = !banner.active;
        let active = banner.active;
        self.store.upsert_banner(banner).await;
        Ok(active)
    }

    async fn banner(&self, id: BannerId) -> Result<Banner, AdminError> {
        self.store
            .read(|s| s.banners.iter().find(|b| b.id == id).cloned())
            .await
            .ok_or(AdminError::BannerNotFound(id))
    }

    // ── settings ──────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `AdminError::Auth` without admin rights.
    pub async fn settings(&self) -> Result<PortalSettings, AdminError> {
        self.auth.require_admin().await?;
        Ok(self.store.settings().await)
    }

    /// # Errors
    ///
    /// Returns `AdminError::Settings` for invalid input.
    pub async fn save_settings(&self, draft: PortalSettingsDraft) -> Result<PortalSettings, AdminError> {
        self.auth.require_admin().await?;
        let settings = draft.validate()?;
        self.store.save_settings(settings.clone()).await;
        info!(site_name = settings.site_name(), "settings saved");
        Ok(settings)
    }

    // ── orders ────────────────────────────────────────────────────────────────

    /// Orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AdminError::Auth` without admin rights.
    pub async fn list_orders(&self) -> Result<Vec<Order>, AdminError> {
        self.auth.require_admin().await?;
        let mut orders = self.store.orders().await;
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }

    /// Mark an order refunded and revoke the purchase it granted.
    ///
    /// # Errors
    ///
    /// Returns `AdminError::OrderNotFound`.
    pub async fn refund_order(&self, order_id: OrderId) -> Result<Order, AdminError> {
        self.auth.require_admin().await?;
        let order = self
            .store
            .update(Namespace::Orders, |s| {
                let order = s
                    .orders
                    .iter_mut()
                    .find(|o| o.id == order_id)
                    .ok_or(AdminError::OrderNotFound(order_id))?;
                order.status = OrderStatus::Refunded;
                Ok::<_, AdminError>(order.clone())
            })
            .await?;
        self.store
            .update_user(order.user_id, |u| {
                u.purchased_courses.retain(|c| *c != order.course_id);
            })
            .await;
        info!(order_id = %order_id, "order refunded");
        Ok(order)
    }
}

fn child_title(raw: &str, kind: &'static str) -> Result<String, AdminError> {
    let title = raw.trim().to_string();
    if title.is_empty() {
        return Err(CourseError::EmptyChildTitle { kind }.into());
    }
    Ok(title)
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::model::{CourseAccess, UserDraft};
    use portal_core::time::fixed_clock;
    use storage::repository::InMemoryKeyValueStore;

    async fn admin() -> AdminService {
        let store = Arc::new(PortalStore::load(Arc::new(InMemoryKeyValueStore::new())).await);
        let auth = AuthService::new(fixed_clock(), Arc::clone(&store));
        auth.sign_up(UserDraft {
            name: "Admin".into(),
            email: "admin@example.com".into(),
            password: "secret123".into(),
        })
        .await
        .unwrap();
        AdminService::new(fixed_clock(), store, auth)
    }

    #[tokio::test]
    async fn builds_course_tree() {
        let admin = admin().await;
        let course = admin
            .create_course(CourseDraft::new("Physics", CourseAccess::Free))
            .await
            .unwrap();
        let subject = admin.add_subject(course.id, "Mechanics").await.unwrap();
        let chapter = admin.add_chapter(course.id, subject, "Motion").await.unwrap();
        let lecture = admin
            .add_lecture(
                course.id,
                subject,
                chapter,
                LectureDraft {
                    title: "Velocity".into(),
                    video_url: "https://youtu.be/dQw4w9WgXcQ".into(),
                    ..LectureDraft::default()
                },
            )
            .await
            .unwrap();

        let stored = admin.store.course(course.id).await.unwrap();
        assert_eq!(stored.lecture_count(), 1);
        assert_eq!(
            stored.find_lecture(lecture).unwrap().chapter.title,
            "Motion"
        );

        admin.remove_lecture(course.id, lecture).await.unwrap();
        assert!(matches!(
            admin.remove_lecture(course.id, lecture).await,
            Err(AdminError::LectureNotFound(_))
        ));
    }

    #[tokio::test]
    async fn rejects_unplayable_lecture_links() {
        let admin = admin().await;
        let course = admin
            .create_course(CourseDraft::new("Physics", CourseAccess::Free))
            .await
            .unwrap();
        let subject = admin.add_subject(course.id, "Mechanics").await.unwrap();
        let chapter = admin.add_chapter(course.id, subject, "Motion").await.unwrap();
        let err = admin
            .add_lecture(
                course.id,
                subject,
                chapter,
                LectureDraft {
                    title: "Broken".into(),
                    video_url: "ftp://example.com/a.mp4".into(),
                    ..LectureDraft::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::VideoSource(_)));
    }

    #[tokio::test]
    async fn last_admin_is_protected() {
        let admin = admin().await;
        let me = admin.auth.require_admin().await.unwrap();
        assert!(matches!(
            admin.set_role(me.id, Role::Student).await,
            Err(AdminError::LastAdmin)
        ));
        assert!(matches!(
            admin.delete_user(me.id).await,
            Err(AdminError::CannotDeleteSelf)
        ));
    }

    #[tokio::test]
    async fn reset_password_allows_login() {
        let admin = admin().await;
        let me = admin.auth.require_admin().await.unwrap();
        let temp = admin.reset_password(me.id).await.unwrap();
        assert_eq!(temp.len(), TEMP_PASSWORD_LEN);
        admin.auth.log_out().await;
        admin.auth.log_in("admin@example.com", &temp).await.unwrap();
    }

    #[tokio::test]
    async fn banner_validation_and_toggle() {
        let admin = admin().await;
        assert!(matches!(
            admin.create_banner(BannerDraft::default()).await,
            Err(AdminError::InvalidBanner("title"))
        ));
        let banner = admin
            .create_banner(BannerDraft {
                title: "Welcome".into(),
                image_url: "https://example.com/b.png".into(),
                active: true,
                ..BannerDraft::default()
            })
            .await
            .unwrap();
        assert!(!admin.toggle_banner(banner.id).await.unwrap());
        admin.delete_banner(banner.id).await.unwrap();
        assert!(matches!(
            admin.toggle_banner(banner.id).await,
            Err(AdminError::BannerNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_banner_creates_get_distinct_ids() {
        let admin = admin().await;
        let tasks: Vec<_> = (0..16)
            .map(|n| {
                let admin = admin.clone();
                tokio::spawn(async move {
                    admin
                        .create_banner(BannerDraft {
                            title: format!("Banner {n}"),
                            image_url: "https://example.com/b.png".into(),
                            ..BannerDraft::default()
                        })
                        .await
                        .unwrap()
                        .id
                })
            })
            .collect();
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }
        ids.sort_by_key(|id| id.value());
        ids.dedup();
        assert_eq!(ids.len(), 16);
        assert_eq!(admin.store.banners().await.len(), 16);
    }

    #[tokio::test]
    async fn students_cannot_administer() {
        let admin = admin().await;
        admin
            .auth
            .sign_up(UserDraft {
                name: "Student".into(),
                email: "student@example.com".into(),
                password: "secret123".into(),
            })
            .await
            .unwrap();
        assert!(matches!(
            admin.list_users().await,
            Err(AdminError::Auth(_))
        ));
    }
}
