use std::sync::Arc;

use tracing::debug;

use portal_core::model::{CourseId, Lecture, LectureId, VideoProgress};
use portal_core::video::{VideoSource, resume_position};

use crate::Clock;
use crate::access_service::{AccessDecision, AccessService};
use crate::error::{AccessError, CatalogError, PlaybackError};
use crate::store::PortalStore;

/// Minimum forward or backward movement before a tick is persisted.
pub const PROGRESS_SAVE_STEP_SECS: f64 = 5.0;

/// Everything a player needs to start a lecture.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSpec {
    pub course_id: CourseId,
    pub lecture_id: LectureId,
    pub title: String,
    pub source: VideoSource,
    /// Provider URL with the start offset applied.
    pub embed_url: String,
    pub start_at_secs: f64,
    pub native_controls: bool,
}

/// What the player reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    Tick,
    Pause,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CourseProgress {
    pub completed: usize,
    pub total: usize,
}

#[derive(Clone)]
pub struct PlaybackService {
    clock: Clock,
    store: Arc<PortalStore>,
    access: AccessService,
}

impl PlaybackService {
    #[must_use]
    pub fn new(clock: Clock, store: Arc<PortalStore>, access: AccessService) -> Self {
        Self {
            clock,
            store,
            access,
        }
    }

    /// Resolve a lecture into a player, resuming from the saved position.
    ///
    /// # Errors
    ///
    /// Returns `PlaybackError::Locked` without access, `PlaybackError::Catalog`
    /// for unknown ids, or `PlaybackError::VideoSource` for a broken link.
    pub async fn open(
        &self,
        course_id: CourseId,
        lecture_id: LectureId,
    ) -> Result<PlayerSpec, PlaybackError> {
        let lecture = self.playable_lecture(course_id, lecture_id).await?;
        let source = VideoSource::classify(&lecture.video_url)?;
        let saved = match self.store.current_user().await {
            Some(user) => self.store.lecture_progress(user.id, lecture_id).await,
            None => None,
        };
        let duration = saved
            .as_ref()
            .and_then(|p| p.duration_secs)
            .or(lecture.duration_secs.map(f64::from));
        let start_at_secs = resume_position(saved.map(|p| p.position_secs), duration);
        // Whole seconds are enough for provider start offsets.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let embed_url = source.embed_url(start_at_secs.floor() as u32);

        Ok(PlayerSpec {
            course_id,
            lecture_id,
            title: lecture.title,
            native_controls: source.supports_native_controls(),
            embed_url,
            source,
            start_at_secs,
        })
    }

    /// The lecture, provided it belongs to the course and the caller may watch it.
    async fn playable_lecture(
        &self,
        course_id: CourseId,
        lecture_id: LectureId,
    ) -> Result<Lecture, PlaybackError> {
        let course = self
            .store
            .course(course_id)
            .await
            .ok_or(CatalogError::CourseNotFound(course_id))?;
        let lecture = course
            .find_lecture(lecture_id)
            .ok_or(CatalogError::LectureNotFound(lecture_id))?
            .lecture
            .clone();

        match self.access.decide(course_id).await {
            Ok(AccessDecision::Locked) => Err(PlaybackError::Locked(course_id)),
            Ok(_) => Ok(lecture),
            Err(AccessError::CourseNotFound(id)) => Err(CatalogError::CourseNotFound(id).into()),
            Err(_) => Err(PlaybackError::Locked(course_id)),
        }
    }

    /// Record a playback position for the logged-in learner.
    ///
    /// Unknown lectures and courses the learner cannot watch are ignored.
    /// Ticks are only written once the position has moved by at least
    /// `PROGRESS_SAVE_STEP_SECS`; pauses and the end of the video are always
    /// written. Returns whether anything was persisted.
    pub async fn report_progress(
        &self,
        course_id: CourseId,
        lecture_id: LectureId,
        position_secs: f64,
        duration_secs: Option<f64>,
        event: ProgressEvent,
    ) -> bool {
        let Some(user) = self.store.current_user().await else {
            return false;
        };
        if !position_secs.is_finite() || position_secs < 0.0 {
            return false;
        }
        if let Err(err) = self.playable_lecture(course_id, lecture_id).await {
            debug!(course_id = %course_id, lecture_id = %lecture_id, error = %err, "progress ignored");
            return false;
        }
        let duration_secs = duration_secs.filter(|d| d.is_finite() && *d > 0.0);
        let position_secs = match (event, duration_secs) {
            (ProgressEvent::Ended, Some(duration)) => duration,
            _ => position_secs,
        };

        let previous = self.store.lecture_progress(user.id, lecture_id).await;
        let moved_enough = previous.as_ref().is_none_or(|p| {
            (p.position_secs - position_secs).abs() >= PROGRESS_SAVE_STEP_SECS
        });
        if event == ProgressEvent::Tick && !moved_enough {
            return false;
        }

        let record = VideoProgress {
            course_id,
            lecture_id,
            position_secs,
            duration_secs: duration_secs.or(previous.and_then(|p| p.duration_secs)),
            updated_at: self.clock.now(),
        };
        debug!(user_id = %user.id, lecture_id = %lecture_id, position_secs, ?event, "saving video progress");
        self.store.save_video_progress(user.id, record).await;
        true
    }

    /// Progress records of the logged-in learner, most recent first.
    pub async fn watch_history(&self) -> Vec<VideoProgress> {
        let Some(user) = self.store.current_user().await else {
            return Vec::new();
        };
        let mut history = self.store.video_progress(user.id).await;
        history.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        history
    }

    /// Completed lectures of a course for the logged-in learner.
    ///
    /// # Errors
    ///
    /// Returns `PlaybackError::Catalog` for an unknown course.
    pub async fn course_progress(&self, course_id: CourseId) -> Result<CourseProgress, PlaybackError> {
        let course = self
            .store
            .course(course_id)
            .await
            .ok_or(CatalogError::CourseNotFound(course_id))?;
        let completed = self
            .watch_history()
            .await
            .iter()
            .filter(|p| p.course_id == course_id && p.is_completed())
            .filter(|p| course.find_lecture(p.lecture_id).is_some())
            .count();
        Ok(CourseProgress {
            completed,
            total: course.lecture_count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::model::{
        Chapter, ChapterId, CourseAccess, CourseDraft, Lecture, Role, Subject, SubjectId,
        UserDraft, UserId,
    };
    use portal_core::time::{fixed_clock, fixed_now};
    use storage::repository::InMemoryKeyValueStore;

    fn course(access: CourseAccess, video_url: &str) -> portal_core::model::Course {
        let mut draft = CourseDraft::new("Course", access);
        draft.subjects = vec![Subject {
            id: SubjectId::new(1),
            title: "Subject".into(),
            chapters: vec![Chapter {
                id: ChapterId::new(1),
                title: "Chapter".into(),
                lectures: vec![Lecture {
                    id: LectureId::new(1),
                    title: "Intro".into(),
                    video_url: video_url.into(),
                    duration_secs: Some(600),
                    notes: None,
                }],
            }],
        }];
        draft.validate(CourseId::new(1), fixed_now()).unwrap()
    }

    async fn service(access: CourseAccess, video_url: &str, logged_in: bool) -> PlaybackService {
        let store = Arc::new(PortalStore::load(Arc::new(InMemoryKeyValueStore::new())).await);
        store.upsert_course(course(access, video_url)).await;
        if logged_in {
            let user = UserDraft {
                name: "Learner".into(),
                email: "l@example.com".into(),
                password: "secret123".into(),
            }
            .validate(UserId::new(1), Role::Student, fixed_now())
            .unwrap();
            store.insert_user(user).await;
            store.set_current_user(UserId::new(1)).await;
        }
        let access = AccessService::new(fixed_clock(), Arc::clone(&store));
        PlaybackService::new(fixed_clock(), store, access)
    }

    #[tokio::test]
    async fn locked_course_refuses_to_play() {
        let playback = service(
            CourseAccess::Paid { access_key: None },
            "https://cdn.example.com/a.mp4",
            true,
        )
        .await;
        assert!(matches!(
            playback.open(CourseId::new(1), LectureId::new(1)).await,
            Err(PlaybackError::Locked(_))
        ));
    }

    #[tokio::test]
    async fn resumes_from_saved_position() {
        let playback = service(CourseAccess::Free, "https://youtu.be/abc123", true).await;
        let (course, lecture) = (CourseId::new(1), LectureId::new(1));
        assert!(
            playback
                .report_progress(course, lecture, 125.4, Some(600.0), ProgressEvent::Pause)
                .await
        );
        let spec = playback.open(course, lecture).await.unwrap();
        assert!((spec.start_at_secs - 125.4).abs() < f64::EPSILON);
        assert_eq!(spec.embed_url, "https://www.youtube.com/embed/abc123?start=125");
        assert!(!spec.native_controls);
    }

    #[tokio::test]
    async fn ticks_are_throttled() {
        let playback = service(CourseAccess::Free, "https://cdn.example.com/a.mp4", true).await;
        let (course, lecture) = (CourseId::new(1), LectureId::new(1));
        assert!(playback.report_progress(course, lecture, 10.0, None, ProgressEvent::Tick).await);
        assert!(!playback.report_progress(course, lecture, 12.0, None, ProgressEvent::Tick).await);
        assert!(playback.report_progress(course, lecture, 15.0, None, ProgressEvent::Tick).await);
        assert!(playback.report_progress(course, lecture, 16.0, None, ProgressEvent::Pause).await);

        assert!(
            playback
                .report_progress(course, lecture, 590.0, Some(600.0), ProgressEvent::Ended)
                .await
        );
        let progress = playback.course_progress(course).await.unwrap();
        assert_eq!(progress, CourseProgress { completed: 1, total: 1 });
        // A finished video starts over.
        let spec = playback.open(course, lecture).await.unwrap();
        assert!(spec.start_at_secs.abs() < f64::EPSILON);
        assert!(spec.native_controls);
    }

    #[tokio::test]
    async fn progress_needs_access_and_a_matching_lecture() {
        let free = service(CourseAccess::Free, "https://cdn.example.com/a.mp4", true).await;
        assert!(
            !free
                .report_progress(CourseId::new(1), LectureId::new(9), 30.0, None, ProgressEvent::Pause)
                .await
        );
        assert!(
            !free
                .report_progress(CourseId::new(2), LectureId::new(1), 30.0, None, ProgressEvent::Pause)
                .await
        );
        assert!(free.watch_history().await.is_empty());

        let paid = service(
            CourseAccess::Paid { access_key: None },
            "https://cdn.example.com/a.mp4",
            true,
        )
        .await;
        assert!(
            !paid
                .report_progress(CourseId::new(1), LectureId::new(1), 30.0, None, ProgressEvent::Pause)
                .await
        );
        assert!(paid.watch_history().await.is_empty());
    }

    #[tokio::test]
    async fn anonymous_progress_is_not_saved() {
        let playback = service(CourseAccess::Free, "https://cdn.example.com/a.mp4", false).await;
        assert!(
            !playback
                .report_progress(CourseId::new(1), LectureId::new(1), 30.0, None, ProgressEvent::Pause)
                .await
        );
        assert!(playback.watch_history().await.is_empty());
    }
}
