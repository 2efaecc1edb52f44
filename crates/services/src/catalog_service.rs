use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use portal_core::model::{
    Banner, Chapter, ChapterId, Course, CourseAccess, CourseId, Lecture, Subject, SubjectId,
};

use crate::Clock;
use crate::access_service::{AccessDecision, decide_access};
use crate::error::CatalogError;
use crate::store::{PortalState, PortalStore};

#[derive(Debug, Clone, Default)]
pub struct CourseFilter {
    pub category: Option<String>,
    pub query: Option<String>,
    /// Admin listings include drafts.
    pub include_unpublished: bool,
}

/// One row of the catalog listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseSummary {
    pub id: CourseId,
    pub title: String,
    pub category: Option<String>,
    pub thumbnail_url: Option<String>,
    pub price_cents: u32,
    pub access: CourseAccess,
    pub lecture_count: usize,
    pub has_question_bank: bool,
    pub unlocked: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CourseDetail {
    pub course: Course,
    pub lecture_count: usize,
    pub completed_lectures: usize,
    pub access: AccessDecision,
}

/// Read-only views over the catalog.
#[derive(Clone)]
pub struct CatalogService {
    clock: Clock,
    store: Arc<PortalStore>,
}

impl CatalogService {
    #[must_use]
    pub fn new(clock: Clock, store: Arc<PortalStore>) -> Self {
        Self { clock, store }
    }

    /// Courses matching the filter, newest first.
    pub async fn list_courses(&self, filter: &CourseFilter) -> Vec<CourseSummary> {
        let now = self.clock.now();
        self.store
            .read(|s| {
                let mut courses: Vec<&Course> = s
                    .courses
                    .iter()
                    .filter(|c| filter.include_unpublished || c.published)
                    .filter(|c| match filter.category.as_deref() {
                        Some(wanted) => c
                            .category
                            .as_deref()
                            .is_some_and(|cat| cat.eq_ignore_ascii_case(wanted.trim())),
                        None => true,
                    })
                    .filter(|c| filter.query.as_deref().is_none_or(|q| c.matches_query(q)))
                    .collect();
                courses.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
                courses
                    .into_iter()
                    .map(|course| CourseSummary {
                        id: course.id,
                        title: course.title.clone(),
                        category: course.category.clone(),
                        thumbnail_url: course.thumbnail_url.clone(),
                        price_cents: course.price_cents,
                        access: course.access.clone(),
                        lecture_count: course.lecture_count(),
                        has_question_bank: course.has_question_bank(),
                        unlocked: access_in(s, course, now).is_granted(),
                    })
                    .collect()
            })
            .await
    }

    /// # Errors
    ///
    /// Returns `CatalogError::CourseNotFound` for unknown or unpublished
    /// courses (admins still see drafts).
    pub async fn course_detail(&self, course_id: CourseId) -> Result<CourseDetail, CatalogError> {
        let now = self.clock.now();
        self.store
            .read(|s| {
                let course = visible_course(s, course_id)?;
                let completed_lectures = s
                    .current_user()
                    .and_then(|u| s.video_progress.get(&u.id))
                    .map_or(0, |records| {
                        records
                            .iter()
                            .filter(|p| p.course_id == course_id && p.is_completed())
                            .count()
                    });
                Ok(CourseDetail {
                    lecture_count: course.lecture_count(),
                    completed_lectures,
                    access: access_in(s, course, now),
                    course: course.clone(),
                })
            })
            .await
    }

    /// # Errors
    ///
    /// Returns `CatalogError::CourseNotFound`.
    pub async fn subjects(&self, course_id: CourseId) -> Result<Vec<Subject>, CatalogError> {
        self.store
            .read(|s| Ok(visible_course(s, course_id)?.subjects.clone()))
            .await
    }

    /// # Errors
    ///
    /// Returns `CatalogError::CourseNotFound` or `CatalogError::SubjectNotFound`.
    pub async fn chapters(
        &self,
        course_id: CourseId,
        subject_id: SubjectId,
    ) -> Result<Vec<Chapter>, CatalogError> {
        self.store
            .read(|s| {
                let subject = visible_course(s, course_id)?
                    .subject(subject_id)
                    .ok_or(CatalogError::SubjectNotFound(subject_id))?;
                Ok(subject.chapters.clone())
            })
            .await
    }

    /// # Errors
    ///
    /// Returns `CatalogError` when the course, subject or chapter is unknown.
    pub async fn lectures(
        &self,
        course_id: CourseId,
        subject_id: SubjectId,
        chapter_id: ChapterId,
    ) -> Result<Vec<Lecture>, CatalogError> {
        self.store
            .read(|s| {
                let chapter = visible_course(s, course_id)?
                    .subject(subject_id)
                    .ok_or(CatalogError::SubjectNotFound(subject_id))?
                    .chapters
                    .iter()
                    .find(|c| c.id == chapter_id)
                    .ok_or(CatalogError::ChapterNotFound(chapter_id))?;
                Ok(chapter.lectures.clone())
            })
            .await
    }

    /// Active banners in display order.
    pub async fn active_banners(&self) -> Vec<Banner> {
        let mut banners: Vec<Banner> = self
            .store
            .banners()
            .await
            .into_iter()
            .filter(|b| b.active)
            .collect();
        banners.sort_by_key(|b| (b.position, b.id));
        banners
    }

    /// Distinct categories of published courses, sorted.
    pub async fn categories(&self) -> Vec<String> {
        self.store
            .read(|s| {
                s.courses
                    .iter()
                    .filter(|c| c.published)
                    .filter_map(|c| c.category.clone())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            })
            .await
    }
}

fn visible_course(state: &PortalState, course_id: CourseId) -> Result<&Course, CatalogError> {
    let is_admin = state.current_user().is_some_and(|u| u.is_admin());
    state
        .course(course_id)
        .filter(|c| c.published || is_admin)
        .ok_or(CatalogError::CourseNotFound(course_id))
}

fn access_in(state: &PortalState, course: &Course, now: DateTime<Utc>) -> AccessDecision {
    let user = state.current_user();
    let grants = user
        .and_then(|u| state.temp_access.get(&u.id))
        .map_or(&[][..], Vec::as_slice);
    decide_access(user, course, grants, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::model::{BannerId, CourseDraft};
    use portal_core::time::{fixed_clock, fixed_now};
    use storage::repository::InMemoryKeyValueStore;

    fn course(id: u64, title: &str, category: &str, published: bool) -> Course {
        let mut draft = CourseDraft::new(title, CourseAccess::Free);
        draft.category = Some(category.into());
        draft.published = published;
        draft.validate(CourseId::new(id), fixed_now()).unwrap()
    }

    async fn catalog() -> CatalogService {
        let store = Arc::new(PortalStore::load(Arc::new(InMemoryKeyValueStore::new())).await);
        store.upsert_course(course(1, "Algebra", "Math", true)).await;
        store.upsert_course(course(2, "Geometry", "math", true)).await;
        store.upsert_course(course(3, "Draft Physics", "Science", false)).await;
        CatalogService::new(fixed_clock(), store)
    }

    #[tokio::test]
    async fn listing_hides_drafts_and_filters() {
        let catalog = catalog().await;
        let all = catalog.list_courses(&CourseFilter::default()).await;
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|c| c.unlocked));

        let found = catalog
            .list_courses(&CourseFilter {
                query: Some("geo".into()),
                ..CourseFilter::default()
            })
            .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Geometry");

        let math = catalog
            .list_courses(&CourseFilter {
                category: Some("MATH".into()),
                ..CourseFilter::default()
            })
            .await;
        assert_eq!(math.len(), 2);
    }

    #[tokio::test]
    async fn drafts_are_not_found_for_visitors() {
        let catalog = catalog().await;
        assert_eq!(
            catalog.course_detail(CourseId::new(3)).await.unwrap_err(),
            CatalogError::CourseNotFound(CourseId::new(3))
        );
        assert_eq!(catalog.categories().await, vec!["Math", "math"]);
    }

    #[tokio::test]
    async fn banners_follow_position() {
        let catalog = catalog().await;
        for (id, position, active) in [(1, 2, true), (2, 1, true), (3, 0, false)] {
            catalog
                .store
                .upsert_banner(Banner {
                    id: BannerId::new(id),
                    title: format!("Banner {id}"),
                    image_url: "https://example.com/b.png".into(),
                    link_url: None,
                    active,
                    position,
                })
                .await;
        }
        let ids: Vec<u64> = catalog
            .active_banners()
            .await
            .iter()
            .map(|b| b.id.value())
            .collect();
        assert_eq!(ids, vec![2, 1]);
    }
}
