//! Demo catalog for a fresh install.

use chrono::{DateTime, Utc};
use tracing::info;

use portal_core::exam::{Question, QuestionError};
use portal_core::model::{
    Banner, BannerId, Chapter, ChapterId, Course, CourseAccess, CourseDraft, CourseId, Lecture,
    LectureId, PortalSettingsDraft, QuestionId, Subject, SubjectId,
};

use crate::Clock;
use crate::error::AppServicesError;
use crate::store::PortalStore;

pub const DEMO_ACCESS_KEY: &str = "ALGEBRA-PRO";

/// Populate an empty store with a small catalog, banners and settings.
///
/// Returns `false` when courses already exist; nothing is changed then.
///
/// # Errors
///
/// Returns `AppServicesError` if the built-in content fails validation.
pub async fn seed_demo_catalog(store: &PortalStore, clock: Clock) -> Result<bool, AppServicesError> {
    if store.read(|s| !s.courses.is_empty()).await {
        return Ok(false);
    }
    let now = clock.now();
    let courses = demo_courses(now)?;
    let count = courses.len();
    for course in courses {
        store.upsert_course(course).await;
    }

    for banner in demo_banners() {
        store.upsert_banner(banner).await;
    }

    if store.settings().await.sponsor_link().is_none() {
        let mut draft: PortalSettingsDraft = store.settings().await.to_draft();
        draft.sponsor_link = Some("https://example.com/sponsor".into());
        draft
            .support_email
            .get_or_insert_with(|| "support@example.com".into());
        store.save_settings(draft.validate()?).await;
    }

    info!(courses = count, "seeded demo catalog");
    Ok(true)
}

fn demo_courses(now: DateTime<Utc>) -> Result<Vec<Course>, AppServicesError> {
    let mut algebra = CourseDraft::new("Foundations of Algebra", CourseAccess::Free);
    algebra.description = "Variables, expressions and linear equations from first principles.".into();
    algebra.category = Some("Mathematics".into());
    algebra.subjects = vec![subject(
        1,
        "Expressions",
        vec![chapter(
            1,
            "Getting started",
            vec![
                lecture(1, "What is a variable?", "https://www.youtube.com/watch?v=NybHckSEQBI", 540),
                lecture(2, "Simplifying expressions", "https://cdn.example.com/algebra/simplify.mp4", 780),
            ],
        )],
    )];

    let mut advanced = CourseDraft::new(
        "Advanced Algebra",
        CourseAccess::Paid {
            access_key: Some(DEMO_ACCESS_KEY.into()),
        },
    );
    advanced.description = "Quadratics, polynomials and systems of equations.".into();
    advanced.category = Some("Mathematics".into());
    advanced.price_cents = 4_900;
    advanced.subjects = vec![subject(
        1,
        "Quadratics",
        vec![chapter(
            1,
            "Factoring",
            vec![lecture(1, "Factoring trinomials", "https://vimeo.com/76979871", 900)],
        )],
    )];

    let mut physics = CourseDraft::new("Physics Quick Revision", CourseAccess::Sponsored);
    physics.description = "A short revision course on motion and forces.".into();
    physics.category = Some("Science".into());
    physics.subjects = vec![subject(
        1,
        "Mechanics",
        vec![chapter(
            1,
            "Motion",
            vec![lecture(
                1,
                "Speed and velocity",
                "https://drive.google.com/file/d/1a2B3c4D5e6F/view",
                660,
            )],
        )],
    )];
    physics.question_bank = physics_questions()?;
    physics.exam_duration_secs = Some(300);

    Ok(vec![
        algebra.validate(CourseId::new(1), now)?,
        advanced.validate(CourseId::new(2), now)?,
        physics.validate(CourseId::new(3), now)?,
    ])
}

fn physics_questions() -> Result<Vec<Question>, QuestionError> {
    let raw: [(&str, [&str; 4], u8); 5] = [
        ("What is the SI unit of force?", ["Joule", "Newton", "Watt", "Pascal"], 1),
        (
            "Velocity differs from speed because it has…",
            ["mass", "direction", "energy", "time"],
            1,
        ),
        ("Acceleration due to gravity near Earth is about…", ["9.8 m/s²", "1 m/s²", "98 m/s²", "0.98 m/s²"], 0),
        ("Newton's first law is also called the law of…", ["energy", "momentum", "inertia", "gravity"], 2),
        ("Which quantity is a scalar?", ["displacement", "velocity", "force", "distance"], 3),
    ];
    raw.into_iter()
        .zip(1_u64..)
        .map(|((text, options, correct), id)| {
            Question::new(
                QuestionId::new(id),
                text,
                options.iter().map(|o| (*o).to_string()).collect(),
                correct,
            )
        })
        .collect()
}

fn demo_banners() -> Vec<Banner> {
    vec![
        Banner {
            id: BannerId::new(1),
            title: "New: Physics Quick Revision".into(),
            image_url: "https://example.com/banners/physics.png".into(),
            link_url: Some("/courses/3".into()),
            active: true,
            position: 0,
        },
        Banner {
            id: BannerId::new(2),
            title: "Start algebra for free".into(),
            image_url: "https://example.com/banners/algebra.png".into(),
            link_url: Some("/courses/1".into()),
            active: true,
            position: 1,
        },
    ]
}

fn subject(id: u64, title: &str, chapters: Vec<Chapter>) -> Subject {
    Subject {
        id: SubjectId::new(id),
        title: title.into(),
        chapters,
    }
}

fn chapter(id: u64, title: &str, lectures: Vec<Lecture>) -> Chapter {
    Chapter {
        id: ChapterId::new(id),
        title: title.into(),
        lectures,
    }
}

fn lecture(id: u64, title: &str, video_url: &str, duration_secs: u32) -> Lecture {
    Lecture {
        id: LectureId::new(id),
        title: title.into(),
        video_url: video_url.into(),
        duration_secs: Some(duration_secs),
        notes: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::time::fixed_clock;
    use std::sync::Arc;
    use storage::repository::InMemoryKeyValueStore;

    #[tokio::test]
    async fn seeds_once() {
        let store = PortalStore::load(Arc::new(InMemoryKeyValueStore::new())).await;
        assert!(seed_demo_catalog(&store, fixed_clock()).await.unwrap());
        assert!(!seed_demo_catalog(&store, fixed_clock()).await.unwrap());

        let courses = store.courses().await;
        assert_eq!(courses.len(), 3);
        assert!(courses.iter().any(Course::has_question_bank));
        assert_eq!(
            store.settings().await.sponsor_link(),
            Some("https://example.com/sponsor")
        );
    }

    #[test]
    fn demo_lectures_have_playable_links() {
        let courses = demo_courses(portal_core::time::fixed_now()).unwrap();
        for course in &courses {
            for lecture in course
                .subjects
                .iter()
                .flat_map(|s| s.chapters.iter())
                .flat_map(|c| c.lectures.iter())
            {
                portal_core::video::VideoSource::classify(&lecture.video_url).unwrap();
            }
        }
    }
}
