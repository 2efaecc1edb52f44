use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::exam::Question;
use crate::model::ids::{ChapterId, CourseId, LectureId, SubjectId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CourseError {
    #[error("course title cannot be empty")]
    EmptyTitle,

    #[error("{kind} title cannot be empty")]
    EmptyChildTitle { kind: &'static str },

    #[error("duplicate {kind} id {id}")]
    DuplicateId { kind: &'static str, id: u64 },

    #[error("lecture {0} has no video url")]
    MissingVideoUrl(LectureId),

    #[error("paid course access key cannot be blank")]
    BlankAccessKey,

    #[error("exam duration must be > 0")]
    InvalidExamDuration,
}

//
// ─── ACCESS POLICY ─────────────────────────────────────────────────────────────
//

/// How a learner gets into a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CourseAccess {
    Free,
    /// Bought through an order, or unlocked permanently with the shared key.
    Paid {
        #[serde(default, rename = "accessKey")]
        access_key: Option<String>,
    },
    /// Unlocked for a limited time after visiting the sponsor link.
    Sponsored,
}

impl CourseAccess {
    #[must_use]
    pub fn is_free(&self) -> bool {
        matches!(self, CourseAccess::Free)
    }

    #[must_use]
    pub fn access_key(&self) -> Option<&str> {
        match self {
            CourseAccess::Paid { access_key } => access_key.as_deref(),
            _ => None,
        }
    }
}

//
// ─── CONTENT TREE ──────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lecture {
    pub id: LectureId,
    pub title: String,
    pub video_url: String,
    #[serde(default)]
    pub duration_secs: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    pub title: String,
    #[serde(default)]
    pub lectures: Vec<Lecture>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub title: String,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

/// Where a lecture sits inside its course.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LecturePath<'a> {
    pub subject: &'a Subject,
    pub chapter: &'a Chapter,
    pub lecture: &'a Lecture,
}

//
// ─── COURSE ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: CourseId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub price_cents: u32,
    pub access: CourseAccess,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    #[serde(default)]
    pub question_bank: Vec<Question>,
    #[serde(default)]
    pub exam_duration_secs: Option<u32>,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_published")]
    pub published: bool,
}

fn default_published() -> bool {
    true
}

impl Course {
    #[must_use]
    pub fn lecture_count(&self) -> usize {
        self.subjects
            .iter()
            .flat_map(|s| s.chapters.iter())
            .map(|c| c.lectures.len())
            .sum()
    }

    #[must_use]
    pub fn find_lecture(&self, lecture_id: LectureId) -> Option<LecturePath<'_>> {
        self.subjects.iter().find_map(|subject| {
            subject.chapters.iter().find_map(|chapter| {
                chapter
                    .lectures
                    .iter()
                    .find(|l| l.id == lecture_id)
                    .map(|lecture| LecturePath {
                        subject,
                        chapter,
                        lecture,
                    })
            })
        })
    }

    #[must_use]
    pub fn subject(&self, id: SubjectId) -> Option<&Subject> {
        self.subjects.iter().find(|s| s.id == id)
    }

    pub fn subject_mut(&mut self, id: SubjectId) -> Option<&mut Subject> {
        self.subjects.iter_mut().find(|s| s.id == id)
    }

    #[must_use]
    pub fn has_question_bank(&self) -> bool {
        !self.question_bank.is_empty()
    }

    /// Case-insensitive match on title, description and category.
    #[must_use]
    pub fn matches_query(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(&needle)
            || self.description.to_lowercase().contains(&needle)
            || self
                .category
                .as_deref()
                .is_some_and(|c| c.to_lowercase().contains(&needle))
    }

    /// Next free ids for children, across the whole course.
    #[must_use]
    pub fn next_subject_id(&self) -> SubjectId {
        SubjectId::next_after(self.subjects.iter().map(|s| &s.id))
    }

    #[must_use]
    pub fn next_chapter_id(&self) -> ChapterId {
        ChapterId::next_after(
            self.subjects
                .iter()
                .flat_map(|s| s.chapters.iter())
                .map(|c| &c.id),
        )
    }

    #[must_use]
    pub fn next_lecture_id(&self) -> LectureId {
        LectureId::next_after(
            self.subjects
                .iter()
                .flat_map(|s| s.chapters.iter())
                .flat_map(|c| c.lectures.iter())
                .map(|l| &l.id),
        )
    }
}

impl Subject {
    pub fn chapter_mut(&mut self, id: ChapterId) -> Option<&mut Chapter> {
        self.chapters.iter_mut().find(|c| c.id == id)
    }
}

//
// ─── DRAFT ─────────────────────────────────────────────────────────────────────
//

/// Admin form input for a course.
#[derive(Debug, Clone)]
pub struct CourseDraft {
    pub title: String,
    pub description: String,
    pub thumbnail_url: Option<String>,
    pub category: Option<String>,
    pub price_cents: u32,
    pub access: CourseAccess,
    pub subjects: Vec<Subject>,
    pub question_bank: Vec<Question>,
    pub exam_duration_secs: Option<u32>,
    pub published: bool,
}

impl CourseDraft {
    #[must_use]
    pub fn new(title: impl Into<String>, access: CourseAccess) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            thumbnail_url: None,
            category: None,
            price_cents: 0,
            access,
            subjects: Vec::new(),
            question_bank: Vec::new(),
            exam_duration_secs: None,
            published: true,
        }
    }

    /// Validate the form into a course with the given id.
    ///
    /// # Errors
    ///
    /// Returns `CourseError` for blank titles, duplicate child or question
    /// ids, lectures without a video url, or a blank access key.
    pub fn validate(self, id: CourseId, now: DateTime<Utc>) -> Result<Course, CourseError> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(CourseError::EmptyTitle);
        }
        let access = match self.access {
            CourseAccess::Paid { access_key } => {
                let key = access_key.map(|k| k.trim().to_string());
                if key.as_deref() == Some("") {
                    return Err(CourseError::BlankAccessKey);
                }
                CourseAccess::Paid { access_key: key }
            }
            other => other,
        };
        if self.exam_duration_secs == Some(0) {
            return Err(CourseError::InvalidExamDuration);
        }
        validate_tree(&self.subjects)?;
        let mut question_ids = HashSet::new();
        for question in &self.question_bank {
            if !question_ids.insert(question.id()) {
                return Err(CourseError::DuplicateId {
                    kind: "question",
                    id: question.id().value(),
                });
            }
        }

        Ok(Course {
            id,
            title,
            description: self.description.trim().to_string(),
            thumbnail_url: normalize_optional(self.thumbnail_url),
            category: normalize_optional(self.category),
            price_cents: self.price_cents,
            access,
            subjects: self.subjects,
            question_bank: self.question_bank,
            exam_duration_secs: self.exam_duration_secs,
            created_at: now,
            published: self.published,
        })
    }
}

impl From<Course> for CourseDraft {
    fn from(course: Course) -> Self {
        Self {
            title: course.title,
            description: course.description,
            thumbnail_url: course.thumbnail_url,
            category: course.category,
            price_cents: course.price_cents,
            access: course.access,
            subjects: course.subjects,
            question_bank: course.question_bank,
            exam_duration_secs: course.exam_duration_secs,
            published: course.published,
        }
    }
}

fn validate_tree(subjects: &[Subject]) -> Result<(), CourseError> {
    let mut subject_ids = HashSet::new();
    let mut chapter_ids = HashSet::new();
    let mut lecture_ids = HashSet::new();

    for subject in subjects {
        if subject.title.trim().is_empty() {
            return Err(CourseError::EmptyChildTitle { kind: "subject" });
        }
        if !subject_ids.insert(subject.id) {
            return Err(CourseError::DuplicateId {
                kind: "subject",
                id: subject.id.value(),
            });
        }
        for chapter in &subject.chapters {
            if chapter.title.trim().is_empty() {
                return Err(CourseError::EmptyChildTitle { kind: "chapter" });
            }
            if !chapter_ids.insert(chapter.id) {
                return Err(CourseError::DuplicateId {
                    kind: "chapter",
                    id: chapter.id.value(),
                });
            }
            for lecture in &chapter.lectures {
                if lecture.title.trim().is_empty() {
                    return Err(CourseError::EmptyChildTitle { kind: "lecture" });
                }
                if lecture.video_url.trim().is_empty() {
                    return Err(CourseError::MissingVideoUrl(lecture.id));
                }
                if !lecture_ids.insert(lecture.id) {
                    return Err(CourseError::DuplicateId {
                        kind: "lecture",
                        id: lecture.id.value(),
                    });
                }
            }
        }
    }
    Ok(())
}

pub(crate) fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty())
}
