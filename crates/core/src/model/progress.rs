use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::ids::{CourseId, LectureId};

/// Watched share at which a lecture counts as completed.
pub const COMPLETION_RATIO: f64 = 0.95;

/// Last known playback position for one lecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoProgress {
    pub course_id: CourseId,
    pub lecture_id: LectureId,
    pub position_secs: f64,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl VideoProgress {
    #[must_use]
    pub fn completion_ratio(&self) -> Option<f64> {
        self.duration_secs
            .filter(|d| *d > 0.0)
            .map(|d| (self.position_secs / d).clamp(0.0, 1.0))
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completion_ratio()
            .is_some_and(|ratio| ratio >= COMPLETION_RATIO)
    }
}

/// Time-boxed unlock granted after the sponsor link round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TempAccess {
    pub course_id: CourseId,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TempAccess {
    #[must_use]
    pub fn grant(course_id: CourseId, now: DateTime<Utc>, hours: u32) -> Self {
        Self {
            course_id,
            granted_at: now,
            expires_at: now + Duration::hours(i64::from(hours)),
        }
    }

    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Marker written before leaving for the sponsor link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingVerification {
    pub course_id: CourseId,
    pub token: Uuid,
    pub started_at: DateTime<Utc>,
}

impl PendingVerification {
    #[must_use]
    pub fn new(course_id: CourseId, now: DateTime<Utc>) -> Self {
        Self {
            course_id,
            token: Uuid::new_v4(),
            started_at: now,
        }
    }

    #[must_use]
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.started_at)
    }
}
