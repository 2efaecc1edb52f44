use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use super::question::{OPTION_COUNT, Question};
use super::ExamError;
use crate::model::CourseId;

/// Wire value for "no option selected".
pub const UNANSWERED: i8 = -1;

//
// ─── ANSWER SHEET ──────────────────────────────────────────────────────────────
//

/// One slot per question; `None` means unanswered.
///
/// The sheet is sized from its question set and never grows or shrinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerSheet(Vec<Option<u8>>);

impl AnswerSheet {
    #[must_use]
    pub fn blank(len: usize) -> Self {
        Self(vec![None; len])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<u8> {
        self.0.get(index).copied().flatten()
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.0.iter().filter(|slot| slot.is_some()).count()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Option<u8>] {
        &self.0
    }

    /// # Errors
    ///
    /// Returns `ExamError` if the index or option is out of range.
    pub fn set(&mut self, index: usize, option: Option<u8>) -> Result<(), ExamError> {
        if let Some(opt) = option {
            if usize::from(opt) >= OPTION_COUNT {
                return Err(ExamError::InvalidOption(opt));
            }
        }
        let len = self.0.len();
        let slot = self
            .0
            .get_mut(index)
            .ok_or(ExamError::IndexOutOfRange { index, len })?;
        *slot = option;
        Ok(())
    }
}

impl Serialize for AnswerSheet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for slot in &self.0 {
            let wire = slot.map_or(UNANSWERED, |opt| i8::try_from(opt).unwrap_or(UNANSWERED));
            seq.serialize_element(&wire)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for AnswerSheet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Vec::<i64>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|value| {
                if value == i64::from(UNANSWERED) {
                    return Ok(None);
                }
                u8::try_from(value)
                    .ok()
                    .filter(|opt| usize::from(*opt) < OPTION_COUNT)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom(format!("invalid answer value {value}")))
            })
            .collect::<Result<Vec<_>, D::Error>>()
            .map(Self)
    }
}

//
// ─── SCORING ───────────────────────────────────────────────────────────────────
//

/// Number of questions whose stored answer matches the correct option.
///
/// Unanswered slots never count; extra slots on either side are ignored.
#[must_use]
pub fn score(questions: &[Question], answers: &AnswerSheet) -> u32 {
    let correct = questions
        .iter()
        .zip(answers.as_slice())
        .filter(|(question, answer)| question.is_correct(**answer))
        .count();
    u32::try_from(correct).unwrap_or(u32::MAX)
}

//
// ─── PERSISTED RECORDS ─────────────────────────────────────────────────────────
//

/// In-flight attempt, saved so the learner can resume it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamProgress {
    pub course_id: CourseId,
    pub questions: Vec<Question>,
    pub answers: AnswerSheet,
    #[serde(default)]
    pub current_index: usize,
    #[serde(rename = "timeLeft")]
    pub time_left_secs: u32,
    pub last_saved: DateTime<Utc>,
    #[serde(default)]
    pub is_ai_generated: bool,
}

impl ExamProgress {
    /// Check a persisted attempt before trusting it.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::EmptyQuestionSet` or `ExamError::AnswerCountMismatch`,
    /// or `ExamError::IndexOutOfRange` for a stale cursor.
    pub fn validate(&self) -> Result<(), ExamError> {
        if self.questions.is_empty() {
            return Err(ExamError::EmptyQuestionSet);
        }
        if self.answers.len() != self.questions.len() {
            return Err(ExamError::AnswerCountMismatch {
                questions: self.questions.len(),
                answers: self.answers.len(),
            });
        }
        if self.current_index >= self.questions.len() {
            return Err(ExamError::IndexOutOfRange {
                index: self.current_index,
                len: self.questions.len(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.answered_count()
    }
}

/// Append-only history entry for a finished attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResult {
    pub course_id: CourseId,
    pub score: u32,
    pub total_questions: u32,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub is_ai_generated: bool,
}

impl ExamResult {
    /// Whole-number percentage, rounded down.
    #[must_use]
    pub fn percentage(&self) -> u32 {
        if self.total_questions == 0 {
            return 0;
        }
        self.score.saturating_mul(100) / self.total_questions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QuestionId;
    use crate::time::fixed_now;

    fn question(id: u64, correct: u8) -> Question {
        Question::new(
            QuestionId::new(id),
            format!("Q{id}"),
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct,
        )
        .unwrap()
    }

    #[test]
    fn unanswered_serializes_as_sentinel() {
        let mut sheet = AnswerSheet::blank(3);
        sheet.set(1, Some(2)).unwrap();
        assert_eq!(serde_json::to_string(&sheet).unwrap(), "[-1,2,-1]");
        let back: AnswerSheet = serde_json::from_str("[-1,2,-1]").unwrap();
        assert_eq!(back, sheet);
        assert!(serde_json::from_str::<AnswerSheet>("[5]").is_err());
    }

    #[test]
    fn set_rejects_out_of_range() {
        let mut sheet = AnswerSheet::blank(2);
        assert_eq!(
            sheet.set(2, Some(0)).unwrap_err(),
            ExamError::IndexOutOfRange { index: 2, len: 2 }
        );
        assert_eq!(
            sheet.set(0, Some(4)).unwrap_err(),
            ExamError::InvalidOption(4)
        );
        assert_eq!(sheet.len(), 2);
    }

    #[test]
    fn unanswered_never_scores() {
        let questions = vec![question(1, 0), question(2, 1), question(3, 2)];
        let mut sheet = AnswerSheet::blank(3);
        assert_eq!(score(&questions, &sheet), 0);
        sheet.set(0, Some(0)).unwrap();
        sheet.set(1, Some(3)).unwrap();
        assert_eq!(score(&questions, &sheet), 1);
    }

    #[test]
    fn progress_validation_catches_mismatch() {
        let progress = ExamProgress {
            course_id: CourseId::new(1),
            questions: vec![question(1, 0), question(2, 0)],
            answers: AnswerSheet::blank(1),
            current_index: 0,
            time_left_secs: 30,
            last_saved: fixed_now(),
            is_ai_generated: false,
        };
        assert_eq!(
            progress.validate().unwrap_err(),
            ExamError::AnswerCountMismatch {
                questions: 2,
                answers: 1
            }
        );
    }

    #[test]
    fn result_percentage() {
        let result = ExamResult {
            course_id: CourseId::new(1),
            score: 7,
            total_questions: 10,
            date: fixed_now(),
            is_ai_generated: true,
        };
        assert_eq!(result.percentage(), 70);
    }
}
