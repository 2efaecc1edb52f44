use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::QuestionId;

/// Every question offers exactly this many options.
pub const OPTION_COUNT: usize = 4;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question text cannot be empty")]
    EmptyText,

    #[error("expected {OPTION_COUNT} options, got {0}")]
    WrongOptionCount(usize),

    #[error("option {0} is empty")]
    EmptyOption(usize),

    #[error("correct answer index {0} is out of range")]
    CorrectAnswerOutOfRange(u8),
}

/// A multiple-choice question. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "QuestionRecord")]
pub struct Question {
    id: QuestionId,
    question: String,
    options: [String; OPTION_COUNT],
    correct_answer: u8,
}

impl Question {
    /// Build a validated question.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` for blank text, a wrong option count, a blank
    /// option, or a correct answer index outside the options.
    pub fn new(
        id: QuestionId,
        question: impl Into<String>,
        options: Vec<String>,
        correct_answer: u8,
    ) -> Result<Self, QuestionError> {
        let question = question.into().trim().to_string();
        if question.is_empty() {
            return Err(QuestionError::EmptyText);
        }
        let count = options.len();
        let options: [String; OPTION_COUNT] = options
            .into_iter()
            .map(|opt| opt.trim().to_string())
            .collect::<Vec<_>>()
            .try_into()
            .map_err(|_| QuestionError::WrongOptionCount(count))?;
        if let Some(index) = options.iter().position(String::is_empty) {
            return Err(QuestionError::EmptyOption(index));
        }
        if usize::from(correct_answer) >= OPTION_COUNT {
            return Err(QuestionError::CorrectAnswerOutOfRange(correct_answer));
        }
        Ok(Self {
            id,
            question,
            options,
            correct_answer,
        })
    }

    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.question
    }

    #[must_use]
    pub fn options(&self) -> &[String; OPTION_COUNT] {
        &self.options
    }

    #[must_use]
    pub fn correct_answer(&self) -> u8 {
        self.correct_answer
    }

    #[must_use]
    pub fn is_correct(&self, selected: Option<u8>) -> bool {
        selected == Some(self.correct_answer)
    }

    /// Same question under a different id.
    #[must_use]
    pub fn with_id(mut self, id: QuestionId) -> Self {
        self.id = id;
        self
    }
}

/// Persisted shape, validated on the way in.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuestionRecord {
    id: QuestionId,
    question: String,
    options: Vec<String>,
    correct_answer: u8,
}

impl TryFrom<QuestionRecord> for Question {
    type Error = QuestionError;

    fn try_from(record: QuestionRecord) -> Result<Self, Self::Error> {
        Question::new(
            record.id,
            record.question,
            record.options,
            record.correct_answer,
        )
    }
}

/// Option letter shown next to an option index (`A`-`D`).
#[must_use]
pub fn option_label(index: u8) -> char {
    char::from(b'A' + index.min(25))
}

/// Parse an option letter or 1-based digit into an index.
#[must_use]
pub fn parse_option_label(raw: &str) -> Option<u8> {
    let mut chars = raw.trim().chars();
    let ch = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    let index = match ch.to_ascii_uppercase() {
        c @ 'A'..='D' => c as u8 - b'A',
        c @ '1'..='4' => c as u8 - b'1',
        _ => return None,
    };
    Some(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Vec<String> {
        vec!["3".into(), "4".into(), "5".into(), "6".into()]
    }

    #[test]
    fn builds_valid_question() {
        let q = Question::new(QuestionId::new(1), " 2 + 2? ", options(), 1).unwrap();
        assert_eq!(q.text(), "2 + 2?");
        assert!(q.is_correct(Some(1)));
        assert!(!q.is_correct(Some(0)));
        assert!(!q.is_correct(None));
    }

    #[test]
    fn rejects_invalid_shapes() {
        let id = QuestionId::new(1);
        assert_eq!(
            Question::new(id, "Q", vec!["a".into()], 0).unwrap_err(),
            QuestionError::WrongOptionCount(1)
        );
        assert_eq!(
            Question::new(id, "Q", options(), 4).unwrap_err(),
            QuestionError::CorrectAnswerOutOfRange(4)
        );
        assert_eq!(
            Question::new(id, "  ", options(), 0).unwrap_err(),
            QuestionError::EmptyText
        );
        let mut blank = options();
        blank[2] = " ".into();
        assert_eq!(
            Question::new(id, "Q", blank, 0).unwrap_err(),
            QuestionError::EmptyOption(2)
        );
    }

    #[test]
    fn deserialization_validates() {
        let ok = r#"{"id":3,"question":"Q","options":["a","b","c","d"],"correctAnswer":2}"#;
        let q: Question = serde_json::from_str(ok).unwrap();
        assert_eq!(q.correct_answer(), 2);
        assert_eq!(
            serde_json::to_string(&q).unwrap(),
            r#"{"id":3,"question":"Q","options":["a","b","c","d"],"correctAnswer":2}"#
        );

        let bad = r#"{"id":3,"question":"Q","options":["a","b","c","d"],"correctAnswer":7}"#;
        assert!(serde_json::from_str::<Question>(bad).is_err());
    }

    #[test]
    fn option_labels() {
        assert_eq!(option_label(0), 'A');
        assert_eq!(option_label(3), 'D');
        assert_eq!(parse_option_label("b"), Some(1));
        assert_eq!(parse_option_label("4"), Some(3));
        assert_eq!(parse_option_label("e"), None);
        assert_eq!(parse_option_label("ab"), None);
    }
}
