//! Parsing of model output into exam questions, and the prompt that asks for it.

use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

use crate::exam::{OPTION_COUNT, Question, QuestionError};
use crate::model::QuestionId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuizParseError {
    #[error("response contains no JSON payload")]
    NoJson,

    #[error("response JSON is malformed: {0}")]
    InvalidJson(String),

    #[error("expected a JSON array of questions")]
    NotAnArray,

    #[error("response contains no questions")]
    Empty,

    #[error("question {index}: missing field `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("question {index}: invalid correct answer `{value}`")]
    InvalidAnswer { index: usize, value: String },

    #[error("question {index}: {source}")]
    InvalidQuestion {
        index: usize,
        #[source]
        source: QuestionError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

/// Prompt asking the model for a bare JSON array of questions.
#[must_use]
pub fn build_quiz_prompt(topic: &str, count: usize, difficulty: Difficulty) -> String {
    let count = count.max(1);
    format!(
        "Create {count} {difficulty} multiple-choice questions about: {topic}.\n\
         Respond with only a JSON array. Each element must be an object with the keys \
         \"id\" (number), \"question\" (string), \"options\" (array of exactly {OPTION_COUNT} \
         strings) and \"correctAnswer\" (0-based index of the correct option). \
         Do not add explanations or markdown.",
        topic = topic.trim(),
        difficulty = difficulty.as_str(),
    )
}

/// Extract a question set from free-form model output.
///
/// Accepts a bare array, an array surrounded by prose or inside a code fence,
/// or an object holding the array under `questions`. Missing or duplicated
/// ids are replaced with `1..=n`. One invalid question fails the whole payload.
///
/// # Errors
///
/// Returns `QuizParseError` when no usable array can be found or any question
/// is malformed.
pub fn parse_questions(text: &str) -> Result<Vec<Question>, QuizParseError> {
    let value = extract_json(text)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("questions") {
            Some(Value::Array(items)) => items,
            _ => return Err(QuizParseError::NotAnArray),
        },
        _ => return Err(QuizParseError::NotAnArray),
    };
    if items.is_empty() {
        return Err(QuizParseError::Empty);
    }

    let mut parsed = items
        .iter()
        .enumerate()
        .map(|(index, item)| parse_item(index, item))
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = HashSet::new();
    let ids_usable = parsed
        .iter()
        .all(|(id, _)| id.is_some_and(|id| seen.insert(id)));
    if !ids_usable {
        for (position, (id, _)) in parsed.iter_mut().enumerate() {
            *id = Some(QuestionId::new(position as u64 + 1));
        }
    }

    Ok(parsed
        .into_iter()
        .enumerate()
        .map(|(position, (id, question))| {
            question.with_id(id.unwrap_or(QuestionId::new(position as u64 + 1)))
        })
        .collect())
}

fn extract_json(text: &str) -> Result<Value, QuizParseError> {
    let body = strip_fence(text).unwrap_or(text).trim();
    if body.is_empty() {
        return Err(QuizParseError::NoJson);
    }
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return Ok(value);
    }

    // Prose may contain its own brackets; the first question-shaped value wins.
    let mut fallback = None;
    let mut first_error = None;
    for (start, _) in body.match_indices(['[', '{']) {
        let mut values = serde_json::Deserializer::from_str(&body[start..]).into_iter::<Value>();
        match values.next() {
            Some(Ok(value)) if is_question_set(&value) => return Ok(value),
            Some(Ok(value)) => {
                fallback.get_or_insert(value);
            }
            Some(Err(err)) => {
                first_error.get_or_insert_with(|| err.to_string());
            }
            None => {}
        }
    }
    match (fallback, first_error) {
        (Some(value), _) => Ok(value),
        (None, Some(err)) => Err(QuizParseError::InvalidJson(err)),
        (None, None) => Err(QuizParseError::NoJson),
    }
}

/// A non-empty array of objects, or an object holding one under `questions`.
fn is_question_set(value: &Value) -> bool {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("questions") {
            Some(Value::Array(items)) => items,
            _ => return false,
        },
        _ => return false,
    };
    !items.is_empty() && items.iter().all(Value::is_object)
}

/// Contents of the first fenced block, without the language tag.
fn strip_fence(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let newline = after.find('\n')?;
    let inner = &after[newline + 1..];
    let end = inner.find("```")?;
    Some(&inner[..end])
}

fn parse_item(index: usize, item: &Value) -> Result<(Option<QuestionId>, Question), QuizParseError> {
    let text = item
        .get("question")
        .or_else(|| item.get("text"))
        .and_then(Value::as_str)
        .ok_or(QuizParseError::MissingField {
            index,
            field: "question",
        })?;
    let options = item
        .get("options")
        .and_then(Value::as_array)
        .ok_or(QuizParseError::MissingField {
            index,
            field: "options",
        })?
        .iter()
        .map(|opt| match opt {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>();
    let raw_answer = item
        .get("correctAnswer")
        .or_else(|| item.get("correct_answer"))
        .ok_or(QuizParseError::MissingField {
            index,
            field: "correctAnswer",
        })?;
    let correct = parse_answer(raw_answer).ok_or_else(|| QuizParseError::InvalidAnswer {
        index,
        value: raw_answer.to_string(),
    })?;

    let id = item.get("id").and_then(|raw| match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    });

    let question = Question::new(QuestionId::new(0), text, options, correct)
        .map_err(|source| QuizParseError::InvalidQuestion { index, source })?;
    Ok((id.map(QuestionId::new), question))
}

/// A 0-based index as a number or numeric string, or an option letter.
fn parse_answer(raw: &Value) -> Option<u8> {
    match raw {
        Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<u8>() {
                return Some(n);
            }
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c @ ('A'..='D' | 'a'..='d')), None) => {
                    Some(c.to_ascii_uppercase() as u8 - b'A')
                }
                _ => None,
            }
        }
        _ => None,
    }
}
