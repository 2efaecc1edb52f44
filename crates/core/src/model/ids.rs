use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error type for parsing an id from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    kind: &'static str,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {} from string", self.kind)
    }
}

impl std::error::Error for ParseIdError {}

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            #[must_use]
            pub const fn value(&self) -> u64 {
                self.0
            }

            /// The id following the largest one in `existing` (1 when empty).
            #[must_use]
            pub fn next_after<'a>(existing: impl IntoIterator<Item = &'a Self>) -> Self {
                let max = existing.into_iter().map(|id| id.0).max().unwrap_or(0);
                Self(max.saturating_add(1))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<u64>().map(Self).map_err(|_| ParseIdError {
                    kind: stringify!($name),
                })
            }
        }
    };
}

numeric_id!(
    /// Registered portal account.
    UserId
);
numeric_id!(
    /// Course (batch) in the catalog.
    CourseId
);
numeric_id!(SubjectId);
numeric_id!(ChapterId);
numeric_id!(
    /// A single video lecture inside a chapter.
    LectureId
);
numeric_id!(BannerId);
numeric_id!(OrderId);
numeric_id!(QuestionId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse() {
        let id = CourseId::new(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(" 42 ".parse::<CourseId>().unwrap(), id);
        assert_eq!(format!("{id:?}"), "CourseId(42)");
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "abc".parse::<LectureId>().unwrap_err();
        assert_eq!(err.to_string(), "failed to parse LectureId from string");
    }

    #[test]
    fn next_after_picks_max_plus_one() {
        let ids = [UserId::new(3), UserId::new(9), UserId::new(1)];
        assert_eq!(UserId::next_after(&ids), UserId::new(10));
        assert_eq!(UserId::next_after(&[]), UserId::new(1));
    }

    #[test]
    fn serializes_as_plain_number() {
        let json = serde_json::to_string(&QuestionId::new(7)).unwrap();
        assert_eq!(json, "7");
        let back: QuestionId = serde_json::from_str("7").unwrap();
        assert_eq!(back, QuestionId::new(7));
    }
}
