//! Core types for the quiz store.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Tables exposed by the backing service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Questions,
    Users,
    Responses,
    QuizMode,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::Questions,
        Table::Users,
        Table::Responses,
        Table::QuizMode,
    ];

    /// Name of the table in the backing service.
    pub fn name(self) -> &'static str {
        match self {
            Table::Questions => "questions",
            Table::Users => "users",
            Table::Responses => "responses",
            Table::QuizMode => "quiz_mode",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifier of a question (assigned by the store).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestionId(pub String);

/// Identifier of a user (assigned by the store).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

macro_rules! string_id {
    ($ty:ident) => {
        impl $ty {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($ty), self.0)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $ty {
            fn from(s: &str) -> Self {
                $ty(s.to_string())
            }
        }

        impl From<String> for $ty {
            fn from(s: String) -> Self {
                $ty(s)
            }
        }
    };
}

string_id!(QuestionId);
string_id!(UserId);

/// A UTC instant, serialized as RFC 3339 with microsecond precision.
///
/// The fixed precision keeps serialized timestamps sortable as strings.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    /// Current time, truncated to microseconds.
    pub fn now() -> Self {
        Timestamp(truncate_micros(Utc::now()))
    }

    /// Current time, or one microsecond after `earlier` if the clock has not
    /// moved past it.
    pub fn now_after(earlier: Timestamp) -> Self {
        let now = Self::now();
        if now > earlier {
            now
        } else {
            Timestamp(earlier.0 + Duration::microseconds(1))
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| Timestamp(truncate_micros(dt.with_timezone(&Utc))))
    }

    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

fn truncate_micros(dt: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(dt.timestamp_micros()).unwrap_or(dt)
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.to_rfc3339())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Timestamp::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {s}")))
    }
}

/// One answer choice of a question.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub text: String,
    /// Public URL of an image illustrating the option.
    pub image: Option<String>,
}

impl QuestionOption {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }
}

/// A quiz question as the application sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Question {
    pub id: QuestionId,
    /// Display rank; listings are sorted by it.
    pub order: i64,
    pub text: String,
    pub images: Vec<String>,
    pub options: Vec<QuestionOption>,
    /// Index into `options`.
    pub correct_answer: usize,
    pub show_correct_answer: bool,
    pub is_active: bool,
    pub is_deleted: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Input for creating a question (before id and timestamps are assigned).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuestionDraft {
    pub order: i64,
    pub text: String,
    pub images: Vec<String>,
    pub options: Vec<QuestionOption>,
    pub correct_answer: usize,
    pub show_correct_answer: bool,
    pub is_active: bool,
}

impl QuestionDraft {
    /// Draft with the given text and options; everything else defaulted.
    pub fn new(order: i64, text: impl Into<String>, options: Vec<QuestionOption>) -> Self {
        Self {
            order,
            text: text.into(),
            images: Vec::new(),
            options,
            correct_answer: 0,
            show_correct_answer: false,
            is_active: false,
        }
    }

    pub fn with_correct_answer(mut self, index: usize) -> Self {
        self.correct_answer = index;
        self
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    pub fn active(mut self) -> Self {
        self.is_active = true;
        self
    }
}

/// Sparse update of a question. `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuestionPatch {
    pub order: Option<i64>,
    pub text: Option<String>,
    pub images: Option<Vec<String>>,
    pub options: Option<Vec<QuestionOption>>,
    pub correct_answer: Option<usize>,
    pub show_correct_answer: Option<bool>,
    pub is_active: Option<bool>,
    pub is_deleted: Option<bool>,
}

impl QuestionPatch {
    pub fn is_empty(&self) -> bool {
        *self == QuestionPatch::default()
    }
}

/// State of the singleton quiz-mode record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QuizMode {
    pub is_active: bool,
    pub started_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
}

/// A participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub is_deleted: bool,
    pub created_at: Timestamp,
}

/// Sparse update of a user.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserPatch {
    pub name: Option<String>,
    pub is_deleted: Option<bool>,
}

/// The latest answer of one user to one question.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub user_id: UserId,
    pub question_id: QuestionId,
    pub selected_answer: usize,
    /// Fixed when the answer is saved; not re-evaluated if the question changes.
    pub is_correct: bool,
    pub answered_at: Timestamp,
}

/// Per-user aggregate computed from responses. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserStats {
    pub user_id: UserId,
    pub user_name: String,
    pub correct_count: usize,
    pub total_answered: usize,
    /// Whole percentage, rounded to nearest.
    pub accuracy: u32,
    pub last_answered_at: Option<Timestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_roundtrip() {
        let ts = Timestamp::now();
        let json = serde_json::to_string(&ts).unwrap();
        let parsed: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(ts, parsed);
    }

    #[test]
    fn test_timestamp_accepts_offset_form() {
        let ts = Timestamp::parse("2024-05-01T09:30:00.5+09:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-05-01T00:30:00.500000Z");
    }

    #[test]
    fn test_timestamp_strings_sort_like_instants() {
        let a = Timestamp::parse("2024-05-01T00:00:00Z").unwrap();
        let b = Timestamp::parse("2024-05-01T00:00:00.000001Z").unwrap();
        assert!(a < b);
        assert!(a.to_rfc3339() < b.to_rfc3339());
    }

    #[test]
    fn test_now_after_is_strictly_later() {
        let future = Timestamp(Utc::now() + Duration::hours(1));
        assert!(Timestamp::now_after(future) > future);

        let past = Timestamp::parse("2000-01-01T00:00:00Z").unwrap();
        assert!(Timestamp::now_after(past) > past);
    }

    #[test]
    fn test_table_names() {
        assert_eq!(Table::Questions.name(), "questions");
        assert_eq!(Table::QuizMode.to_string(), "quiz_mode");
    }

    #[test]
    fn test_empty_patch() {
        assert!(QuestionPatch::default().is_empty());
        let patch = QuestionPatch {
            text: Some("X".into()),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }
}
