//! Row types and the conversions between rows and entities.

use crate::error::{Result, StoreError};
use crate::types::{
    Question, QuestionDraft, QuestionId, QuestionOption, QuestionPatch, QuizMode, Response,
    Timestamp, User, UserId, UserPatch,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Fixed key of the single quiz-mode row.
pub const QUIZ_MODE_ID: i64 = 1;

/// Column names used in filters, ordering and conflict targets.
pub mod columns {
    pub const ID: &str = "id";
    pub const ORDER_NUM: &str = "order_num";
    pub const TEXT: &str = "text";
    pub const IMAGES: &str = "images";
    pub const OPTIONS: &str = "options";
    pub const CORRECT_ANSWER: &str = "correct_answer";
    pub const SHOW_CORRECT_ANSWER: &str = "show_correct_answer";
    pub const IS_ACTIVE: &str = "is_active";
    pub const IS_DELETED: &str = "is_deleted";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
    pub const NAME: &str = "name";
    pub const USER_ID: &str = "user_id";
    pub const QUESTION_ID: &str = "question_id";
    pub const SELECTED_ANSWER: &str = "selected_answer";
    pub const IS_CORRECT: &str = "is_correct";
    pub const ANSWERED_AT: &str = "answered_at";
    pub const STARTED_AT: &str = "started_at";
    pub const ENDED_AT: &str = "ended_at";
}

use columns as col;

/// Encode a value for writing. Failures here are always `Serialization`,
/// whatever category serde_json reports.
pub fn to_row<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

// --- Questions ---

/// A row of the `questions` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestionRow {
    pub id: String,
    pub order_num: i64,
    pub text: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub images: Vec<String>,
    pub options: Vec<QuestionOption>,
    pub correct_answer: usize,
    pub show_correct_answer: bool,
    pub is_active: bool,
    pub is_deleted: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<QuestionRow> for Question {
    fn from(row: QuestionRow) -> Self {
        Question {
            id: QuestionId(row.id),
            order: row.order_num,
            text: row.text,
            images: row.images,
            options: row.options,
            correct_answer: row.correct_answer,
            show_correct_answer: row.show_correct_answer,
            is_active: row.is_active,
            is_deleted: row.is_deleted,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<Question> for QuestionRow {
    fn from(q: Question) -> Self {
        QuestionRow {
            id: q.id.0,
            order_num: q.order,
            text: q.text,
            images: q.images,
            options: q.options,
            correct_answer: q.correct_answer,
            show_correct_answer: q.show_correct_answer,
            is_active: q.is_active,
            is_deleted: q.is_deleted,
            created_at: q.created_at,
            updated_at: q.updated_at,
        }
    }
}

impl QuestionRow {
    /// Columns written when a draft is inserted. The store assigns the rest.
    pub fn insert(draft: &QuestionDraft) -> Result<Value> {
        let mut row = Map::new();
        row.insert(col::ORDER_NUM.into(), Value::from(draft.order));
        row.insert(col::TEXT.into(), Value::from(draft.text.clone()));
        row.insert(col::IMAGES.into(), to_row(&draft.images)?);
        row.insert(col::OPTIONS.into(), to_row(&draft.options)?);
        row.insert(col::CORRECT_ANSWER.into(), Value::from(draft.correct_answer));
        row.insert(
            col::SHOW_CORRECT_ANSWER.into(),
            Value::from(draft.show_correct_answer),
        );
        row.insert(col::IS_ACTIVE.into(), Value::from(draft.is_active));
        row.insert(col::IS_DELETED.into(), Value::from(false));
        Ok(Value::Object(row))
    }
}

/// Columns to write for a sparse question update, plus `updated_at`.
pub fn question_patch(patch: &QuestionPatch, updated_at: Timestamp) -> Result<Map<String, Value>> {
    let mut changes = Map::new();
    if let Some(order) = patch.order {
        changes.insert(col::ORDER_NUM.into(), Value::from(order));
    }
    if let Some(text) = &patch.text {
        changes.insert(col::TEXT.into(), Value::from(text.clone()));
    }
    if let Some(images) = &patch.images {
        changes.insert(col::IMAGES.into(), to_row(images)?);
    }
    if let Some(options) = &patch.options {
        changes.insert(col::OPTIONS.into(), to_row(options)?);
    }
    if let Some(correct) = patch.correct_answer {
        changes.insert(col::CORRECT_ANSWER.into(), Value::from(correct));
    }
    if let Some(show) = patch.show_correct_answer {
        changes.insert(col::SHOW_CORRECT_ANSWER.into(), Value::from(show));
    }
    if let Some(active) = patch.is_active {
        changes.insert(col::IS_ACTIVE.into(), Value::from(active));
    }
    if let Some(deleted) = patch.is_deleted {
        changes.insert(col::IS_DELETED.into(), Value::from(deleted));
    }
    changes.insert(col::UPDATED_AT.into(), to_row(updated_at)?);
    Ok(changes)
}

pub fn decode_question(row: Value) -> Result<Question> {
    Ok(serde_json::from_value::<QuestionRow>(row)?.into())
}

// --- Users ---

/// A row of the `users` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub is_deleted: bool,
    pub created_at: Timestamp,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId(row.id),
            name: row.name,
            is_deleted: row.is_deleted,
            created_at: row.created_at,
        }
    }
}

impl From<User> for UserRow {
    fn from(user: User) -> Self {
        UserRow {
            id: user.id.0,
            name: user.name,
            is_deleted: user.is_deleted,
            created_at: user.created_at,
        }
    }
}

impl UserRow {
    pub fn insert(name: &str) -> Value {
        let mut row = Map::new();
        row.insert(col::NAME.into(), Value::from(name));
        row.insert(col::IS_DELETED.into(), Value::from(false));
        Value::Object(row)
    }
}

/// Columns to write for a sparse user update.
pub fn user_patch(patch: &UserPatch) -> Map<String, Value> {
    let mut changes = Map::new();
    if let Some(name) = &patch.name {
        changes.insert(col::NAME.into(), Value::from(name.clone()));
    }
    if let Some(deleted) = patch.is_deleted {
        changes.insert(col::IS_DELETED.into(), Value::from(deleted));
    }
    changes
}

pub fn decode_user(row: Value) -> Result<User> {
    Ok(serde_json::from_value::<UserRow>(row)?.into())
}

// --- Responses ---

/// A row of the `responses` table, unique on `(user_id, question_id)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseRow {
    pub user_id: String,
    pub question_id: String,
    pub selected_answer: usize,
    pub is_correct: bool,
    pub answered_at: Timestamp,
}

impl ResponseRow {
    /// Conflict target for upserts.
    pub const KEY: &'static [&'static str] = &[col::USER_ID, col::QUESTION_ID];
}

impl From<ResponseRow> for Response {
    fn from(row: ResponseRow) -> Self {
        Response {
            user_id: UserId(row.user_id),
            question_id: QuestionId(row.question_id),
            selected_answer: row.selected_answer,
            is_correct: row.is_correct,
            answered_at: row.answered_at,
        }
    }
}

impl From<Response> for ResponseRow {
    fn from(r: Response) -> Self {
        ResponseRow {
            user_id: r.user_id.0,
            question_id: r.question_id.0,
            selected_answer: r.selected_answer,
            is_correct: r.is_correct,
            answered_at: r.answered_at,
        }
    }
}

pub fn decode_response(row: Value) -> Result<Response> {
    Ok(serde_json::from_value::<ResponseRow>(row)?.into())
}

// --- Quiz mode ---

/// The single row of the `quiz_mode` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuizModeRow {
    pub id: i64,
    pub is_active: bool,
    pub started_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
}

impl QuizModeRow {
    pub const KEY: &'static [&'static str] = &[col::ID];
}

impl From<QuizModeRow> for QuizMode {
    fn from(row: QuizModeRow) -> Self {
        QuizMode {
            is_active: row.is_active,
            started_at: row.started_at,
            ended_at: row.ended_at,
        }
    }
}

impl From<QuizMode> for QuizModeRow {
    fn from(mode: QuizMode) -> Self {
        QuizModeRow {
            id: QUIZ_MODE_ID,
            is_active: mode.is_active,
            started_at: mode.started_at,
            ended_at: mode.ended_at,
        }
    }
}

pub fn decode_quiz_mode(row: Value) -> Result<QuizMode> {
    Ok(serde_json::from_value::<QuizModeRow>(row)?.into())
}
