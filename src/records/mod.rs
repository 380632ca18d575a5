//! Row shapes and query vocabulary of the backing service.
//!
//! The service stores snake_case columns (`order_num`, `is_deleted`, ...)
//! while the application works with the entity types in [`crate::types`].
//! Every entity has a row type here and a pair of total conversions.

mod query;
mod rows;

pub use query::{Filter, Order, Query, UpsertMode};
pub use rows::{
    columns, decode_question, decode_quiz_mode, decode_response, decode_user, question_patch,
    to_row, user_patch, QuestionRow, QuizModeRow, ResponseRow, UserRow, QUIZ_MODE_ID,
};
