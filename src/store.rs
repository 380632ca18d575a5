//! Typed record operations over questions, users, responses and quiz mode.

use serde_json::Value;
use std::sync::Arc;

use crate::backend::Backend;
use crate::error::{Result, StoreError};
use crate::records::{
    columns as col, decode_question, decode_quiz_mode, decode_response, decode_user,
    question_patch, to_row, user_patch, Filter, Query, QuestionRow, QuizModeRow, ResponseRow,
    UpsertMode, UserRow, QUIZ_MODE_ID,
};
use crate::stats::compute_user_stats;
use crate::types::{
    Question, QuestionDraft, QuestionId, QuestionOption, QuestionPatch, QuizMode, Response,
    Table, Timestamp, User, UserId, UserPatch, UserStats,
};

/// Check that `correct_answer` indexes into `options`.
fn check_answer_index(options: &[QuestionOption], correct_answer: usize) -> Result<()> {
    if correct_answer < options.len() {
        Ok(())
    } else {
        Err(StoreError::InvalidOperation(format!(
            "correct answer {correct_answer} is out of range for {} options",
            options.len()
        )))
    }
}

/// Record store for the quiz.
///
/// Cheap to clone; every clone shares the same backend. All reads that list
/// or look up questions and users skip soft-deleted rows.
#[derive(Clone)]
pub struct QuizStore {
    backend: Arc<dyn Backend>,
}

impl QuizStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    async fn first(&self, table: Table, query: Query) -> Result<Option<Value>> {
        Ok(self.backend.select(table, &query.limit(1)).await?.into_iter().next())
    }

    // --- Questions ---

    /// Insert a question. It always starts out not deleted.
    pub async fn create_question(&self, draft: QuestionDraft) -> Result<Question> {
        check_answer_index(&draft.options, draft.correct_answer)?;
        let row = self
            .backend
            .insert(Table::Questions, QuestionRow::insert(&draft)?)
            .await?;
        let question = decode_question(row)?;
        tracing::debug!(id = %question.id, order = question.order, "question created");
        Ok(question)
    }

    /// Non-deleted questions by `order`, ascending.
    pub async fn list_questions(&self) -> Result<Vec<Question>> {
        let query = Query::new()
            .eq(col::IS_DELETED, false)
            .order_asc(col::ORDER_NUM);
        self.backend
            .select(Table::Questions, &query)
            .await?
            .into_iter()
            .map(decode_question)
            .collect()
    }

    /// A non-deleted question, or `None`.
    pub async fn get_question(&self, id: &QuestionId) -> Result<Option<Question>> {
        let query = Query::new()
            .eq(col::ID, id.as_str())
            .eq(col::IS_DELETED, false);
        self.first(Table::Questions, query)
            .await?
            .map(decode_question)
            .transpose()
    }

    /// Apply the fields present in `patch` and refresh `updated_at`.
    ///
    /// Addresses the row by id alone, so a deleted question can be restored
    /// with `is_deleted: Some(false)`.
    pub async fn update_question(&self, id: &QuestionId, patch: QuestionPatch) -> Result<Question> {
        if let (Some(options), Some(correct)) = (&patch.options, patch.correct_answer) {
            check_answer_index(options, correct)?;
        }
        let changes = question_patch(&patch, Timestamp::now())?;
        let rows = self
            .backend
            .update(Table::Questions, &[Filter::eq(col::ID, id.as_str())], changes)
            .await?;
        let row = rows.into_iter().next().ok_or_else(|| StoreError::NotFound {
            table: Table::Questions,
            key: id.to_string(),
        })?;
        decode_question(row)
    }

    /// Soft delete: the row stays, flagged `is_deleted`.
    pub async fn delete_question(&self, id: &QuestionId) -> Result<Question> {
        self.update_question(
            id,
            QuestionPatch {
                is_deleted: Some(true),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn set_question_active(&self, id: &QuestionId, is_active: bool) -> Result<Question> {
        self.update_question(
            id,
            QuestionPatch {
                is_active: Some(is_active),
                ..Default::default()
            },
        )
        .await
    }

    // --- Quiz mode ---

    async fn read_quiz_mode(&self) -> Result<Option<QuizMode>> {
        let query = Query::new().eq(col::ID, QUIZ_MODE_ID);
        self.first(Table::QuizMode, query)
            .await?
            .map(decode_quiz_mode)
            .transpose()
    }

    /// Current quiz mode. The first read on an empty store persists the
    /// inactive default; concurrent first reads settle on a single row.
    pub async fn quiz_mode(&self) -> Result<QuizMode> {
        if let Some(mode) = self.read_quiz_mode().await? {
            return Ok(mode);
        }

        let default_row = to_row(QuizModeRow::from(QuizMode::default()))?;
        let inserted = self
            .backend
            .upsert(
                Table::QuizMode,
                default_row,
                QuizModeRow::KEY,
                UpsertMode::IgnoreDuplicates,
            )
            .await?;
        if !inserted.is_empty() {
            tracing::info!("quiz mode initialized");
        }

        Ok(self.read_quiz_mode().await?.unwrap_or_default())
    }

    /// Replace the quiz mode row.
    pub async fn set_quiz_mode(&self, mode: QuizMode) -> Result<QuizMode> {
        let row = to_row(QuizModeRow::from(mode))?;
        let written = self
            .backend
            .upsert(Table::QuizMode, row, QuizModeRow::KEY, UpsertMode::Merge)
            .await?;
        match written.into_iter().next() {
            Some(row) => decode_quiz_mode(row),
            None => Ok(mode),
        }
    }

    pub async fn start_quiz(&self) -> Result<QuizMode> {
        let mode = self
            .set_quiz_mode(QuizMode {
                is_active: true,
                started_at: Some(Timestamp::now()),
                ended_at: None,
            })
            .await?;
        tracing::info!(started_at = ?mode.started_at, "quiz started");
        Ok(mode)
    }

    /// Deactivate the quiz, keeping `started_at`.
    pub async fn end_quiz(&self) -> Result<QuizMode> {
        let current = self.quiz_mode().await?;
        let ended_at = match current.started_at {
            Some(started) => Timestamp::now_after(started),
            None => Timestamp::now(),
        };
        let mode = self
            .set_quiz_mode(QuizMode {
                is_active: false,
                started_at: current.started_at,
                ended_at: Some(ended_at),
            })
            .await?;
        tracing::info!(ended_at = %ended_at, "quiz ended");
        Ok(mode)
    }

    // --- Users ---

    pub async fn create_user(&self, name: &str) -> Result<User> {
        let row = self
            .backend
            .insert(Table::Users, UserRow::insert(name))
            .await?;
        decode_user(row)
    }

    /// Non-deleted users by creation time, ascending.
    pub async fn list_users(&self) -> Result<Vec<User>> {
        let query = Query::new()
            .eq(col::IS_DELETED, false)
            .order_asc(col::CREATED_AT);
        self.backend
            .select(Table::Users, &query)
            .await?
            .into_iter()
            .map(decode_user)
            .collect()
    }

    pub async fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        let query = Query::new()
            .eq(col::ID, id.as_str())
            .eq(col::IS_DELETED, false);
        self.first(Table::Users, query).await?.map(decode_user).transpose()
    }

    /// Oldest non-deleted user with this exact name.
    pub async fn get_user_by_name(&self, name: &str) -> Result<Option<User>> {
        let query = Query::new()
            .eq(col::NAME, name)
            .eq(col::IS_DELETED, false)
            .order_asc(col::CREATED_AT);
        self.first(Table::Users, query).await?.map(decode_user).transpose()
    }

    pub async fn update_user(&self, id: &UserId, patch: UserPatch) -> Result<User> {
        let changes = user_patch(&patch);
        if changes.is_empty() {
            return self
                .first(Table::Users, Query::new().eq(col::ID, id.as_str()))
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    table: Table::Users,
                    key: id.to_string(),
                })
                .and_then(decode_user);
        }
        let rows = self
            .backend
            .update(Table::Users, &[Filter::eq(col::ID, id.as_str())], changes)
            .await?;
        let row = rows.into_iter().next().ok_or_else(|| StoreError::NotFound {
            table: Table::Users,
            key: id.to_string(),
        })?;
        decode_user(row)
    }

    pub async fn delete_user(&self, id: &UserId) -> Result<User> {
        self.update_user(
            id,
            UserPatch {
                is_deleted: Some(true),
                ..Default::default()
            },
        )
        .await
    }

    // --- Responses ---

    /// Record a user's answer, replacing any earlier answer to the same
    /// question. Correctness is decided here, once.
    pub async fn save_response(
        &self,
        user_id: &UserId,
        question_id: &QuestionId,
        selected_answer: usize,
        correct_answer: usize,
    ) -> Result<Response> {
        let response = Response {
            user_id: user_id.clone(),
            question_id: question_id.clone(),
            selected_answer,
            is_correct: selected_answer == correct_answer,
            answered_at: Timestamp::now(),
        };
        let row = to_row(ResponseRow::from(response.clone()))?;
        let written = self
            .backend
            .upsert(Table::Responses, row, ResponseRow::KEY, UpsertMode::Merge)
            .await?;
        tracing::debug!(
            user = %user_id,
            question = %question_id,
            correct = response.is_correct,
            "response saved"
        );
        match written.into_iter().next() {
            Some(row) => decode_response(row),
            None => Ok(response),
        }
    }

    /// One user's responses by answer time, ascending.
    pub async fn list_responses_for_user(&self, user_id: &UserId) -> Result<Vec<Response>> {
        let query = Query::new()
            .eq(col::USER_ID, user_id.as_str())
            .order_asc(col::ANSWERED_AT);
        self.backend
            .select(Table::Responses, &query)
            .await?
            .into_iter()
            .map(decode_response)
            .collect()
    }

    /// Every response by answer time, ascending.
    pub async fn list_responses(&self) -> Result<Vec<Response>> {
        let query = Query::new().order_asc(col::ANSWERED_AT);
        self.backend
            .select(Table::Responses, &query)
            .await?
            .into_iter()
            .map(decode_response)
            .collect()
    }

    // --- Statistics ---

    /// Per-user statistics over the current responses and users.
    pub async fn user_stats(&self) -> Result<Vec<UserStats>> {
        let (responses, users) = tokio::try_join!(self.list_responses(), self.list_users())?;
        Ok(compute_user_stats(&users, &responses))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_index_check() {
        let options = vec![QuestionOption::text("a"), QuestionOption::text("b")];
        assert!(check_answer_index(&options, 1).is_ok());
        assert!(matches!(
            check_answer_index(&options, 2),
            Err(StoreError::InvalidOperation(_))
        ));
        assert!(check_answer_index(&[], 0).is_err());
    }
}
