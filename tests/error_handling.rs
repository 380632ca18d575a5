//! Error handling and edge case tests.

use quiz_store::{
    Backend, MemoryBackend, QuestionDraft, QuestionId, QuestionOption, QuestionPatch, QuizStore,
    StoreError, Table, UserId, UserPatch,
};
use serde_json::json;
use std::sync::Arc;

fn test_store() -> (QuizStore, Arc<MemoryBackend>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let backend = Arc::new(MemoryBackend::new());
    (QuizStore::new(backend.clone()), backend)
}

fn two_options() -> Vec<QuestionOption> {
    vec![QuestionOption::text("yes"), QuestionOption::text("no")]
}

// --- Validation ---

#[tokio::test]
async fn test_correct_answer_out_of_range() {
    let (store, backend) = test_store();

    let result = store
        .create_question(QuestionDraft::new(1, "q", two_options()).with_correct_answer(2))
        .await;
    assert!(matches!(result, Err(StoreError::InvalidOperation(_))));
    assert_eq!(backend.row_count(Table::Questions), 0);
}

#[tokio::test]
async fn test_update_validates_options_with_answer() {
    let (store, _) = test_store();
    let question = store
        .create_question(QuestionDraft::new(1, "q", two_options()).with_correct_answer(1))
        .await
        .unwrap();

    let result = store
        .update_question(
            &question.id,
            QuestionPatch {
                options: Some(vec![QuestionOption::text("only")]),
                correct_answer: Some(1),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(StoreError::InvalidOperation(_))));

    // Untouched after the rejected update.
    let current = store.get_question(&question.id).await.unwrap().unwrap();
    assert_eq!(current, question);
}

// --- Not found ---

#[tokio::test]
async fn test_update_missing_question() {
    let (store, _) = test_store();
    let result = store
        .update_question(
            &QuestionId::from("missing"),
            QuestionPatch {
                text: Some("x".into()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(
        result,
        Err(StoreError::NotFound { table: Table::Questions, ref key }) if key == "missing"
    ));
}

#[tokio::test]
async fn test_delete_missing_question() {
    let (store, _) = test_store();
    let result = store.delete_question(&QuestionId::from("missing")).await;
    assert!(matches!(result, Err(StoreError::NotFound { .. })));
}

#[tokio::test]
async fn test_update_missing_user() {
    let (store, _) = test_store();
    let id = UserId::from("missing");

    let result = store
        .update_user(
            &id,
            UserPatch {
                name: Some("x".into()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(StoreError::NotFound { table: Table::Users, .. })));

    let result = store.update_user(&id, UserPatch::default()).await;
    assert!(matches!(result, Err(StoreError::NotFound { .. })));
}

#[tokio::test]
async fn test_lookups_return_none_not_errors() {
    let (store, _) = test_store();
    assert!(store.get_user(&UserId::from("nope")).await.unwrap().is_none());
    assert!(store.get_user_by_name("nope").await.unwrap().is_none());
    assert!(store.list_questions().await.unwrap().is_empty());
    assert!(store.list_users().await.unwrap().is_empty());
    assert!(store.list_responses().await.unwrap().is_empty());
    assert!(store.user_stats().await.unwrap().is_empty());
}

// --- Backend failures ---

#[tokio::test]
async fn test_connection_errors_propagate() {
    let (store, backend) = test_store();
    backend.set_offline(true);

    assert!(matches!(store.list_questions().await, Err(StoreError::Connection(_))));
    assert!(matches!(
        store.get_question(&QuestionId::from("q")).await,
        Err(StoreError::Connection(_))
    ));
    assert!(matches!(store.quiz_mode().await, Err(StoreError::Connection(_))));
    assert!(matches!(store.create_user("x").await, Err(StoreError::Connection(_))));
    assert!(matches!(store.user_stats().await, Err(StoreError::Connection(_))));

    backend.set_offline(false);
    assert!(store.list_questions().await.is_ok());
}

#[tokio::test]
async fn test_duplicate_insert_conflicts() {
    let (_, backend) = test_store();
    let row = json!({"id": "fixed", "name": "a", "is_deleted": false});

    backend.insert(Table::Users, row.clone()).await.unwrap();
    let err = backend.insert(Table::Users, row).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(backend.row_count(Table::Users), 1);
}

#[tokio::test]
async fn test_malformed_row_is_deserialization_error() {
    let (store, backend) = test_store();
    backend
        .insert(
            Table::Questions,
            json!({
                "order_num": 1,
                "text": "broken",
                "options": "not a list",
                "correct_answer": 0,
                "is_deleted": false,
            }),
        )
        .await
        .unwrap();

    assert!(matches!(
        store.list_questions().await,
        Err(StoreError::Deserialization(_))
    ));
}

#[tokio::test]
async fn test_non_object_row_rejected() {
    let (_, backend) = test_store();
    let result = backend.insert(Table::Users, json!(["not", "a", "row"])).await;
    assert!(matches!(result, Err(StoreError::Rejected { .. })));
}
