//! Change feed tests: push notifications from the memory backend and
//! snapshot polling.

use quiz_store::{
    ChangeFeed, ChangeTransport, MemoryBackend, PollingTransport, QuestionDraft, QuestionOption,
    QuizStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn setup() -> (QuizStore, ChangeFeed, Arc<MemoryBackend>) {
    init_tracing();
    let backend = Arc::new(MemoryBackend::new());
    let store = QuizStore::new(backend.clone());
    let feed = ChangeFeed::new(store.clone(), backend.clone());
    (store, feed, backend)
}

fn draft(order: i64, text: &str) -> QuestionDraft {
    QuestionDraft::new(
        order,
        text,
        vec![QuestionOption::text("a"), QuestionOption::text("b")],
    )
}

/// Receive until `done` holds for a delivered value.
async fn wait_for<T>(rx: &mut UnboundedReceiver<T>, done: impl Fn(&T) -> bool) -> T {
    timeout(WAIT, async {
        loop {
            let value = rx.recv().await.expect("feed closed");
            if done(&value) {
                return value;
            }
        }
    })
    .await
    .expect("timed out waiting for change")
}

#[tokio::test]
async fn test_question_changes_deliver_full_list() {
    let (store, feed, _) = setup();
    let (tx, mut rx) = unbounded_channel();
    let sub = feed
        .subscribe_questions(move |questions| {
            let _ = tx.send(questions);
        })
        .await
        .unwrap();

    let second = store.create_question(draft(2, "second")).await.unwrap();
    let first = store.create_question(draft(1, "first")).await.unwrap();

    let listed = wait_for(&mut rx, |qs| qs.len() == 2).await;
    assert_eq!(listed[0].id, first.id);
    assert_eq!(listed[1].id, second.id);

    store.delete_question(&first.id).await.unwrap();
    let listed = wait_for(&mut rx, |qs| qs.len() == 1).await;
    assert_eq!(listed[0].id, second.id);

    sub.close();
}

#[tokio::test]
async fn test_quiz_mode_feed() {
    let (store, feed, _) = setup();
    let (tx, mut rx) = unbounded_channel();
    let _sub = feed
        .subscribe_quiz_mode(move |mode| {
            let _ = tx.send(mode);
        })
        .await
        .unwrap();

    store.start_quiz().await.unwrap();
    let mode = wait_for(&mut rx, |m| m.is_active).await;
    assert!(mode.started_at.is_some());

    store.end_quiz().await.unwrap();
    let mode = wait_for(&mut rx, |m| !m.is_active && m.ended_at.is_some()).await;
    assert!(mode.started_at < mode.ended_at);
}

#[tokio::test]
async fn test_users_and_responses_feeds() {
    let (store, feed, _) = setup();

    let (user_tx, mut user_rx) = unbounded_channel();
    let _users = feed
        .subscribe_users(move |users| {
            let _ = user_tx.send(users);
        })
        .await
        .unwrap();

    let (resp_tx, mut resp_rx) = unbounded_channel();
    let _responses = feed
        .subscribe_responses(move |responses| {
            let _ = resp_tx.send(responses);
        })
        .await
        .unwrap();

    let user = store.create_user("kai").await.unwrap();
    let users = wait_for(&mut user_rx, |u| !u.is_empty()).await;
    assert_eq!(users[0].id, user.id);

    store
        .save_response(&user.id, &"q1".into(), 1, 1)
        .await
        .unwrap();
    let responses = wait_for(&mut resp_rx, |r| !r.is_empty()).await;
    assert_eq!(responses.len(), 1);
    assert!(responses[0].is_correct);
}

#[tokio::test]
async fn test_several_handlers_on_one_subscription() {
    let (store, feed, _) = setup();
    let sub = feed.users().await.unwrap();

    let (tx_a, mut rx_a) = unbounded_channel();
    let (tx_b, mut rx_b) = unbounded_channel();
    sub.on_change(move |users| {
        let _ = tx_a.send(users.len());
    });
    sub.on_change(move |users| {
        let _ = tx_b.send(users.len());
    });

    store.create_user("a").await.unwrap();
    assert_eq!(wait_for(&mut rx_a, |n| *n == 1).await, 1);
    assert_eq!(wait_for(&mut rx_b, |n| *n == 1).await, 1);
}

#[tokio::test]
async fn test_close_is_idempotent_and_stops_delivery() {
    let (store, feed, backend) = setup();
    let (tx, mut rx) = unbounded_channel();
    let sub = feed
        .subscribe_users(move |users| {
            let _ = tx.send(users.len());
        })
        .await
        .unwrap();
    assert_eq!(backend.watcher_count(), 1);

    sub.close();
    sub.close();
    assert!(sub.is_closed());

    // Let the aborted listener wind down, then write.
    tokio::time::sleep(Duration::from_millis(50)).await;
    store.create_user("late").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(rx.try_recv().is_err());
    // The broadcaster prunes the dead watcher on publish.
    assert_eq!(backend.watcher_count(), 0);
}

#[tokio::test]
async fn test_close_without_any_notification() {
    let (_, feed, _) = setup();
    let sub = feed.questions().await.unwrap();
    sub.close();
    sub.close();
    assert!(sub.is_closed());
}

#[tokio::test]
async fn test_drop_closes_subscription() {
    let (store, feed, backend) = setup();
    let sub = feed.questions().await.unwrap();
    drop(sub);

    tokio::time::sleep(Duration::from_millis(50)).await;
    store.create_question(draft(1, "q")).await.unwrap();
    assert_eq!(backend.watcher_count(), 0);
}

#[tokio::test]
async fn test_watch_fails_when_offline() {
    let (_, feed, backend) = setup();
    backend.set_offline(true);
    assert!(feed.questions().await.is_err());
}

#[tokio::test]
async fn test_polling_transport_detects_changes() {
    init_tracing();
    let backend = Arc::new(MemoryBackend::new());
    let store = QuizStore::new(backend.clone());
    let transport: Arc<dyn ChangeTransport> =
        Arc::new(PollingTransport::new(backend.clone(), Duration::from_millis(20)));
    let feed = ChangeFeed::new(store.clone(), transport);

    let (tx, mut rx) = unbounded_channel();
    let sub = feed
        .subscribe_questions(move |questions| {
            let _ = tx.send(questions);
        })
        .await
        .unwrap();

    let created = store.create_question(draft(1, "polled")).await.unwrap();
    let listed = wait_for(&mut rx, |qs| qs.len() == 1).await;
    assert_eq!(listed[0].id, created.id);

    store.set_question_active(&created.id, true).await.unwrap();
    let listed = wait_for(&mut rx, |qs| qs.first().map_or(false, |q| q.is_active)).await;
    assert_eq!(listed.len(), 1);

    sub.close();
}
