//! Change feed: re-reads a collection on every notification and hands the
//! fresh, complete result to registered handlers.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::transport::ChangeTransport;
use super::types::ChangeStream;
use crate::error::Result;
use crate::store::QuizStore;
use crate::types::{Question, QuizMode, Response, Table, User};

type Handler<T> = Arc<dyn Fn(T) + Send + Sync>;
type Loader<T> = Arc<dyn Fn(QuizStore) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// State shared between a subscription handle and its reader tasks.
struct Shared<T> {
    handlers: RwLock<Vec<Handler<T>>>,
    closed: AtomicBool,
}

impl<T: Clone> Shared<T> {
    fn deliver(&self, value: T) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        // Snapshot so handlers may register further handlers.
        let handlers: Vec<Handler<T>> = self.handlers.read().clone();
        for handler in handlers {
            handler(value.clone());
        }
    }
}

/// Handle to a live collection subscription.
///
/// Each notification triggers an independent re-read. Reads may overlap, so
/// handlers observe results in completion order. Dropping the handle closes
/// it.
pub struct FeedSubscription<T> {
    table: Table,
    shared: Arc<Shared<T>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T> FeedSubscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn spawn(table: Table, mut stream: ChangeStream, store: QuizStore, load: Loader<T>) -> Self {
        let shared = Arc::new(Shared {
            handlers: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let listener = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                if listener.closed.load(Ordering::Acquire) {
                    break;
                }
                tracing::debug!(%table, kind = ?event.kind, "change received, re-reading");

                let shared = Arc::clone(&listener);
                let store = store.clone();
                let load = Arc::clone(&load);
                tokio::spawn(async move {
                    match load(store).await {
                        Ok(value) => shared.deliver(value),
                        Err(e) => tracing::warn!(%table, error = %e, "re-read after change failed"),
                    }
                });
            }
        });

        Self {
            table,
            shared,
            task: Mutex::new(Some(task)),
        }
    }

    /// Register a handler for every refreshed result.
    pub fn on_change<F>(&self, handler: F)
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.shared.handlers.write().push(Arc::new(handler));
    }

    pub fn table(&self) -> Table {
        self.table
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Stop listening. Safe to call any number of times.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        if let Some(task) = self.task.lock().take() {
            task.abort();
            tracing::debug!(table = %self.table, "feed subscription closed");
        }
    }
}

impl<T> Drop for FeedSubscription<T> {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Subscribes to the four collections of a [`QuizStore`].
#[derive(Clone)]
pub struct ChangeFeed {
    store: QuizStore,
    transport: Arc<dyn ChangeTransport>,
}

impl ChangeFeed {
    pub fn new(store: QuizStore, transport: Arc<dyn ChangeTransport>) -> Self {
        Self { store, transport }
    }

    async fn watch<T, F>(&self, table: Table, load: F) -> Result<FeedSubscription<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(QuizStore) -> BoxFuture<'static, Result<T>> + Send + Sync + 'static,
    {
        let stream = self.transport.watch(table).await?;
        Ok(FeedSubscription::spawn(
            table,
            stream,
            self.store.clone(),
            Arc::new(load),
        ))
    }

    /// Non-deleted questions in display order.
    pub async fn questions(&self) -> Result<FeedSubscription<Vec<Question>>> {
        self.watch(Table::Questions, |store| {
            async move { store.list_questions().await }.boxed()
        })
        .await
    }

    pub async fn quiz_mode(&self) -> Result<FeedSubscription<QuizMode>> {
        self.watch(Table::QuizMode, |store| {
            async move { store.quiz_mode().await }.boxed()
        })
        .await
    }

    /// Non-deleted users in creation order.
    pub async fn users(&self) -> Result<FeedSubscription<Vec<User>>> {
        self.watch(Table::Users, |store| {
            async move { store.list_users().await }.boxed()
        })
        .await
    }

    /// All responses in answer order.
    pub async fn responses(&self) -> Result<FeedSubscription<Vec<Response>>> {
        self.watch(Table::Responses, |store| {
            async move { store.list_responses().await }.boxed()
        })
        .await
    }

    pub async fn subscribe_questions<F>(&self, callback: F) -> Result<FeedSubscription<Vec<Question>>>
    where
        F: Fn(Vec<Question>) + Send + Sync + 'static,
    {
        let sub = self.questions().await?;
        sub.on_change(callback);
        Ok(sub)
    }

    pub async fn subscribe_quiz_mode<F>(&self, callback: F) -> Result<FeedSubscription<QuizMode>>
    where
        F: Fn(QuizMode) + Send + Sync + 'static,
    {
        let sub = self.quiz_mode().await?;
        sub.on_change(callback);
        Ok(sub)
    }

    pub async fn subscribe_users<F>(&self, callback: F) -> Result<FeedSubscription<Vec<User>>>
    where
        F: Fn(Vec<User>) + Send + Sync + 'static,
    {
        let sub = self.users().await?;
        sub.on_change(callback);
        Ok(sub)
    }

    pub async fn subscribe_responses<F>(&self, callback: F) -> Result<FeedSubscription<Vec<Response>>>
    where
        F: Fn(Vec<Response>) + Send + Sync + 'static,
    {
        let sub = self.responses().await?;
        sub.on_change(callback);
        Ok(sub)
    }
}
