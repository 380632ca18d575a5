//! Sources of change notifications.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::manager::DEFAULT_BUFFER_SIZE;
use super::types::{ChangeEvent, ChangeKind, ChangeStream, SubscriptionId};
use crate::backend::Backend;
use crate::error::Result;
use crate::records::Query;
use crate::types::Table;

/// Something that can tell when a table changed.
///
/// Push backends forward server events; [`PollingTransport`] works with any
/// [`Backend`] by comparing snapshots.
#[async_trait]
pub trait ChangeTransport: Send + Sync {
    async fn watch(&self, table: Table) -> Result<ChangeStream>;
}

/// Detects changes by re-reading a table on a fixed interval.
pub struct PollingTransport {
    backend: Arc<dyn Backend>,
    interval: Duration,
    next_id: AtomicU64,
}

impl PollingTransport {
    pub fn new(backend: Arc<dyn Backend>, interval: Duration) -> Self {
        Self {
            backend,
            interval: interval.max(Duration::from_millis(10)),
            next_id: AtomicU64::new(1),
        }
    }
}

/// Order-insensitive fingerprint of a table snapshot.
fn fingerprint(rows: &[Value]) -> Vec<String> {
    let mut keys: Vec<String> = rows.iter().map(Value::to_string).collect();
    keys.sort_unstable();
    keys
}

#[async_trait]
impl ChangeTransport for PollingTransport {
    async fn watch(&self, table: Table) -> Result<ChangeStream> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let baseline = self.backend.select(table, &Query::new()).await?;
        let (sender, receiver) = mpsc::channel(DEFAULT_BUFFER_SIZE);

        let backend = Arc::clone(&self.backend);
        let interval = self.interval;

        tokio::spawn(async move {
            let mut last = fingerprint(&baseline);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = sender.closed() => break,
                    _ = ticker.tick() => {}
                }

                let rows = match backend.select(table, &Query::new()).await {
                    Ok(rows) => rows,
                    Err(e) => {
                        tracing::warn!(%table, error = %e, "poll failed");
                        continue;
                    }
                };

                let current = fingerprint(&rows);
                if current == last {
                    continue;
                }
                last = current;

                match sender.try_send(ChangeEvent::new(table, ChangeKind::Unknown)) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Closed(_)) => break,
                }
            }

            tracing::debug!(subscription = id.0, %table, "poller stopped");
        });

        Ok(ChangeStream::new(id, table, receiver))
    }
}

/// Watches through `primary`, switching to `fallback` for any table the
/// primary cannot watch.
pub struct FallbackTransport {
    primary: Arc<dyn ChangeTransport>,
    fallback: Arc<dyn ChangeTransport>,
}

impl FallbackTransport {
    pub fn new(primary: Arc<dyn ChangeTransport>, fallback: Arc<dyn ChangeTransport>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl ChangeTransport for FallbackTransport {
    async fn watch(&self, table: Table) -> Result<ChangeStream> {
        match self.primary.watch(table).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                tracing::warn!(%table, error = %e, "push channel unavailable, falling back");
                self.fallback.watch(table).await
            }
        }
    }
}
