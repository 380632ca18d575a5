//! Change notification types.

use crate::types::Table;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// What happened to a row, when the transport knows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// The transport saw a difference but not which kind.
    Unknown,
}

/// A notification that a watched table changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(table: Table, kind: ChangeKind) -> Self {
        Self { table, kind }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Receiving end of a table watch.
///
/// Closing or dropping the stream ends delivery; the sending side notices
/// on its next send and releases its resources.
pub struct ChangeStream {
    pub id: SubscriptionId,
    pub table: Table,
    receiver: mpsc::Receiver<ChangeEvent>,
}

impl ChangeStream {
    pub fn new(id: SubscriptionId, table: Table, receiver: mpsc::Receiver<ChangeEvent>) -> Self {
        Self {
            id,
            table,
            receiver,
        }
    }

    /// Wait for the next notification. `None` once the source is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    /// Take a notification if one is queued.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.try_recv().ok()
    }

    /// Stop accepting notifications.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

impl std::fmt::Debug for ChangeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStream")
            .field("id", &self.id)
            .field("table", &self.table)
            .finish()
    }
}
