//! Broadcaster fanning change events out to table watchers.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::types::{ChangeEvent, ChangeStream, SubscriptionId};
use crate::types::Table;

/// Default number of queued notifications per watcher.
pub const DEFAULT_BUFFER_SIZE: usize = 64;

/// Internal subscription state.
struct Subscriber {
    table: Table,
    sender: mpsc::Sender<ChangeEvent>,
}

/// Outcome of offering an event to one subscriber.
enum Delivery {
    Sent,
    /// Buffer full. The queued events already guarantee a refresh.
    Coalesced,
    Gone,
}

impl Subscriber {
    fn try_send(&self, event: ChangeEvent) -> Delivery {
        match self.sender.try_send(event) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => Delivery::Coalesced,
            Err(TrySendError::Closed(_)) => Delivery::Gone,
        }
    }
}

/// Registry of table watchers for a push-capable backend.
pub struct ChangeBroadcaster {
    /// Active subscriptions by ID.
    subscribers: RwLock<HashMap<SubscriptionId, Subscriber>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    buffer_size: usize,
}

impl ChangeBroadcaster {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Watch one table.
    pub fn subscribe(&self, table: Table) -> ChangeStream {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = mpsc::channel(self.buffer_size);

        self.subscribers
            .write()
            .insert(id, Subscriber { table, sender });
        tracing::debug!(subscription = id.0, %table, "change watcher registered");

        ChangeStream::new(id, table, receiver)
    }

    /// Watchers whose stream is still open.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .values()
            .filter(|s| !s.sender.is_closed())
            .count()
    }

    /// Deliver an event to every watcher of its table. Watchers whose
    /// stream was closed are dropped.
    pub fn publish(&self, event: ChangeEvent) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscribers.read();
            for (id, sub) in subs.iter().filter(|(_, s)| s.table == event.table) {
                match sub.try_send(event) {
                    Delivery::Sent => {}
                    Delivery::Coalesced => {
                        tracing::trace!(subscription = id.0, "watcher busy, event coalesced")
                    }
                    Delivery::Gone => to_remove.push(*id),
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscribers.write();
            for id in to_remove {
                subs.remove(&id);
            }
        }
    }
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
