//! Wires the record store, change feed and media store to one backend.

use std::sync::Arc;

use crate::backend::{Backend, BlobBackend, MemoryBackend, RealtimeTransport, RestBackend};
use crate::config::{ChangeSource, StoreConfig};
use crate::error::Result;
use crate::media::MediaStore;
use crate::store::QuizStore;
use crate::subscriptions::{ChangeFeed, ChangeTransport, FallbackTransport, PollingTransport};

/// Entry point bundling the three services over shared backends.
#[derive(Clone)]
pub struct QuizClient {
    store: QuizStore,
    feed: ChangeFeed,
    media: MediaStore,
}

impl QuizClient {
    /// Connect to the hosted service.
    ///
    /// Change notifications come from the realtime socket, falling back to
    /// polling per table, unless `config.changes` asks for polling only.
    pub fn connect(config: &StoreConfig) -> Result<Self> {
        let rest = Arc::new(RestBackend::new(config)?);
        let backend: Arc<dyn Backend> = rest.clone();
        let polling: Arc<dyn ChangeTransport> = Arc::new(PollingTransport::new(
            Arc::clone(&backend),
            config.poll_interval,
        ));
        let transport: Arc<dyn ChangeTransport> = match config.changes {
            ChangeSource::Realtime => Arc::new(FallbackTransport::new(
                Arc::new(RealtimeTransport::new(config)?),
                polling,
            )),
            ChangeSource::Polling => polling,
        };
        tracing::info!(
            url = %config.url,
            bucket = %config.bucket,
            changes = ?config.changes,
            "quiz client configured"
        );
        Ok(Self::from_parts(backend, rest, transport, &config.bucket))
    }

    /// Client over an in-process backend, sharing it for rows, objects and
    /// change notifications.
    pub fn in_memory(backend: Arc<MemoryBackend>, bucket: &str) -> Self {
        Self::from_parts(backend.clone(), backend.clone(), backend, bucket)
    }

    pub fn from_parts(
        backend: Arc<dyn Backend>,
        blobs: Arc<dyn BlobBackend>,
        transport: Arc<dyn ChangeTransport>,
        bucket: &str,
    ) -> Self {
        let store = QuizStore::new(backend);
        Self {
            feed: ChangeFeed::new(store.clone(), transport),
            media: MediaStore::with_bucket(blobs, bucket),
            store,
        }
    }

    pub fn store(&self) -> &QuizStore {
        &self.store
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn media(&self) -> &MediaStore {
        &self.media
    }
}
