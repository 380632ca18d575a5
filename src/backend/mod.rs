//! Seams to the hosted database, object storage and change channel.
//!
//! The record and media stores never talk to the network directly. They are
//! handed an implementation of these traits, which keeps the service
//! swappable and lets tests run against [`MemoryBackend`].

mod memory;
mod realtime;
mod rest;

pub use memory::MemoryBackend;
pub use realtime::{realtime_url, RealtimeTransport, HEARTBEAT_INTERVAL};
pub use rest::RestBackend;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::records::{Filter, Query, UpsertMode};
use crate::types::Table;

/// Characters left as-is inside one path segment of an object URL.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode every segment of an object path, keeping the `/`
/// separators.
pub fn encode_object_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Row-level access to the database tables.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Rows matching `query`, in the requested order.
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>>;

    /// Insert one row and return it as stored, including server defaults.
    async fn insert(&self, table: Table, row: Value) -> Result<Value>;

    /// Merge `changes` into every row matching `filters`; returns those rows.
    async fn update(
        &self,
        table: Table,
        filters: &[Filter],
        changes: Map<String, Value>,
    ) -> Result<Vec<Value>>;

    /// Atomic insert-or-update keyed by the `on_conflict` columns.
    ///
    /// Returns the rows written. With [`UpsertMode::IgnoreDuplicates`] an
    /// existing row is left alone and nothing is returned.
    async fn upsert(
        &self,
        table: Table,
        row: Value,
        on_conflict: &[&str],
        mode: UpsertMode,
    ) -> Result<Vec<Value>>;
}

/// Object storage for uploaded media.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Store an object and return its path inside the bucket. Without
    /// `upsert`, an existing object makes this fail with
    /// [`StoreError::Conflict`](crate::StoreError::Conflict).
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> Result<String>;

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<()>;

    /// Publicly resolvable URL of an object. Pure; does not check existence.
    fn public_url(&self, bucket: &str, path: &str) -> String;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;
}
