//! In-process backend with the same contract as the hosted service.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use uuid::Uuid;

use super::{encode_object_path, Backend, BlobBackend};
use crate::error::{Result, StoreError};
use crate::records::{columns as col, Filter, Query, ResponseRow, UpsertMode};
use crate::subscriptions::{
    ChangeBroadcaster, ChangeEvent, ChangeKind, ChangeStream, ChangeTransport,
};
use crate::types::{Table, Timestamp};

/// Base URL used for public object links.
const DEFAULT_PUBLIC_BASE: &str = "http://localhost:54321";

/// A stored object.
#[derive(Clone, Debug)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// Columns whose values must be unique per table.
fn unique_keys(table: Table) -> &'static [&'static [&'static str]] {
    match table {
        Table::Questions | Table::Users | Table::QuizMode => &[&[col::ID]],
        Table::Responses => &[ResponseRow::KEY],
    }
}

/// Fill in the columns the service assigns on insert.
fn apply_defaults(table: Table, row: &mut Map<String, Value>) {
    let now = Value::from(Timestamp::now().to_rfc3339());
    match table {
        Table::Questions => {
            row.entry(col::ID)
                .or_insert_with(|| Value::from(Uuid::new_v4().to_string()));
            row.entry(col::CREATED_AT).or_insert_with(|| now.clone());
            row.entry(col::UPDATED_AT).or_insert(now);
        }
        Table::Users => {
            row.entry(col::ID)
                .or_insert_with(|| Value::from(Uuid::new_v4().to_string()));
            row.entry(col::CREATED_AT).or_insert(now);
        }
        Table::Responses => {
            row.entry(col::ANSWERED_AT).or_insert(now);
        }
        Table::QuizMode => {}
    }
}

fn same_key(a: &Value, b: &Map<String, Value>, key: &[&str]) -> bool {
    key.iter()
        .all(|c| matches!((a.get(*c), b.get(*c)), (Some(x), Some(y)) if x == y))
}

/// Ordering used for `order by`: nulls first, then numbers, timestamps and
/// strings compared by value.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (Timestamp::parse(x), Timestamp::parse(y)) {
                (Some(tx), Some(ty)) => tx.cmp(&ty),
                _ => x.cmp(y),
            }
        }
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// In-memory tables, objects and change broadcasting.
///
/// All tables sit behind one lock, so each write (including upserts) is
/// atomic with respect to every other write.
pub struct MemoryBackend {
    tables: RwLock<HashMap<Table, Vec<Value>>>,
    buckets: RwLock<HashMap<String, HashMap<String, StoredObject>>>,
    changes: ChangeBroadcaster,
    public_base: String,
    offline: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            buckets: RwLock::new(HashMap::new()),
            changes: ChangeBroadcaster::new(),
            public_base: DEFAULT_PUBLIC_BASE.to_string(),
            offline: AtomicBool::new(false),
        }
    }

    /// Backend with one empty bucket already created.
    pub fn with_bucket(bucket: &str) -> Self {
        let backend = Self::new();
        backend.create_bucket(bucket);
        backend
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.buckets.write().entry(bucket.to_string()).or_default();
    }

    /// Simulate a lost connection: every operation fails until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, AtomicOrdering::SeqCst);
    }

    /// Every stored row of a table, soft-deleted ones included.
    pub fn raw_rows(&self, table: Table) -> Vec<Value> {
        self.tables.read().get(&table).cloned().unwrap_or_default()
    }

    pub fn row_count(&self, table: Table) -> usize {
        self.tables.read().get(&table).map_or(0, Vec::len)
    }

    /// Stored bytes and content type of an object.
    pub fn object(&self, bucket: &str, path: &str) -> Option<(Vec<u8>, String)> {
        self.buckets
            .read()
            .get(bucket)
            .and_then(|objects| objects.get(path))
            .map(|o| (o.bytes.clone(), o.content_type.clone()))
    }

    pub fn object_count(&self, bucket: &str) -> usize {
        self.buckets.read().get(bucket).map_or(0, HashMap::len)
    }

    pub fn watcher_count(&self) -> usize {
        self.changes.subscriber_count()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(AtomicOrdering::SeqCst) {
            Err(StoreError::Connection("backend is offline".into()))
        } else {
            Ok(())
        }
    }

    fn notify(&self, table: Table, kind: ChangeKind) {
        self.changes.publish(ChangeEvent::new(table, kind));
    }

    /// Insert into an already-locked table, enforcing unique keys.
    fn insert_locked(rows: &mut Vec<Value>, table: Table, mut row: Map<String, Value>) -> Result<Value> {
        apply_defaults(table, &mut row);
        for key in unique_keys(table) {
            if rows.iter().any(|existing| same_key(existing, &row, key)) {
                return Err(StoreError::Conflict(format!(
                    "duplicate key ({}) in {table}",
                    key.join(", ")
                )));
            }
        }
        let row = Value::Object(row);
        rows.push(row.clone());
        Ok(row)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn into_object(row: Value) -> Result<Map<String, Value>> {
    match row {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Rejected {
            code: "22P02".into(),
            message: format!("expected a JSON object row, got {other}"),
        }),
    }
}

fn merge(target: &mut Value, changes: &Map<String, Value>) {
    if let Value::Object(existing) = target {
        for (k, v) in changes {
            existing.insert(k.clone(), v.clone());
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>> {
        self.check_online()?;
        let mut rows: Vec<Value> = self
            .tables
            .read()
            .get(&table)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| compare_values(a.get(order.column), b.get(order.column)));
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value> {
        self.check_online()?;
        let row = into_object(row)?;
        let stored = {
            let mut tables = self.tables.write();
            Self::insert_locked(tables.entry(table).or_default(), table, row)?
        };
        self.notify(table, ChangeKind::Insert);
        Ok(stored)
    }

    async fn update(
        &self,
        table: Table,
        filters: &[Filter],
        changes: Map<String, Value>,
    ) -> Result<Vec<Value>> {
        self.check_online()?;
        let updated: Vec<Value> = {
            let mut tables = self.tables.write();
            let rows = tables.entry(table).or_default();
            rows.iter_mut()
                .filter(|r| filters.iter().all(|f| f.matches(r)))
                .map(|r| {
                    merge(r, &changes);
                    r.clone()
                })
                .collect()
        };
        if !updated.is_empty() {
            self.notify(table, ChangeKind::Update);
        }
        Ok(updated)
    }

    async fn upsert(
        &self,
        table: Table,
        row: Value,
        on_conflict: &[&str],
        mode: UpsertMode,
    ) -> Result<Vec<Value>> {
        self.check_online()?;
        let row = into_object(row)?;
        let (written, kind) = {
            let mut tables = self.tables.write();
            let rows = tables.entry(table).or_default();
            match rows.iter_mut().find(|r| same_key(r, &row, on_conflict)) {
                Some(_) if mode == UpsertMode::IgnoreDuplicates => (Vec::new(), None),
                Some(existing) => {
                    merge(existing, &row);
                    (vec![existing.clone()], Some(ChangeKind::Update))
                }
                None => {
                    let stored = Self::insert_locked(rows, table, row)?;
                    (vec![stored], Some(ChangeKind::Insert))
                }
            }
        };
        if let Some(kind) = kind {
            self.notify(table, kind);
        }
        Ok(written)
    }
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> Result<String> {
        self.check_online()?;
        let mut buckets = self.buckets.write();
        let objects = buckets.get_mut(bucket).ok_or_else(|| StoreError::Rejected {
            code: "404".into(),
            message: format!("bucket not found: {bucket}"),
        })?;
        if !upsert && objects.contains_key(path) {
            return Err(StoreError::Conflict(format!(
                "object already exists: {bucket}/{path}"
            )));
        }
        objects.insert(
            path.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(path.to_string())
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<()> {
        self.check_online()?;
        if let Some(objects) = self.buckets.write().get_mut(bucket) {
            for path in paths {
                objects.remove(path);
            }
        }
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{bucket}/{}",
            self.public_base,
            encode_object_path(path)
        )
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.check_online()?;
        Ok(self.buckets.read().contains_key(bucket))
    }
}

#[async_trait]
impl ChangeTransport for MemoryBackend {
    async fn watch(&self, table: Table) -> Result<ChangeStream> {
        self.check_online()?;
        Ok(self.changes.subscribe(table))
    }
}
