//! Keyed document store abstraction shared by the application and accounting databases.
//!
//! Both databases are reached through [`LedgerStore`]. Every document carries a
//! version that starts at 1 and grows by exactly one on each write, which is what
//! the optimistic-concurrency preconditions of [`LedgerStore::commit`] check.

mod feed;
mod memory;
mod sql;

pub use feed::{ChangeFeed, FeedSubscription, WatchHandle};
pub use memory::MemoryStore;
pub use sql::SqlStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Errors raised by a [`LedgerStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),

    /// A write precondition did not hold; the caller should re-read and retry.
    #[error("write conflict on {path}")]
    Conflict { path: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl From<sea_orm::DbErr> for StoreError {
    fn from(error: sea_orm::DbErr) -> Self {
        match error {
            sea_orm::DbErr::Conn(_) | sea_orm::DbErr::ConnectionAcquire(_) => {
                StoreError::Unavailable(error.to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// A document read from a store together with its current version.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: String,
    pub value: Value,
    pub version: u64,
}

impl Document {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.value.clone())?)
    }
}

/// Condition a document must satisfy for a write to go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Unconditional write.
    Any,
    /// The document must not exist.
    Absent,
    /// The document must exist at exactly this version.
    Version(u64),
}

impl Precondition {
    /// Precondition matching what was just read.
    pub fn from_read(document: Option<&Document>) -> Self {
        match document {
            Some(document) => Precondition::Version(document.version),
            None => Precondition::Absent,
        }
    }

    /// The version a successful conditional write will produce.
    /// `None` for [`Precondition::Any`], where it depends on the stored state.
    pub fn next_version(&self) -> Option<u64> {
        match self {
            Precondition::Any => None,
            Precondition::Absent => Some(1),
            Precondition::Version(version) => Some(version + 1),
        }
    }
}

/// One write of an atomic [`LedgerStore::commit`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put {
        path: String,
        value: Value,
        expect: Precondition,
    },
    Remove {
        path: String,
        expect: Precondition,
    },
}

impl WriteOp {
    pub fn put(path: impl Into<String>, value: Value) -> Self {
        WriteOp::Put {
            path: path.into(),
            value,
            expect: Precondition::Any,
        }
    }

    /// Writes a new document; fails if one already exists at `path`.
    pub fn create(path: impl Into<String>, value: Value) -> Self {
        WriteOp::Put {
            path: path.into(),
            value,
            expect: Precondition::Absent,
        }
    }

    pub fn put_if(path: impl Into<String>, value: Value, expect: Precondition) -> Self {
        WriteOp::Put {
            path: path.into(),
            value,
            expect,
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        WriteOp::Remove {
            path: path.into(),
            expect: Precondition::Any,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            WriteOp::Put { path, .. } | WriteOp::Remove { path, .. } => path,
        }
    }

    pub fn expect(&self) -> Precondition {
        match self {
            WriteOp::Put { expect, .. } | WriteOp::Remove { expect, .. } => *expect,
        }
    }
}

/// A change delivered to watchers. `document` is `None` when the path was removed.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub path: String,
    pub document: Option<Document>,
}

pub type WatchCallback = Box<dyn Fn(Change) + Send + Sync + 'static>;

/// Keyed document store. Paths are `/`-separated; a collection is the parent
/// path of its documents (`accounts` holds `accounts/S1`).
#[async_trait]
pub trait LedgerStore: Send + Sync + std::fmt::Debug {
    /// Name used in logs, e.g. `primary` or `accounting`.
    fn name(&self) -> &str;

    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError>;

    /// Direct children of `collection`, ordered by path.
    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// Applies all writes or none of them. Returns the new version of each written
    /// document (0 for removals). A failed precondition yields [`StoreError::Conflict`].
    async fn commit(&self, ops: Vec<WriteOp>) -> Result<Vec<u64>, StoreError>;

    /// Calls `callback` with the current documents under `prefix` and then on every
    /// change below it, until the returned handle is cancelled or dropped.
    async fn watch(&self, prefix: &str, callback: WatchCallback)
    -> Result<WatchHandle, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Unconditional write; returns the new version.
    async fn set(&self, path: &str, value: Value) -> Result<u64, StoreError> {
        let versions = self.commit(vec![WriteOp::put(path, value)]).await?;
        Ok(versions.first().copied().unwrap_or_default())
    }

    /// Shallow-merges the fields of `partial` into an existing object document.
    async fn update(&self, path: &str, partial: Value) -> Result<u64, StoreError> {
        let current = self
            .get(path)
            .await?
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        let merged = merge_fields(current.value, partial);
        let versions = self
            .commit(vec![WriteOp::put_if(
                path,
                merged,
                Precondition::Version(current.version),
            )])
            .await?;
        Ok(versions.first().copied().unwrap_or_default())
    }

    /// Removes a document. Removing a missing document is not an error.
    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.commit(vec![WriteOp::remove(path)]).await.map(|_| ())
    }

    /// Direct children of `collection` whose top-level `field` equals `value`.
    async fn query(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError> {
        let documents = self.list(collection).await?;
        Ok(documents
            .into_iter()
            .filter(|document| document.value.get(field) == Some(value))
            .collect())
    }
}

fn merge_fields(current: Value, partial: Value) -> Value {
    match (current, partial) {
        (Value::Object(mut current), Value::Object(partial)) => {
            for (key, value) in partial {
                current.insert(key, value);
            }
            Value::Object(current)
        }
        (_, partial) => partial,
    }
}
