use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, trace};

use super::{
    Change, ChangeFeed, Document, LedgerStore, Precondition, StoreError, WatchCallback,
    WatchHandle, WriteOp,
};
use crate::paths;

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    version: u64,
}

/// Process-local [`LedgerStore`] backed by an ordered map.
///
/// Clones share the same data. Besides tests and demos it supports fault
/// injection: [`MemoryStore::set_offline`] makes every call fail with
/// [`StoreError::Unavailable`], and [`MemoryStore::fail_next_commits`] fails a
/// fixed number of upcoming commits.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    name: String,
    entries: Arc<Mutex<BTreeMap<String, Entry>>>,
    feed: ChangeFeed,
    offline: Arc<AtomicBool>,
    failing_commits: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Arc::new(Mutex::new(BTreeMap::new())),
            feed: ChangeFeed::default(),
            offline: Arc::new(AtomicBool::new(false)),
            failing_commits: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{} is offline", self.name)));
        }
        Ok(())
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Entry>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Backend(format!("{} store lock poisoned", self.name)))
    }
}

fn check(expect: Precondition, path: &str, current: Option<&Entry>) -> Result<(), StoreError> {
    let holds = match (expect, current) {
        (Precondition::Any, _) => true,
        (Precondition::Absent, None) => true,
        (Precondition::Absent, Some(_)) => false,
        (Precondition::Version(version), Some(entry)) => entry.version == version,
        (Precondition::Version(_), None) => false,
    };
    if holds {
        Ok(())
    } else {
        Err(StoreError::Conflict {
            path: path.to_string(),
        })
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        self.check_online()?;
        let entries = self.lock()?;
        Ok(entries.get(path).map(|entry| Document {
            path: path.to_string(),
            value: entry.value.clone(),
            version: entry.version,
        }))
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        self.check_online()?;
        let entries = self.lock()?;
        let start = format!("{collection}/");
        Ok(entries
            .range(start.clone()..)
            .take_while(|(path, _)| path.starts_with(&start))
            .filter(|(path, _)| paths::is_child_of(collection, path))
            .map(|(path, entry)| Document {
                path: path.clone(),
                value: entry.value.clone(),
                version: entry.version,
            })
            .collect())
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<Vec<u64>, StoreError> {
        self.check_online()?;
        if self.take_injected_failure() {
            return Err(StoreError::Unavailable(format!(
                "{} rejected the write",
                self.name
            )));
        }

        let changes = {
            let mut entries = self.lock()?;

            // Check every precondition against the state as it will be when the
            // op runs, so several ops on one path inside a batch behave sequentially.
            let mut staged: BTreeMap<&str, Option<Entry>> = BTreeMap::new();
            for op in &ops {
                let path = op.path();
                let current = match staged.get(path) {
                    Some(entry) => entry.clone(),
                    None => entries.get(path).cloned(),
                };
                check(op.expect(), path, current.as_ref())?;
                let next = match op {
                    WriteOp::Put { value, .. } => Some(Entry {
                        value: value.clone(),
                        version: current.map(|entry| entry.version + 1).unwrap_or(1),
                    }),
                    WriteOp::Remove { .. } => None,
                };
                staged.insert(path, next);
            }

            let mut changes = Vec::with_capacity(ops.len());
            for op in &ops {
                let path = op.path().to_string();
                match op {
                    WriteOp::Put { value, .. } => {
                        let version = entries.get(&path).map(|e| e.version + 1).unwrap_or(1);
                        entries.insert(
                            path.clone(),
                            Entry {
                                value: value.clone(),
                                version,
                            },
                        );
                        changes.push(Change {
                            path: path.clone(),
                            document: Some(Document {
                                path,
                                value: value.clone(),
                                version,
                            }),
                        });
                    }
                    WriteOp::Remove { .. } => {
                        entries.remove(&path);
                        changes.push(Change {
                            path,
                            document: None,
                        });
                    }
                }
            }
            changes
        };

        trace!(store = %self.name, writes = changes.len(), "committed batch");
        let versions = changes
            .iter()
            .map(|change| change.document.as_ref().map(|d| d.version).unwrap_or(0))
            .collect();
        for change in changes {
            self.feed.publish(change);
        }
        Ok(versions)
    }

    async fn watch(
        &self,
        prefix: &str,
        callback: WatchCallback,
    ) -> Result<WatchHandle, StoreError> {
        self.check_online()?;
        let subscription = self.feed.subscribe();
        let initial = {
            let entries = self.lock()?;
            entries
                .iter()
                .filter(|(path, _)| paths::is_under(prefix, path))
                .map(|(path, entry)| Document {
                    path: path.clone(),
                    value: entry.value.clone(),
                    version: entry.version,
                })
                .collect()
        };
        debug!(store = %self.name, prefix, "registering watcher");
        Ok(subscription.deliver(prefix, initial, callback))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_online()
    }
}
