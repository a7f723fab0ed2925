use std::collections::HashMap;

use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, warn};

use super::{Change, Document, WatchCallback};
use crate::paths;

const FEED_CAPACITY: usize = 1024;

/// In-process fan-out of committed changes to watchers of a store.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<Change>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(FEED_CAPACITY);
        Self { sender }
    }
}

impl ChangeFeed {
    pub fn publish(&self, change: Change) {
        // No receivers is the common case and not an error.
        let _ = self.sender.send(change);
    }

    /// Takes a receiver for every change published from now on. Call this
    /// before reading the snapshot handed to [`FeedSubscription::deliver`].
    pub fn subscribe(&self) -> FeedSubscription {
        FeedSubscription {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Changes buffered since [`ChangeFeed::subscribe`], waiting for a snapshot.
#[derive(Debug)]
pub struct FeedSubscription {
    receiver: broadcast::Receiver<Change>,
}

impl FeedSubscription {
    /// Delivers `initial` and then every change under `prefix` to `callback`.
    ///
    /// Buffered changes already reflected in `initial` (same path, version not
    /// newer) are dropped, so each document version is delivered once.
    pub fn deliver(
        self,
        prefix: &str,
        initial: Vec<Document>,
        callback: WatchCallback,
    ) -> WatchHandle {
        let mut receiver = self.receiver;
        let prefix = prefix.to_string();
        let mut seen: HashMap<String, u64> = initial
            .iter()
            .map(|document| (document.path.clone(), document.version))
            .collect();

        for document in initial {
            callback(Change {
                path: document.path.clone(),
                document: Some(document),
            });
        }

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(change) => {
                        if !paths::is_under(&prefix, &change.path) {
                            continue;
                        }
                        if let Some(snapshot_version) = seen.remove(&change.path) {
                            let already_delivered = change
                                .document
                                .as_ref()
                                .is_some_and(|document| document.version <= snapshot_version);
                            if already_delivered {
                                seen.insert(change.path, snapshot_version);
                                continue;
                            }
                        }
                        callback(change);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(prefix = %prefix, skipped, "watcher lagged behind the change feed");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(prefix = %prefix, "change feed closed");
                        break;
                    }
                }
            }
        });

        WatchHandle { task }
    }
}

/// Keeps a watch alive. Dropping or cancelling it stops delivery.
#[derive(Debug)]
pub struct WatchHandle {
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn cancel(self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
