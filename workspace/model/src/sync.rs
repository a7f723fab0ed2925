use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Flags that the accounting copy of an account lags the primary copy.
/// Lives in the primary store under `sync/stale/{entityId}` until a reconcile clears it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMarker {
    pub entity_id: String,
    /// Primary account version that failed to propagate.
    #[serde(default)]
    pub account_version: u64,
    pub marked_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: String,
}

/// Reconciliation log entry, appended whenever propagation to the accounting
/// store gives up and defers to the sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    pub id: Uuid,
    pub entity_id: String,
    pub occurred_at: DateTime<Utc>,
    pub attempts: u32,
    pub error: String,
}
