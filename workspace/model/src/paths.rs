//! Document paths of the ledger collections.

use std::fmt::Display;

pub const ACCOUNTS: &str = "accounts";
pub const TRANSACTIONS: &str = "transactions";
pub const BUDGETS: &str = "budgets";
pub const AUDIT_LOGS: &str = "audit_logs";
pub const STALE_MARKERS: &str = "sync/stale";
pub const SYNC_FAILURES: &str = "sync/failures";

pub fn account(entity_id: &str) -> String {
    format!("{ACCOUNTS}/{entity_id}")
}

pub fn transaction(id: impl Display) -> String {
    format!("{TRANSACTIONS}/{id}")
}

pub fn budget(id: impl Display) -> String {
    format!("{BUDGETS}/{id}")
}

pub fn audit_log(id: impl Display) -> String {
    format!("{AUDIT_LOGS}/{id}")
}

pub fn stale_marker(entity_id: &str) -> String {
    format!("{STALE_MARKERS}/{entity_id}")
}

pub fn sync_failure(id: impl Display) -> String {
    format!("{SYNC_FAILURES}/{id}")
}

/// The collection a document lives in: everything before the last `/`.
pub fn parent(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

/// True when `path` is a direct child of `collection`.
pub fn is_child_of(collection: &str, path: &str) -> bool {
    parent(path) == collection
}

/// True when `path` is `prefix` itself or anywhere below it.
pub fn is_under(prefix: &str, path: &str) -> bool {
    prefix.is_empty()
        || path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}
