//! Ledger records and the stores that hold them.
//!
//! The records (accounts, transactions, budgets, audit entries, sync markers)
//! are plain serde types stored as JSON documents at the paths in [`paths`].
//! [`store::LedgerStore`] is the only way the rest of the system touches a
//! database.

pub mod account;
pub mod audit;
pub mod budget;
pub mod entities;
pub mod paths;
pub mod store;
pub mod sync;
pub mod transaction;

pub use account::{Account, AmountOverflow};
pub use audit::{Actor, AuditAction, AuditLogEntry};
pub use budget::{Budget, BudgetPeriod};
pub use sync::{SyncFailure, SyncMarker};
pub use transaction::{NewTransaction, Transaction, TransactionStatus, TransactionType, UnknownVariant};

// Re-export tracing for use in this crate
pub use tracing;
