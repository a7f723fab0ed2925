//! Ledger computations on top of the stores in `model`.
//!
//! [`log`] validates and appends transactions, [`projector`] folds them into
//! account snapshots, and [`reconciler`] keeps the primary and accounting
//! copies of every account in step. [`filter`], [`budget`] and [`report`] are
//! the read-side helpers used by the HTTP layer.

pub mod audit;
pub mod budget;
pub mod error;
pub mod filter;
pub mod log;
pub mod projector;
pub mod reconciler;
pub mod report;

pub use audit::{AuditFilter, AuditTrail};
pub use budget::{BudgetBook, BudgetDraft, BudgetUtilization, budget_utilization};
pub use error::{LedgerError, Result};
pub use log::{TransactionFilter, TransactionLog};
pub use reconciler::{
    RebuildOutcome, ReconcileOutcome, Reconciler, SecondaryStatus, SweepReport, SweeperHandle,
    SyncOutcome, SyncPolicy,
};
pub use report::{LedgerSummary, summarize};
