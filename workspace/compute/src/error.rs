use model::store::StoreError;
use thiserror::Error;
use tracing::error;

/// Error types for the ledger operations
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Malformed or out-of-range input. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A store was unreachable, refused the write, or kept conflicting.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// A reconcile pass kept observing a primary copy newer than the one it read.
    #[error("Stale read for account {entity_id}: read version {expected}, store moved to {found:?}")]
    StaleRead {
        entity_id: String,
        expected: u64,
        found: Option<u64>,
    },

    /// The requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation(message.into())
    }

    /// Whether the failure is a lost optimistic-concurrency race.
    pub fn is_conflict(&self) -> bool {
        match self {
            LedgerError::Storage(store_error) => store_error.is_conflict(),
            LedgerError::StaleRead { .. } => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(error: serde_json::Error) -> Self {
        let ledger_error = LedgerError::Storage(StoreError::Serialization(error));
        error!(?ledger_error, "Failed to encode or decode a ledger document");
        ledger_error
    }
}

impl From<model::UnknownVariant> for LedgerError {
    fn from(error: model::UnknownVariant) -> Self {
        LedgerError::Validation(error.to_string())
    }
}

impl From<model::AmountOverflow> for LedgerError {
    fn from(error: model::AmountOverflow) -> Self {
        LedgerError::Validation(error.to_string())
    }
}

/// Type alias for Result with LedgerError
pub type Result<T> = std::result::Result<T, LedgerError>;
