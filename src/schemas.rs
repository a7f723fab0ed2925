use std::sync::Arc;
use std::time::Duration;

use axum::{http::StatusCode, response::Json};
use compute::{
    AuditTrail, BudgetBook, BudgetUtilization, LedgerError, LedgerSummary, Reconciler,
    SecondaryStatus, SweepReport, SyncPolicy,
};
use model::{
    paths,
    store::{Change, LedgerStore, StoreError, WatchHandle},
};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use utoipa::{OpenApi, ToSchema};

pub use common::{ApiResponse, MutationResponse};

use crate::config::CacheSettings;

/// Application state shared across handlers
#[derive(Clone, Debug)]
pub struct AppState {
    /// Application store, source of truth
    pub primary: Arc<dyn LedgerStore>,
    /// Accounting store holding the mirrored balances
    pub secondary: Arc<dyn LedgerStore>,
    pub reconciler: Reconciler,
    pub budgets: BudgetBook,
    pub audit: AuditTrail,
    /// Cache for report computations
    pub cache: Cache<String, CachedData>,
    /// Watches that invalidate the cache; dropped with the last state clone.
    pub watches: Arc<Vec<WatchHandle>>,
}

/// Cached data types
#[derive(Clone, Debug)]
pub enum CachedData {
    Budgets(Vec<BudgetUtilization>),
    Summary(LedgerSummary),
}

impl AppState {
    pub async fn new(
        primary: Arc<dyn LedgerStore>,
        secondary: Arc<dyn LedgerStore>,
        policy: SyncPolicy,
        cache_settings: &CacheSettings,
    ) -> Result<Self, StoreError> {
        let cache: Cache<String, CachedData> = Cache::builder()
            .max_capacity(cache_settings.max_capacity)
            .time_to_live(Duration::from_secs(cache_settings.ttl_secs))
            .build();

        let mut watches = Vec::new();
        for prefix in [paths::TRANSACTIONS, paths::BUDGETS] {
            let cache = cache.clone();
            let handle = primary
                .watch(
                    prefix,
                    Box::new(move |change: Change| {
                        debug!(path = %change.path, "invalidating report cache");
                        cache.invalidate_all();
                    }),
                )
                .await?;
            watches.push(handle);
        }

        Ok(Self {
            reconciler: Reconciler::new(primary.clone(), secondary.clone(), policy),
            budgets: BudgetBook::new(primary.clone()),
            audit: AuditTrail::new(primary.clone()),
            primary,
            secondary,
            cache,
            watches: Arc::new(watches),
        })
    }
}

/// Error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    pub code: String,
    /// Success status (always false for errors)
    pub success: bool,
}

impl ErrorResponse {
    pub fn new(code: &str, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.to_string(),
            success: false,
        }
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new("validation_error", message)),
    )
}

pub fn not_found(message: impl Into<String>) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new("not_found", message)),
    )
}

/// Maps a ledger error to a status and a body that never carries store internals.
pub fn ledger_error(ledger_error: LedgerError) -> ApiError {
    match &ledger_error {
        LedgerError::Validation(message) => bad_request(message.clone()),
        LedgerError::NotFound(what) => not_found(format!("{what} not found")),
        LedgerError::StaleRead { .. } | LedgerError::Storage(StoreError::Conflict { .. }) => {
            warn!(error = %ledger_error, "request lost a concurrent update");
            (
                StatusCode::CONFLICT,
                Json(ErrorResponse::new(
                    "conflict",
                    "The record was changed concurrently, please retry",
                )),
            )
        }
        LedgerError::Storage(StoreError::NotFound(_)) => not_found("Record not found"),
        LedgerError::Storage(_) => {
            error!(error = %ledger_error, "storage failure");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::new(
                    "storage_unavailable",
                    "Storage is temporarily unavailable",
                )),
            )
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
    /// Application database status
    pub primary: String,
    /// Accounting database status
    pub accounting: String,
}

/// Outcome of a sync request as shown to clients.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncResponse {
    pub entity_id: String,
    /// `in_sync`, `repaired`, `consistent` or `rewritten`
    pub outcome: String,
    #[schema(value_type = Option<String>)]
    pub secondary: Option<SecondaryStatus>,
}

/// OpenAPI schema of a sweep report.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SweepResponse {
    pub checked: usize,
    pub repaired: usize,
    pub failed: usize,
}

impl From<SweepReport> for SweepResponse {
    fn from(report: SweepReport) -> Self {
        Self {
            checked: report.checked,
            repaired: report.repaired,
            failed: report.failed,
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::health::health_check,
        crate::handlers::accounts::get_accounts,
        crate::handlers::accounts::get_account,
        crate::handlers::accounts::get_account_transactions,
        crate::handlers::transactions::get_transactions,
        crate::handlers::transactions::get_transaction,
        crate::handlers::transactions::create_transaction,
        crate::handlers::transactions::update_transaction_status,
        crate::handlers::transactions::delete_transaction,
        crate::handlers::transactions::get_expenses,
        crate::handlers::budgets::get_budgets,
        crate::handlers::budgets::get_budget,
        crate::handlers::budgets::create_budget,
        crate::handlers::budgets::update_budget,
        crate::handlers::budgets::delete_budget,
        crate::handlers::audit_logs::get_audit_logs,
        crate::handlers::reports::get_summary,
        crate::handlers::sync::get_stale_accounts,
        crate::handlers::sync::reconcile_accounts,
        crate::handlers::sync::reconcile_account,
        crate::handlers::sync::rebuild_account,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            MutationResponse,
            SyncResponse,
            SweepResponse,
            crate::handlers::accounts::AccountResponse,
            crate::handlers::transactions::TransactionResponse,
            crate::handlers::transactions::CreateTransactionRequest,
            crate::handlers::transactions::UpdateStatusRequest,
            crate::handlers::budgets::BudgetRequest,
            crate::handlers::budgets::BudgetResponse,
            crate::handlers::audit_logs::AuditLogResponse,
            crate::handlers::reports::SummaryResponse,
            crate::handlers::sync::StaleMarkerResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "accounts", description = "Account balances from the application store"),
        (name = "transactions", description = "Transaction log"),
        (name = "budgets", description = "Budgets and utilization"),
        (name = "audit", description = "Audit trail"),
        (name = "reports", description = "Ledger summaries"),
        (name = "sync", description = "Dual-store reconciliation"),
    ),
    info(
        title = "feesync API",
        description = "Fee ledger with a mirrored accounting store",
        version = "0.1.0",
    )
)]
pub struct ApiDoc;
