use crate::handlers::{
    accounts::{get_account, get_account_transactions, get_accounts},
    audit_logs::get_audit_logs,
    budgets::{create_budget, delete_budget, get_budget, get_budgets, update_budget},
    health::health_check,
    reports::get_summary,
    sync::{get_stale_accounts, rebuild_account, reconcile_account, reconcile_accounts},
    transactions::{
        create_transaction, delete_transaction, get_expenses, get_transaction, get_transactions,
        update_transaction_status,
    },
};
use crate::schemas::{ApiDoc, AppState};
use axum::{
    routing::{get, post, put},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Create application router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Account balances (primary copy)
        .route("/api/v1/accounts", get(get_accounts))
        .route("/api/v1/accounts/:entity_id", get(get_account))
        .route(
            "/api/v1/accounts/:entity_id/transactions",
            get(get_account_transactions),
        )
        // Transaction log
        .route(
            "/api/v1/transactions",
            get(get_transactions).post(create_transaction),
        )
        .route(
            "/api/v1/transactions/:transaction_id",
            get(get_transaction).delete(delete_transaction),
        )
        .route(
            "/api/v1/transactions/:transaction_id/status",
            put(update_transaction_status),
        )
        .route("/api/v1/expenses", get(get_expenses))
        // Budgets
        .route("/api/v1/budgets", get(get_budgets).post(create_budget))
        .route(
            "/api/v1/budgets/:budget_id",
            get(get_budget).put(update_budget).delete(delete_budget),
        )
        // Audit trail and reports
        .route("/api/v1/audit-logs", get(get_audit_logs))
        .route("/api/v1/reports/summary", get(get_summary))
        // Dual-store sync
        .route("/api/v1/sync/stale", get(get_stale_accounts))
        .route("/api/v1/sync/reconcile", post(reconcile_accounts))
        .route("/api/v1/sync/reconcile/:entity_id", post(reconcile_account))
        .route("/api/v1/sync/rebuild/:entity_id", post(rebuild_account))
        // Swagger UI
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Add middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(TimeoutLayer::new(Duration::from_secs(30)))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
