use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Json,
};
use chrono::{DateTime, Utc};
use compute::{RebuildOutcome, ReconcileOutcome};
use model::{Account, AuditAction, SyncMarker};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};

use super::actor;
use crate::schemas::{
    ApiError, ApiResponse, AppState, ErrorResponse, SweepResponse, SyncResponse, ledger_error,
};

const ACCOUNT_ENTITY: &str = "account";

/// Account whose accounting copy is known to lag
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StaleMarkerResponse {
    pub entity_id: String,
    /// Primary account version the accounting copy failed to receive
    pub account_version: u64,
    pub marked_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: String,
}

impl From<SyncMarker> for StaleMarkerResponse {
    fn from(marker: SyncMarker) -> Self {
        Self {
            entity_id: marker.entity_id,
            account_version: marker.account_version,
            marked_at: marker.marked_at,
            attempts: marker.attempts,
            last_error: marker.last_error,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReconcileQuery {
    /// Sweep every account instead of only the stale ones
    pub all: Option<bool>,
}

fn figures(account: Option<&Account>) -> serde_json::Value {
    match account {
        Some(account) => json!({
            "totalCharged": account.total_charged().to_string(),
            "totalPaid": account.total_paid().to_string(),
            "balance": account.balance().to_string(),
            "version": account.version(),
        }),
        None => serde_json::Value::Null,
    }
}

/// List stale accounts
#[utoipa::path(
    get,
    path = "/api/v1/sync/stale",
    tag = "sync",
    responses(
        (status = 200, description = "Stale markers retrieved successfully", body = ApiResponse<Vec<StaleMarkerResponse>>),
        (status = 503, description = "Storage unavailable", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn get_stale_accounts(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<StaleMarkerResponse>>>, ApiError> {
    let markers = state.reconciler.stale_markers().await.map_err(ledger_error)?;
    if !markers.is_empty() {
        warn!("{} accounts have a lagging accounting copy", markers.len());
    }
    Ok(Json(ApiResponse::ok(
        markers.into_iter().map(StaleMarkerResponse::from).collect(),
        "Stale markers retrieved successfully",
    )))
}

/// Run a reconcile sweep
#[utoipa::path(
    post,
    path = "/api/v1/sync/reconcile",
    tag = "sync",
    params(ReconcileQuery),
    responses(
        (status = 200, description = "Sweep finished", body = ApiResponse<SweepResponse>),
        (status = 503, description = "Storage unavailable", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn reconcile_accounts(
    State(state): State<AppState>,
    Query(query): Query<ReconcileQuery>,
) -> Result<Json<ApiResponse<SweepResponse>>, ApiError> {
    let report = if query.all.unwrap_or(false) {
        state.reconciler.reconcile_all().await
    } else {
        state.reconciler.reconcile_stale().await
    }
    .map_err(|e| {
        error!("Reconcile sweep failed: {}", e);
        ledger_error(e)
    })?;

    info!(
        "Sweep checked {} accounts, repaired {}, failed {}",
        report.checked, report.repaired, report.failed
    );
    Ok(Json(ApiResponse::ok(
        SweepResponse::from(report),
        "Sweep finished",
    )))
}

/// Reconcile one account
#[utoipa::path(
    post,
    path = "/api/v1/sync/reconcile/{entity_id}",
    tag = "sync",
    params(
        ("entity_id" = String, Path, description = "Entity ID"),
    ),
    responses(
        (status = 200, description = "Account reconciled", body = ApiResponse<SyncResponse>),
        (status = 404, description = "Account not found", body = ErrorResponse),
        (status = 409, description = "Primary kept changing, retry", body = ErrorResponse)
    )
)]
#[instrument(skip(state, headers))]
pub async fn reconcile_account(
    Path(entity_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<SyncResponse>>, ApiError> {
    let outcome = state
        .reconciler
        .reconcile(&entity_id)
        .await
        .map_err(ledger_error)?;

    let label = match &outcome {
        ReconcileOutcome::InSync => "in_sync",
        ReconcileOutcome::Repaired { previous } => {
            let details = json!({ "repaired": true, "previous": figures(previous.as_ref()) });
            if let Err(e) = state
                .audit
                .record(AuditAction::Update, ACCOUNT_ENTITY, &entity_id, &actor(&headers), details)
                .await
            {
                warn!("Failed to audit reconcile of {}: {}", entity_id, e);
            }
            "repaired"
        }
    };

    info!("Account {} reconciled: {}", entity_id, label);
    Ok(Json(ApiResponse::ok(
        SyncResponse {
            entity_id,
            outcome: label.to_string(),
            secondary: None,
        },
        "Account reconciled",
    )))
}

/// Rebuild one account from the transaction log
#[utoipa::path(
    post,
    path = "/api/v1/sync/rebuild/{entity_id}",
    tag = "sync",
    params(
        ("entity_id" = String, Path, description = "Entity ID"),
    ),
    responses(
        (status = 200, description = "Account rebuilt", body = ApiResponse<SyncResponse>),
        (status = 404, description = "No account or transactions for the entity", body = ErrorResponse)
    )
)]
#[instrument(skip(state, headers))]
pub async fn rebuild_account(
    Path(entity_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<SyncResponse>>, ApiError> {
    let outcome = state
        .reconciler
        .rebuild(&entity_id)
        .await
        .map_err(ledger_error)?;

    let response = match outcome {
        RebuildOutcome::Consistent { .. } => SyncResponse {
            entity_id,
            outcome: "consistent".to_string(),
            secondary: None,
        },
        RebuildOutcome::Rewritten {
            previous,
            current,
            secondary,
        } => {
            let details = json!({
                "rebuilt": true,
                "previous": figures(previous.as_ref()),
                "current": figures(Some(&current)),
            });
            if let Err(e) = state
                .audit
                .record(AuditAction::Update, ACCOUNT_ENTITY, &entity_id, &actor(&headers), details)
                .await
            {
                warn!("Failed to audit rebuild of {}: {}", entity_id, e);
            }
            state.cache.invalidate_all();
            SyncResponse {
                entity_id,
                outcome: "rewritten".to_string(),
                secondary: Some(secondary),
            }
        }
    };

    info!("Account {} rebuild: {}", response.entity_id, response.outcome);
    Ok(Json(ApiResponse::ok(response, "Account rebuilt")))
}
