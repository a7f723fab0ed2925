use axum::{
    extract::{Query, State},
    response::Json,
};
use axum_valid::Valid;
use chrono::{DateTime, NaiveDate, Utc};
use compute::AuditFilter;
use model::{AuditAction, AuditLogEntry};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use super::{date_range, parse_optional};
use crate::schemas::{ApiError, ApiResponse, AppState, ErrorResponse, ledger_error};

/// Query parameters for the audit trail
#[derive(Debug, Default, Deserialize, Serialize, ToSchema, IntoParams, Validate)]
#[into_params(parameter_in = Query)]
pub struct AuditLogQuery {
    /// `create`, `update`, `delete`, `approve` or `reject`
    pub action: Option<String>,
    /// Record type, e.g. `transaction` or `budget`
    #[validate(length(max = 50))]
    pub entity: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Case-insensitive match on entity, entity id, user and details
    #[validate(length(max = 100))]
    pub search: Option<String>,
}

impl AuditLogQuery {
    fn to_filter(&self) -> Result<AuditFilter, ApiError> {
        Ok(AuditFilter {
            action: parse_optional::<AuditAction>(self.action.as_deref())?,
            entity: self.entity.clone().filter(|entity| !entity.is_empty()),
            date_range: date_range(self.start_date, self.end_date)?,
            search: self.search.clone().filter(|term| !term.trim().is_empty()),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuditLogResponse {
    pub id: Uuid,
    pub action: String,
    pub entity: String,
    pub entity_id: String,
    pub user_id: String,
    pub user_email: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
}

impl From<AuditLogEntry> for AuditLogResponse {
    fn from(entry: AuditLogEntry) -> Self {
        Self {
            id: entry.id,
            action: entry.action.to_string(),
            entity: entry.entity,
            entity_id: entry.entity_id,
            user_id: entry.user_id,
            user_email: entry.user_email,
            timestamp: entry.timestamp,
            details: entry.details,
        }
    }
}

/// Get audit log entries, newest first
#[utoipa::path(
    get,
    path = "/api/v1/audit-logs",
    tag = "audit",
    params(AuditLogQuery),
    responses(
        (status = 200, description = "Audit log retrieved successfully", body = ApiResponse<Vec<AuditLogResponse>>),
        (status = 400, description = "Invalid filter", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn get_audit_logs(
    State(state): State<AppState>,
    Valid(Query(query)): Valid<Query<AuditLogQuery>>,
) -> Result<Json<ApiResponse<Vec<AuditLogResponse>>>, ApiError> {
    let filter = query.to_filter()?;
    let entries = state.audit.list(&filter).await.map_err(ledger_error)?;

    info!("Successfully retrieved {} audit entries", entries.len());
    Ok(Json(ApiResponse::ok(
        entries.into_iter().map(AuditLogResponse::from).collect(),
        "Audit log retrieved successfully",
    )))
}
