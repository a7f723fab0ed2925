use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use axum_valid::Valid;
use chrono::{DateTime, NaiveDate, Utc};
use compute::{BudgetDraft, BudgetUtilization};
use model::BudgetPeriod;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::actor;
use crate::schemas::{
    ApiError, ApiResponse, AppState, CachedData, ErrorResponse, MutationResponse, bad_request,
    ledger_error, not_found,
};

const UTILIZATION_CACHE_KEY: &str = "budgets:utilization";

/// Request body for creating or replacing a budget
#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct BudgetRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    /// Expense category the budget caps
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    /// Spending cap
    #[schema(value_type = String, example = "1000.00")]
    pub amount: Decimal,
    /// `monthly`, `quarterly`, `yearly` or `custom`
    pub period: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl BudgetRequest {
    fn into_draft(self) -> Result<BudgetDraft, ApiError> {
        let period: BudgetPeriod = self
            .period
            .parse()
            .map_err(|e: model::UnknownVariant| bad_request(e.to_string()))?;
        Ok(BudgetDraft {
            name: self.name,
            category: self.category,
            amount: self.amount,
            period,
            start_date: self.start_date,
            end_date: self.end_date,
        })
    }
}

/// Budget with its utilization
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BudgetResponse {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub period: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Approved expenses in the category within the budget dates
    #[schema(value_type = String)]
    pub spent: Decimal,
    #[schema(value_type = String)]
    pub remaining: Decimal,
    #[schema(value_type = String)]
    pub utilization_percent: Decimal,
}

impl From<BudgetUtilization> for BudgetResponse {
    fn from(report: BudgetUtilization) -> Self {
        let budget = report.budget;
        Self {
            id: budget.id,
            name: budget.name,
            category: budget.category,
            amount: budget.amount,
            period: budget.period.to_string(),
            start_date: budget.start_date,
            end_date: budget.end_date,
            created_at: budget.created_at,
            updated_at: budget.updated_at,
            spent: report.spent,
            remaining: report.remaining,
            utilization_percent: report.utilization_percent,
        }
    }
}

/// Get all budgets with utilization
#[utoipa::path(
    get,
    path = "/api/v1/budgets",
    tag = "budgets",
    responses(
        (status = 200, description = "Budgets retrieved successfully", body = ApiResponse<Vec<BudgetResponse>>),
        (status = 503, description = "Storage unavailable", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn get_budgets(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<BudgetResponse>>>, ApiError> {
    let reports = match state.cache.get(UTILIZATION_CACHE_KEY).await {
        Some(CachedData::Budgets(reports)) => {
            debug!("Budget utilization served from cache");
            reports
        }
        _ => {
            let reports = state.budgets.utilization().await.map_err(ledger_error)?;
            state
                .cache
                .insert(UTILIZATION_CACHE_KEY.to_string(), CachedData::Budgets(reports.clone()))
                .await;
            reports
        }
    };

    info!("Successfully retrieved {} budgets", reports.len());
    Ok(Json(ApiResponse::ok(
        reports.into_iter().map(BudgetResponse::from).collect(),
        "Budgets retrieved successfully",
    )))
}

/// Get a budget by ID
#[utoipa::path(
    get,
    path = "/api/v1/budgets/{budget_id}",
    tag = "budgets",
    params(
        ("budget_id" = Uuid, Path, description = "Budget ID"),
    ),
    responses(
        (status = 200, description = "Budget retrieved successfully", body = ApiResponse<BudgetResponse>),
        (status = 404, description = "Budget not found", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn get_budget(
    Path(budget_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<BudgetResponse>>, ApiError> {
    match state.budgets.report(budget_id).await {
        Ok(Some(report)) => Ok(Json(ApiResponse::ok(
            BudgetResponse::from(report),
            "Budget retrieved successfully",
        ))),
        Ok(None) => {
            warn!("Budget {} not found", budget_id);
            Err(not_found(format!("Budget {budget_id} not found")))
        }
        Err(e) => Err(ledger_error(e)),
    }
}

/// Create a budget
#[utoipa::path(
    post,
    path = "/api/v1/budgets",
    tag = "budgets",
    request_body = BudgetRequest,
    responses(
        (status = 201, description = "Budget created", body = MutationResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse)
    )
)]
#[instrument(skip(state, headers))]
pub async fn create_budget(
    State(state): State<AppState>,
    headers: HeaderMap,
    Valid(Json(request)): Valid<Json<BudgetRequest>>,
) -> Result<(StatusCode, Json<MutationResponse>), ApiError> {
    let draft = request.into_draft()?;
    let budget = state
        .budgets
        .create(draft, &actor(&headers))
        .await
        .map_err(|e| {
            error!("Failed to create budget: {}", e);
            ledger_error(e)
        })?;
    state.cache.invalidate_all();

    info!("Budget {} created", budget.id);
    Ok((
        StatusCode::CREATED,
        Json(MutationResponse::ok(
            budget.id.to_string(),
            "Budget created successfully",
        )),
    ))
}

/// Replace a budget
#[utoipa::path(
    put,
    path = "/api/v1/budgets/{budget_id}",
    tag = "budgets",
    params(
        ("budget_id" = Uuid, Path, description = "Budget ID"),
    ),
    request_body = BudgetRequest,
    responses(
        (status = 200, description = "Budget updated", body = MutationResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 404, description = "Budget not found", body = ErrorResponse),
        (status = 409, description = "Concurrent update, retry", body = ErrorResponse)
    )
)]
#[instrument(skip(state, headers))]
pub async fn update_budget(
    Path(budget_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Valid(Json(request)): Valid<Json<BudgetRequest>>,
) -> Result<Json<MutationResponse>, ApiError> {
    let draft = request.into_draft()?;
    state
        .budgets
        .update(budget_id, draft, &actor(&headers))
        .await
        .map_err(ledger_error)?;
    state.cache.invalidate_all();

    info!("Budget {} updated", budget_id);
    Ok(Json(MutationResponse::ok(
        budget_id.to_string(),
        "Budget updated successfully",
    )))
}

/// Delete a budget
#[utoipa::path(
    delete,
    path = "/api/v1/budgets/{budget_id}",
    tag = "budgets",
    params(
        ("budget_id" = Uuid, Path, description = "Budget ID"),
    ),
    responses(
        (status = 200, description = "Budget deleted", body = MutationResponse),
        (status = 404, description = "Budget not found", body = ErrorResponse)
    )
)]
#[instrument(skip(state, headers))]
pub async fn delete_budget(
    Path(budget_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MutationResponse>, ApiError> {
    state
        .budgets
        .delete(budget_id, &actor(&headers))
        .await
        .map_err(ledger_error)?;
    state.cache.invalidate_all();

    info!("Budget {} deleted", budget_id);
    Ok(Json(MutationResponse::ok(
        budget_id.to_string(),
        "Budget deleted successfully",
    )))
}
