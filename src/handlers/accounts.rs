use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use axum_valid::Valid;
use chrono::{DateTime, Utc};
use compute::TransactionFilter;
use model::Account;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::transactions::{TransactionQuery, TransactionResponse, find_transactions};
use crate::schemas::{ApiError, ApiResponse, AppState, ErrorResponse, ledger_error, not_found};

/// Query parameters for listing accounts
#[derive(Debug, Deserialize, Serialize, ToSchema, IntoParams, Validate)]
#[into_params(parameter_in = Query)]
pub struct AccountsQuery {
    /// Case-insensitive match on the entity id
    #[validate(length(max = 100))]
    pub search: Option<String>,
}

/// Account response model
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AccountResponse {
    pub entity_id: String,
    #[schema(value_type = String)]
    pub total_charged: Decimal,
    #[schema(value_type = String)]
    pub total_paid: Decimal,
    /// `total_charged - total_paid`; negative when the entity has paid ahead
    #[schema(value_type = String)]
    pub balance: Decimal,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            entity_id: account.entity_id().to_string(),
            total_charged: account.total_charged(),
            total_paid: account.total_paid(),
            balance: account.balance(),
            updated_at: account.updated_at(),
            version: account.version(),
        }
    }
}

/// Get all accounts
#[utoipa::path(
    get,
    path = "/api/v1/accounts",
    tag = "accounts",
    params(AccountsQuery),
    responses(
        (status = 200, description = "Accounts retrieved successfully", body = ApiResponse<Vec<AccountResponse>>),
        (status = 503, description = "Storage unavailable", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn get_accounts(
    State(state): State<AppState>,
    Valid(Query(query)): Valid<Query<AccountsQuery>>,
) -> Result<Json<ApiResponse<Vec<AccountResponse>>>, ApiError> {
    trace!("Entering get_accounts function");
    let mut accounts = state.reconciler.accounts().await.map_err(ledger_error)?;
    debug!("Retrieved {} accounts from the primary store", accounts.len());

    if let Some(term) = query.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let needle = term.to_lowercase();
        accounts.retain(|account| account.entity_id().to_lowercase().contains(&needle));
    }

    info!("Successfully retrieved {} accounts", accounts.len());
    Ok(Json(ApiResponse::ok(
        accounts.into_iter().map(AccountResponse::from).collect(),
        "Accounts retrieved successfully",
    )))
}

/// Get the primary copy of an account
#[utoipa::path(
    get,
    path = "/api/v1/accounts/{entity_id}",
    tag = "accounts",
    params(
        ("entity_id" = String, Path, description = "Entity ID"),
    ),
    responses(
        (status = 200, description = "Account retrieved successfully", body = ApiResponse<AccountResponse>),
        (status = 404, description = "Account not found", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn get_account(
    Path(entity_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<AccountResponse>>, ApiError> {
    match state.reconciler.account(&entity_id).await {
        Ok(Some(account)) => {
            info!("Successfully retrieved account {}", entity_id);
            Ok(Json(ApiResponse::ok(
                AccountResponse::from(account),
                "Account retrieved successfully",
            )))
        }
        Ok(None) => {
            warn!("Account {} not found", entity_id);
            Err(not_found(format!("Account {entity_id} not found")))
        }
        Err(e) => Err(ledger_error(e)),
    }
}

/// Get the transactions of an account
#[utoipa::path(
    get,
    path = "/api/v1/accounts/{entity_id}/transactions",
    tag = "accounts",
    params(
        ("entity_id" = String, Path, description = "Entity ID"),
        TransactionQuery,
    ),
    responses(
        (status = 200, description = "Transactions retrieved successfully", body = ApiResponse<Vec<TransactionResponse>>),
        (status = 400, description = "Invalid filter", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn get_account_transactions(
    Path(entity_id): Path<String>,
    State(state): State<AppState>,
    Valid(Query(query)): Valid<Query<TransactionQuery>>,
) -> Result<Json<ApiResponse<Vec<TransactionResponse>>>, ApiError> {
    let filter = TransactionFilter {
        entity_id: Some(entity_id.clone()),
        ..query.to_filter()?
    };
    let transactions = find_transactions(&state, &filter, query.search.as_deref()).await?;
    info!(
        "Successfully retrieved {} transactions for account {}",
        transactions.len(),
        entity_id
    );
    Ok(Json(ApiResponse::ok(
        transactions,
        "Transactions retrieved successfully",
    )))
}
