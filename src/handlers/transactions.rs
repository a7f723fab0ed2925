use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use axum_valid::Valid;
use chrono::{DateTime, NaiveDate, Utc};
use common::MAX_AMOUNT;
use compute::{
    SecondaryStatus, TransactionFilter,
    filter::{search, sort_newest_first},
};
use model::{NewTransaction, Transaction, TransactionStatus, TransactionType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, trace, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::{actor, date_range, parse_optional};
use crate::schemas::{
    ApiError, ApiResponse, AppState, ErrorResponse, MutationResponse, bad_request, ledger_error,
    not_found,
};

/// Query parameters for listing transactions
#[derive(Debug, Default, Deserialize, Serialize, ToSchema, IntoParams, Validate)]
#[into_params(parameter_in = Query)]
pub struct TransactionQuery {
    /// Only transactions of this entity
    pub entity_id: Option<String>,
    /// Exact category
    pub category: Option<String>,
    /// `pending`, `approved`, `completed` or `rejected`
    pub status: Option<String>,
    /// `income`, `expense` or `fee_payment`
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Inclusive start date (YYYY-MM-DD)
    pub start_date: Option<NaiveDate>,
    /// Inclusive end date (YYYY-MM-DD)
    pub end_date: Option<NaiveDate>,
    /// Case-insensitive text search on category, entity, description and reference
    #[validate(length(max = 100))]
    pub search: Option<String>,
}

impl TransactionQuery {
    pub fn to_filter(&self) -> Result<TransactionFilter, ApiError> {
        Ok(TransactionFilter {
            entity_id: self.entity_id.clone().filter(|id| !id.is_empty()),
            category: self.category.clone().filter(|category| !category.is_empty()),
            status: parse_optional(self.status.as_deref())?,
            kind: parse_optional(self.kind.as_deref())?,
            date_range: date_range(self.start_date, self.end_date)?,
        })
    }
}

/// Request body for recording a transaction
#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct CreateTransactionRequest {
    /// Student or other entity the transaction belongs to; omit for institution-level entries
    #[validate(length(min = 1, max = 128))]
    pub entity_id: Option<String>,
    /// `income`, `expense` or `fee_payment`
    #[serde(rename = "type")]
    pub kind: String,
    /// Positive amount with at most two decimal places, no larger than 1000000000000.00
    #[schema(value_type = String, example = "150.00")]
    #[validate(custom(function = "validate_amount"))]
    pub amount: Decimal,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    /// Initial status, `pending` when omitted
    pub status: Option<String>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    /// Voucher or receipt number
    #[validate(length(max = 100))]
    pub reference: Option<String>,
}

/// Request body for moving a transaction out of `pending`
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct UpdateStatusRequest {
    /// `approved`, `completed` or `rejected`
    pub status: String,
}

/// Transaction response model
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub entity_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub category: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub description: Option<String>,
    pub reference: Option<String>,
    pub created_by: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<Transaction> for TransactionResponse {
    fn from(transaction: Transaction) -> Self {
        Self {
            id: transaction.id,
            entity_id: transaction.entity_id,
            kind: transaction.kind.to_string(),
            amount: transaction.amount,
            category: transaction.category,
            status: transaction.status.to_string(),
            created_at: transaction.created_at,
            description: transaction.description,
            reference: transaction.reference,
            created_by: transaction.created_by,
            updated_at: transaction.updated_at,
        }
    }
}

/// Runs a transaction query and applies the free-text search, newest first.
pub async fn find_transactions(
    state: &AppState,
    filter: &TransactionFilter,
    term: Option<&str>,
) -> Result<Vec<TransactionResponse>, ApiError> {
    let mut transactions = state
        .reconciler
        .log()
        .query(filter)
        .await
        .map_err(ledger_error)?;
    if let Some(term) = term {
        transactions = search(&transactions, term);
    }
    sort_newest_first(&mut transactions);
    debug!("Found {} transactions", transactions.len());
    Ok(transactions.into_iter().map(TransactionResponse::from).collect())
}

fn sync_message(action: &str, secondary: SecondaryStatus) -> String {
    match secondary {
        SecondaryStatus::Deferred => {
            format!("Transaction {action}; accounting sync deferred")
        }
        _ => format!("Transaction {action} successfully"),
    }
}

/// Get transactions
#[utoipa::path(
    get,
    path = "/api/v1/transactions",
    tag = "transactions",
    params(TransactionQuery),
    responses(
        (status = 200, description = "Transactions retrieved successfully", body = ApiResponse<Vec<TransactionResponse>>),
        (status = 400, description = "Invalid filter", body = ErrorResponse),
        (status = 503, description = "Storage unavailable", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn get_transactions(
    State(state): State<AppState>,
    Valid(Query(query)): Valid<Query<TransactionQuery>>,
) -> Result<Json<ApiResponse<Vec<TransactionResponse>>>, ApiError> {
    trace!("Entering get_transactions function");
    let filter = query.to_filter()?;
    let transactions = find_transactions(&state, &filter, query.search.as_deref()).await?;
    info!("Successfully retrieved {} transactions", transactions.len());
    Ok(Json(ApiResponse::ok(
        transactions,
        "Transactions retrieved successfully",
    )))
}

/// Get expense transactions
#[utoipa::path(
    get,
    path = "/api/v1/expenses",
    tag = "transactions",
    params(TransactionQuery),
    responses(
        (status = 200, description = "Expenses retrieved successfully", body = ApiResponse<Vec<TransactionResponse>>),
        (status = 400, description = "Invalid filter", body = ErrorResponse),
        (status = 503, description = "Storage unavailable", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn get_expenses(
    State(state): State<AppState>,
    Valid(Query(query)): Valid<Query<TransactionQuery>>,
) -> Result<Json<ApiResponse<Vec<TransactionResponse>>>, ApiError> {
    let filter = TransactionFilter {
        kind: Some(TransactionType::Expense),
        ..query.to_filter()?
    };
    let expenses = find_transactions(&state, &filter, query.search.as_deref()).await?;
    info!("Successfully retrieved {} expenses", expenses.len());
    Ok(Json(ApiResponse::ok(expenses, "Expenses retrieved successfully")))
}

/// Get a transaction by ID
#[utoipa::path(
    get,
    path = "/api/v1/transactions/{transaction_id}",
    tag = "transactions",
    params(
        ("transaction_id" = Uuid, Path, description = "Transaction ID"),
    ),
    responses(
        (status = 200, description = "Transaction retrieved successfully", body = ApiResponse<TransactionResponse>),
        (status = 404, description = "Transaction not found", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn get_transaction(
    Path(transaction_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<TransactionResponse>>, ApiError> {
    match state.reconciler.log().get(transaction_id).await {
        Ok(Some(transaction)) => Ok(Json(ApiResponse::ok(
            TransactionResponse::from(transaction),
            "Transaction retrieved successfully",
        ))),
        Ok(None) => {
            warn!("Transaction with ID {} not found", transaction_id);
            Err(not_found(format!("Transaction {transaction_id} not found")))
        }
        Err(e) => Err(ledger_error(e)),
    }
}

fn validate_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount <= Decimal::ZERO || *amount > MAX_AMOUNT {
        let mut error = ValidationError::new("amount_range");
        error.message = Some(format!("amount must be above 0 and at most {MAX_AMOUNT}").into());
        return Err(error);
    }
    Ok(())
}

/// Record a transaction and sync the affected account
#[utoipa::path(
    post,
    path = "/api/v1/transactions",
    tag = "transactions",
    request_body = CreateTransactionRequest,
    responses(
        (status = 201, description = "Transaction recorded", body = MutationResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 409, description = "Concurrent update, retry", body = ErrorResponse),
        (status = 503, description = "Storage unavailable", body = ErrorResponse)
    )
)]
#[instrument(skip(state, headers))]
pub async fn create_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Valid(Json(request)): Valid<Json<CreateTransactionRequest>>,
) -> Result<(StatusCode, Json<MutationResponse>), ApiError> {
    trace!("Entering create_transaction function");
    let actor = actor(&headers);
    let kind: TransactionType = request
        .kind
        .parse()
        .map_err(|e: model::UnknownVariant| bad_request(e.to_string()))?;
    let status = parse_optional::<TransactionStatus>(request.status.as_deref())?
        .unwrap_or(TransactionStatus::Pending);

    let mut new = NewTransaction::new(kind, request.amount, request.category)
        .with_status(status)
        .created_by(actor.user_id.clone());
    if let Some(entity_id) = request.entity_id {
        new = new.for_entity(entity_id);
    }
    if let Some(description) = request.description {
        new = new.with_description(description);
    }
    if let Some(reference) = request.reference {
        new = new.with_reference(reference);
    }

    let outcome = state
        .reconciler
        .record_and_sync(new, &actor)
        .await
        .map_err(|e| {
            error!("Failed to record transaction: {}", e);
            ledger_error(e)
        })?;
    state.cache.invalidate_all();

    let transaction = &outcome.transaction;

    info!(
        "Transaction {} recorded, accounting sync {:?}",
        transaction.id, outcome.secondary
    );
    Ok((
        StatusCode::CREATED,
        Json(MutationResponse::ok(
            transaction.id.to_string(),
            sync_message("recorded", outcome.secondary),
        )),
    ))
}

/// Approve, complete or reject a pending transaction
#[utoipa::path(
    put,
    path = "/api/v1/transactions/{transaction_id}/status",
    tag = "transactions",
    params(
        ("transaction_id" = Uuid, Path, description = "Transaction ID"),
    ),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = MutationResponse),
        (status = 400, description = "Invalid status or transition", body = ErrorResponse),
        (status = 404, description = "Transaction not found", body = ErrorResponse),
        (status = 409, description = "Concurrent update, retry", body = ErrorResponse)
    )
)]
#[instrument(skip(state, headers))]
pub async fn update_transaction_status(
    Path(transaction_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<MutationResponse>, ApiError> {
    let actor = actor(&headers);
    let status: TransactionStatus = request
        .status
        .parse()
        .map_err(|e: model::UnknownVariant| bad_request(e.to_string()))?;

    let outcome = state
        .reconciler
        .update_status_and_sync(transaction_id, status, &actor)
        .await
        .map_err(ledger_error)?;
    state.cache.invalidate_all();

    info!("Transaction {} is now {}", transaction_id, status);
    Ok(Json(MutationResponse::ok(
        transaction_id.to_string(),
        sync_message(status.as_str(), outcome.secondary),
    )))
}

/// Transactions are never deleted
#[utoipa::path(
    delete,
    path = "/api/v1/transactions/{transaction_id}",
    tag = "transactions",
    params(
        ("transaction_id" = Uuid, Path, description = "Transaction ID"),
    ),
    responses(
        (status = 409, description = "Deletion refused", body = MutationResponse)
    )
)]
#[instrument]
pub async fn delete_transaction(
    Path(transaction_id): Path<Uuid>,
) -> (StatusCode, Json<MutationResponse>) {
    warn!("Refusing to delete transaction {}", transaction_id);
    (
        StatusCode::CONFLICT,
        Json(MutationResponse::refused(
            "Transactions cannot be deleted for audit purposes; reject it instead",
        )),
    )
}
