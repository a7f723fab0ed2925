use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    response::Json,
};
use axum_valid::Valid;
use chrono::NaiveDate;
use compute::{LedgerSummary, TransactionFilter, summarize};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::date_range;
use crate::schemas::{ApiError, ApiResponse, AppState, CachedData, ErrorResponse, ledger_error};

/// Query parameters for the ledger summary
#[derive(Debug, Default, Deserialize, Serialize, ToSchema, IntoParams, Validate)]
#[into_params(parameter_in = Query)]
pub struct SummaryQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Restrict the summary to one entity
    #[validate(length(min = 1, max = 128))]
    pub entity_id: Option<String>,
}

impl SummaryQuery {
    fn cache_key(&self) -> String {
        let part = |value: Option<String>| value.unwrap_or_default();
        format!(
            "summary:{}:{}:{}",
            part(self.start_date.map(|date| date.to_string())),
            part(self.end_date.map(|date| date.to_string())),
            part(self.entity_id.clone()),
        )
    }
}

/// Ledger totals over the selected transactions
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SummaryResponse {
    #[schema(value_type = String)]
    pub income: Decimal,
    #[schema(value_type = String)]
    pub expenses: Decimal,
    #[schema(value_type = String)]
    pub fee_payments: Decimal,
    /// `income + fee_payments - expenses`, approved and completed only
    #[schema(value_type = String)]
    pub net: Decimal,
    pub transaction_count: usize,
    /// Number of transactions per status
    pub counts: BTreeMap<String, usize>,
}

impl From<LedgerSummary> for SummaryResponse {
    fn from(summary: LedgerSummary) -> Self {
        Self {
            income: summary.income,
            expenses: summary.expenses,
            fee_payments: summary.fee_payments,
            net: summary.net,
            transaction_count: summary.transaction_count,
            counts: summary
                .counts
                .into_iter()
                .map(|(status, count)| (status.to_string(), count))
                .collect(),
        }
    }
}

/// Summarize the ledger
#[utoipa::path(
    get,
    path = "/api/v1/reports/summary",
    tag = "reports",
    params(SummaryQuery),
    responses(
        (status = 200, description = "Summary computed successfully", body = ApiResponse<SummaryResponse>),
        (status = 400, description = "Invalid date range", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn get_summary(
    State(state): State<AppState>,
    Valid(Query(query)): Valid<Query<SummaryQuery>>,
) -> Result<Json<ApiResponse<SummaryResponse>>, ApiError> {
    let range = date_range(query.start_date, query.end_date)?;
    let key = query.cache_key();

    let summary = match state.cache.get(&key).await {
        Some(CachedData::Summary(summary)) => {
            debug!(%key, "Summary served from cache");
            summary
        }
        _ => {
            let filter = TransactionFilter {
                entity_id: query.entity_id.clone(),
                date_range: range,
                ..Default::default()
            };
            let transactions = state
                .reconciler
                .log()
                .query(&filter)
                .await
                .map_err(ledger_error)?;
            let summary = summarize(&transactions).map_err(ledger_error)?;
            state
                .cache
                .insert(key, CachedData::Summary(summary.clone()))
                .await;
            summary
        }
    };

    info!(
        "Summary over {} transactions, net {}",
        summary.transaction_count, summary.net
    );
    Ok(Json(ApiResponse::ok(
        SummaryResponse::from(summary),
        "Summary computed successfully",
    )))
}
