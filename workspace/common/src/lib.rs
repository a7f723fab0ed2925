//! Common primitives shared between the service and the ledger crates.
//! These are the transport envelopes returned to the dashboard and the small
//! money/date helpers that every layer has to agree on.

mod dates;
mod money;

pub use dates::DateRange;
pub use money::{
    checked_sum, has_sub_minor_precision, is_normalized, normalize_amount, percent_of, MAX_AMOUNT,
    MINOR_UNIT_SCALE,
};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Envelope for read-only queries: `{ data, message, success }`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Response data
    pub data: T,
    /// Response message
    pub message: String,
    /// Success flag
    pub success: bool,
}

impl<T> ApiResponse<T> {
    /// Wraps `data` in a successful envelope.
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            data,
            message: message.into(),
            success: true,
        }
    }
}

/// Envelope for create/update/delete calls: `{ success, id?, message }`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct MutationResponse {
    /// Success flag
    pub success: bool,
    /// Identifier of the created or touched record, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Human readable outcome
    pub message: String,
}

impl MutationResponse {
    pub fn ok(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            id: Some(id.into()),
            message: message.into(),
        }
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Self {
            success: false,
            id: None,
            message: message.into(),
        }
    }
}
