use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Raised when a textual enum value is outside its enumerated set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Direction of a financial event. Amounts are always positive; the type carries the sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Income,
    Expense,
    FeePayment,
}

impl TransactionType {
    pub const ALL: [TransactionType; 3] = [Self::Income, Self::Expense, Self::FeePayment];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
            Self::FeePayment => "fee_payment",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "transaction type",
                value: s.to_string(),
            })
    }
}

/// Lifecycle of a transaction. `Completed` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Approved,
    Completed,
    Rejected,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 4] = [
        Self::Pending,
        Self::Approved,
        Self::Completed,
        Self::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected)
    }

    /// Whether a transaction in this status affects an account balance.
    pub fn counts_toward_balance(&self) -> bool {
        matches!(self, Self::Approved | Self::Completed)
    }

    /// A status changes at most once, and only out of `Pending`.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        *self == Self::Pending && next != Self::Pending
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "transaction status",
                value: s.to_string(),
            })
    }
}

/// A single financial event as stored under `transactions/{id}`.
///
/// `entity_id` is `None` for institution-level transactions that do not belong
/// to any student account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub entity_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub amount: Decimal,
    pub category: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub description: Option<String>,
    /// Voucher or receipt number.
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn is_charge(&self) -> bool {
        self.entity_id.is_some() && self.kind == TransactionType::Expense
    }

    pub fn is_payment(&self) -> bool {
        matches!(self.kind, TransactionType::Income | TransactionType::FeePayment)
    }
}

/// Caller-supplied fields of a transaction before it is validated and given an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub entity_id: Option<String>,
    pub kind: TransactionType,
    pub amount: Decimal,
    pub category: String,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub reference: Option<String>,
    pub created_by: Option<String>,
    /// Defaults to the time of validation.
    pub created_at: Option<DateTime<Utc>>,
}

impl NewTransaction {
    /// Creates a pending transaction with no entity.
    pub fn new(kind: TransactionType, amount: Decimal, category: impl Into<String>) -> Self {
        Self {
            entity_id: None,
            kind,
            amount,
            category: category.into(),
            status: TransactionStatus::Pending,
            description: None,
            reference: None,
            created_by: None,
            created_at: None,
        }
    }

    pub fn for_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn created_by(mut self, user: impl Into<String>) -> Self {
        self.created_by = Some(user.into());
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }
}
