use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A running total left the range a `Decimal` can hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{total} overflowed for account '{entity_id}'")]
pub struct AmountOverflow {
    pub entity_id: String,
    pub total: &'static str,
}

/// One entity's financial standing as stored under `accounts/{entityId}`.
///
/// `balance` is always `total_charged - total_paid`. It is never stored
/// independently: every constructor and mutator recomputes it, and a document
/// read back from a store has its balance rederived from the two totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "AccountDocument")]
pub struct Account {
    entity_id: String,
    total_charged: Decimal,
    total_paid: Decimal,
    balance: Decimal,
    updated_at: DateTime<Utc>,
    /// Primary-store document version this snapshot was produced at.
    #[serde(default)]
    version: u64,
}

/// Wire shape of an [`Account`]; the stored balance is ignored on read.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountDocument {
    entity_id: String,
    total_charged: Decimal,
    total_paid: Decimal,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    version: u64,
}

impl From<AccountDocument> for Account {
    fn from(doc: AccountDocument) -> Self {
        Account::with_totals(doc.entity_id, doc.total_charged, doc.total_paid, doc.updated_at)
            .with_version(doc.version)
    }
}

impl Account {
    /// An empty account, as created lazily on the first transaction for `entity_id`.
    pub fn new(entity_id: impl Into<String>, as_of: DateTime<Utc>) -> Self {
        Self::with_totals(entity_id, Decimal::ZERO, Decimal::ZERO, as_of)
    }

    pub fn with_totals(
        entity_id: impl Into<String>,
        total_charged: Decimal,
        total_paid: Decimal,
        as_of: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            total_charged,
            total_paid,
            balance: total_charged - total_paid,
            updated_at: as_of,
            version: 0,
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Adds a charge and restamps the account.
    pub fn charge(mut self, amount: Decimal, as_of: DateTime<Utc>) -> Result<Self, AmountOverflow> {
        self.total_charged = self
            .total_charged
            .checked_add(amount)
            .ok_or_else(|| self.overflow("total charged"))?;
        self.checked_restamp(as_of)
    }

    /// Adds a payment and restamps the account.
    pub fn pay(mut self, amount: Decimal, as_of: DateTime<Utc>) -> Result<Self, AmountOverflow> {
        self.total_paid = self
            .total_paid
            .checked_add(amount)
            .ok_or_else(|| self.overflow("total paid"))?;
        self.checked_restamp(as_of)
    }

    /// Restamps the account without changing its figures.
    pub fn touch(self, as_of: DateTime<Utc>) -> Self {
        self.restamp(as_of)
    }

    fn checked_restamp(self, as_of: DateTime<Utc>) -> Result<Self, AmountOverflow> {
        if self.total_charged.checked_sub(self.total_paid).is_none() {
            return Err(self.overflow("balance"));
        }
        Ok(self.restamp(as_of))
    }

    fn overflow(&self, total: &'static str) -> AmountOverflow {
        AmountOverflow {
            entity_id: self.entity_id.clone(),
            total,
        }
    }

    fn restamp(mut self, as_of: DateTime<Utc>) -> Self {
        self.balance = self.total_charged - self.total_paid;
        self.updated_at = as_of;
        self
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn total_charged(&self) -> Decimal {
        self.total_charged
    }

    pub fn total_paid(&self) -> Decimal {
        self.total_paid
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Compares the ledger figures only, ignoring timestamps and versions.
    pub fn same_figures(&self, other: &Account) -> bool {
        self.entity_id == other.entity_id
            && self.total_charged == other.total_charged
            && self.total_paid == other.total_paid
    }
}
