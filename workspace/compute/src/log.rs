//! Append-only transaction log kept in the primary store.

use std::sync::Arc;

use chrono::Utc;
use common::{DateRange, MAX_AMOUNT, has_sub_minor_precision, is_normalized, normalize_amount};
use model::{
    NewTransaction, Transaction, TransactionStatus, TransactionType, paths,
    store::{LedgerStore, WriteOp},
};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use crate::error::{LedgerError, Result};

/// Criteria for [`TransactionLog::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionFilter {
    pub entity_id: Option<String>,
    pub category: Option<String>,
    pub status: Option<TransactionStatus>,
    pub kind: Option<TransactionType>,
    pub date_range: Option<DateRange>,
}

impl TransactionFilter {
    pub fn for_entity(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, transaction: &Transaction) -> bool {
        self.entity_id
            .as_deref()
            .is_none_or(|entity_id| transaction.entity_id.as_deref() == Some(entity_id))
            && self
                .category
                .as_deref()
                .is_none_or(|category| transaction.category == category)
            && self.status.is_none_or(|status| transaction.status == status)
            && self.kind.is_none_or(|kind| transaction.kind == kind)
            && self
                .date_range
                .as_ref()
                .is_none_or(|range| range.contains(&transaction.created_at))
    }
}

/// Checks a caller-supplied transaction and turns it into a storable one.
///
/// The amount must be positive, no larger than [`MAX_AMOUNT`] and representable
/// in minor units; it is normalised to two decimal places. Category must not be blank; an entity id,
/// when present, must be non-blank and usable as a path segment.
pub fn validate(new: NewTransaction) -> Result<Transaction> {
    if new.amount <= Decimal::ZERO {
        return Err(LedgerError::validation(format!(
            "amount must be greater than zero, got {}",
            new.amount
        )));
    }
    if new.amount > MAX_AMOUNT {
        return Err(LedgerError::validation(format!(
            "amount {} exceeds the maximum of {MAX_AMOUNT}",
            new.amount
        )));
    }
    if has_sub_minor_precision(new.amount) {
        return Err(LedgerError::validation(format!(
            "amount {} has more precision than the currency minor unit",
            new.amount
        )));
    }
    let amount = normalize_amount(new.amount);
    if !is_normalized(amount) {
        return Err(LedgerError::validation(format!(
            "amount {} cannot be stored in minor units",
            new.amount
        )));
    }
    let category = new.category.trim();
    if category.is_empty() {
        return Err(LedgerError::validation("category must not be blank"));
    }
    let entity_id = match new.entity_id {
        Some(entity_id) => {
            let entity_id = entity_id.trim().to_string();
            if entity_id.is_empty() {
                return Err(LedgerError::validation("entity id must not be blank"));
            }
            if entity_id.contains('/') {
                return Err(LedgerError::validation(format!(
                    "entity id '{entity_id}' must not contain '/'"
                )));
            }
            Some(entity_id)
        }
        None => None,
    };

    Ok(Transaction {
        id: Uuid::new_v4(),
        entity_id,
        kind: new.kind,
        amount,
        category: category.to_string(),
        status: new.status,
        created_at: new.created_at.unwrap_or_else(Utc::now),
        description: new.description.filter(|text| !text.trim().is_empty()),
        reference: new.reference.filter(|text| !text.trim().is_empty()),
        created_by: new.created_by,
        updated_at: None,
    })
}

/// Sorts by `created_at` ascending, ties broken by id.
pub fn sort_chronologically(transactions: &mut [Transaction]) {
    transactions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

#[derive(Debug, Clone)]
pub struct TransactionLog {
    store: Arc<dyn LedgerStore>,
}

impl TransactionLog {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Appends a transaction without touching any account.
    ///
    /// Used for institution-level transactions; entity transactions go through
    /// [`crate::Reconciler::record_and_sync`] so the account moves with them.
    #[instrument(skip(self, new), fields(store = %self.store.name()))]
    pub async fn append(&self, new: NewTransaction) -> Result<Uuid> {
        let transaction = validate(new)?;
        self.store
            .commit(vec![WriteOp::create(
                paths::transaction(transaction.id),
                serde_json::to_value(&transaction)?,
            )])
            .await?;
        debug!(id = %transaction.id, "appended transaction");
        Ok(transaction.id)
    }

    #[instrument(skip(self), fields(store = %self.store.name()))]
    pub async fn get(&self, id: Uuid) -> Result<Option<Transaction>> {
        match self.store.get(&paths::transaction(id)).await? {
            Some(document) => Ok(Some(document.decode()?)),
            None => Ok(None),
        }
    }

    /// Matching transactions, oldest first.
    ///
    /// Entity filters are pushed down to the store as a field query; the other
    /// criteria are applied in memory.
    #[instrument(skip(self), fields(store = %self.store.name()))]
    pub async fn query(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>> {
        let documents = match &filter.entity_id {
            Some(entity_id) => {
                self.store
                    .query(paths::TRANSACTIONS, "entityId", &Value::from(entity_id.as_str()))
                    .await?
            }
            None => self.store.list(paths::TRANSACTIONS).await?,
        };

        let mut transactions = documents
            .iter()
            .map(|document| document.decode::<Transaction>())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        transactions.retain(|transaction| filter.matches(transaction));
        sort_chronologically(&mut transactions);

        trace!(count = transactions.len(), "queried transactions");
        Ok(transactions)
    }
}
