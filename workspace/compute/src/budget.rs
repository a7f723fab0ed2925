//! Budgets and their utilization against approved expenses.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use common::{
    DateRange, MAX_AMOUNT, checked_sum, has_sub_minor_precision, normalize_amount, percent_of,
};
use model::{
    Actor, AuditAction, Budget, BudgetPeriod, Transaction, TransactionStatus, TransactionType,
    paths,
    store::{LedgerStore, Precondition, WriteOp},
};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    audit,
    error::{LedgerError, Result},
    filter::sort_newest_first,
    log::{TransactionFilter, TransactionLog},
};

/// Caller-supplied budget fields, used for both create and update.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetDraft {
    pub name: String,
    pub category: String,
    pub amount: Decimal,
    pub period: BudgetPeriod,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl BudgetDraft {
    fn validate(self) -> Result<Self> {
        let name = self.name.trim().to_string();
        let category = self.category.trim().to_string();
        if name.is_empty() {
            return Err(LedgerError::validation("budget name must not be blank"));
        }
        if category.is_empty() {
            return Err(LedgerError::validation("budget category must not be blank"));
        }
        if self.amount <= Decimal::ZERO
            || self.amount > MAX_AMOUNT
            || has_sub_minor_precision(self.amount)
        {
            return Err(LedgerError::validation(format!(
                "budget amount must be a positive currency amount, got {}",
                self.amount
            )));
        }
        if self.start_date > self.end_date {
            return Err(LedgerError::validation(format!(
                "budget starts {} after it ends {}",
                self.start_date, self.end_date
            )));
        }
        Ok(Self {
            name,
            category,
            amount: normalize_amount(self.amount),
            ..self
        })
    }
}

/// A budget together with what has been spent against it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetUtilization {
    #[serde(flatten)]
    pub budget: Budget,
    pub spent: Decimal,
    pub remaining: Decimal,
    pub utilization_percent: Decimal,
}

/// Sums approved expenses in the budget's category and period.
pub fn budget_utilization(budget: &Budget, transactions: &[Transaction]) -> Result<BudgetUtilization> {
    let overflow = || {
        LedgerError::validation(format!("spending against budget {} overflowed", budget.id))
    };
    let range = DateRange::new(budget.start_date, budget.end_date);
    let counted = transactions
        .iter()
        .filter(|transaction| {
            transaction.kind == TransactionType::Expense
                && transaction.status == TransactionStatus::Approved
                && transaction.category == budget.category
                && range
                    .as_ref()
                    .is_some_and(|range| range.contains(&transaction.created_at))
        })
        .map(|transaction| transaction.amount);
    let spent = checked_sum(counted).ok_or_else(overflow)?;
    let remaining = budget.amount.checked_sub(spent).ok_or_else(overflow)?;
    let utilization_percent = percent_of(spent, budget.amount).ok_or_else(overflow)?;

    Ok(BudgetUtilization {
        budget: budget.clone(),
        spent: normalize_amount(spent),
        remaining: normalize_amount(remaining),
        utilization_percent,
    })
}

#[derive(Debug, Clone)]
pub struct BudgetBook {
    store: Arc<dyn LedgerStore>,
    log: TransactionLog,
}

impl BudgetBook {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        let log = TransactionLog::new(store.clone());
        Self { store, log }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Budget>> {
        match self.store.get(&paths::budget(id)).await? {
            Some(document) => Ok(Some(document.decode()?)),
            None => Ok(None),
        }
    }

    /// All budgets, newest first.
    pub async fn list(&self) -> Result<Vec<Budget>> {
        let mut budgets = self
            .store
            .list(paths::BUDGETS)
            .await?
            .iter()
            .map(|document| document.decode::<Budget>())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        sort_newest_first(&mut budgets);
        Ok(budgets)
    }

    /// Stores a new budget and its audit entry in one commit.
    #[instrument(skip(self, draft, actor), fields(user_id = %actor.user_id))]
    pub async fn create(&self, draft: BudgetDraft, actor: &Actor) -> Result<Budget> {
        let draft = draft.validate()?;
        let budget = Budget {
            id: Uuid::new_v4(),
            name: draft.name,
            category: draft.category,
            amount: draft.amount,
            period: draft.period,
            start_date: draft.start_date,
            end_date: draft.end_date,
            created_at: Utc::now(),
            updated_at: None,
        };
        let entry = audit::entry(
            AuditAction::Create,
            "budget",
            budget.id,
            actor,
            json!({ "name": budget.name, "category": budget.category, "amount": budget.amount }),
        );
        self.store
            .commit(vec![
                WriteOp::create(paths::budget(budget.id), serde_json::to_value(&budget)?),
                audit::create_op(&entry)?,
            ])
            .await?;
        info!(id = %budget.id, "created budget");
        Ok(budget)
    }

    /// Replaces the editable fields of a budget.
    #[instrument(skip(self, draft, actor), fields(user_id = %actor.user_id))]
    pub async fn update(&self, id: Uuid, draft: BudgetDraft, actor: &Actor) -> Result<Budget> {
        let draft = draft.validate()?;
        let path = paths::budget(id);
        let document = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("budget {id}")))?;
        let current: Budget = document.decode()?;

        let updated = Budget {
            name: draft.name,
            category: draft.category,
            amount: draft.amount,
            period: draft.period,
            start_date: draft.start_date,
            end_date: draft.end_date,
            updated_at: Some(Utc::now()),
            ..current.clone()
        };
        let entry = audit::entry(
            AuditAction::Update,
            "budget",
            id,
            actor,
            json!({ "before": current, "after": updated }),
        );
        self.store
            .commit(vec![
                WriteOp::put_if(
                    path,
                    serde_json::to_value(&updated)?,
                    Precondition::Version(document.version),
                ),
                audit::create_op(&entry)?,
            ])
            .await?;
        info!(%id, "updated budget");
        Ok(updated)
    }

    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn delete(&self, id: Uuid, actor: &Actor) -> Result<()> {
        let path = paths::budget(id);
        let document = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("budget {id}")))?;
        let entry = audit::entry(AuditAction::Delete, "budget", id, actor, document.value.clone());
        self.store
            .commit(vec![
                WriteOp::Remove {
                    path,
                    expect: Precondition::Version(document.version),
                },
                audit::create_op(&entry)?,
            ])
            .await?;
        info!(%id, "deleted budget");
        Ok(())
    }

    /// Every budget with its utilization, newest first.
    pub async fn utilization(&self) -> Result<Vec<BudgetUtilization>> {
        let budgets = self.list().await?;
        if budgets.is_empty() {
            return Ok(Vec::new());
        }
        let expenses = self.approved_expenses().await?;
        budgets
            .iter()
            .map(|budget| budget_utilization(budget, &expenses))
            .collect()
    }

    /// One budget with its utilization.
    pub async fn report(&self, id: Uuid) -> Result<Option<BudgetUtilization>> {
        let Some(budget) = self.get(id).await? else {
            return Ok(None);
        };
        let expenses = self.approved_expenses().await?;
        budget_utilization(&budget, &expenses).map(Some)
    }

    async fn approved_expenses(&self) -> Result<Vec<Transaction>> {
        self.log
            .query(&TransactionFilter {
                kind: Some(TransactionType::Expense),
                status: Some(TransactionStatus::Approved),
                ..TransactionFilter::default()
            })
            .await
    }
}
