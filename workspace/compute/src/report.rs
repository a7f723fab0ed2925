use std::collections::BTreeMap;

use common::normalize_amount;
use model::{Transaction, TransactionStatus, TransactionType};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{LedgerError, Result};

/// Totals over a set of transactions.
///
/// Amounts only include transactions that count toward balances (approved or
/// completed); `counts` covers every status.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSummary {
    pub income: Decimal,
    pub expenses: Decimal,
    pub fee_payments: Decimal,
    /// `income + fee_payments - expenses`
    pub net: Decimal,
    pub transaction_count: usize,
    pub counts: BTreeMap<TransactionStatus, usize>,
}

/// Fails with a validation error when a total leaves the `Decimal` range.
pub fn summarize(transactions: &[Transaction]) -> Result<LedgerSummary> {
    let mut income = Decimal::ZERO;
    let mut expenses = Decimal::ZERO;
    let mut fee_payments = Decimal::ZERO;
    let mut counts: BTreeMap<TransactionStatus, usize> = TransactionStatus::ALL
        .into_iter()
        .map(|status| (status, 0))
        .collect();

    for transaction in transactions {
        *counts.entry(transaction.status).or_default() += 1;
        if !transaction.status.counts_toward_balance() {
            continue;
        }
        let total = match transaction.kind {
            TransactionType::Income => &mut income,
            TransactionType::Expense => &mut expenses,
            TransactionType::FeePayment => &mut fee_payments,
        };
        *total = total
            .checked_add(transaction.amount)
            .ok_or_else(|| overflow(transaction.kind.as_str()))?;
    }
    let net = income
        .checked_add(fee_payments)
        .and_then(|paid_in| paid_in.checked_sub(expenses))
        .ok_or_else(|| overflow("net"))?;

    Ok(LedgerSummary {
        income: normalize_amount(income),
        expenses: normalize_amount(expenses),
        fee_payments: normalize_amount(fee_payments),
        net: normalize_amount(net),
        transaction_count: transactions.len(),
        counts,
    })
}

fn overflow(total: &str) -> LedgerError {
    LedgerError::validation(format!("{total} total overflowed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn tx(kind: TransactionType, cents: i64, status: TransactionStatus) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            entity_id: None,
            kind,
            amount: Decimal::new(cents, 2),
            category: "general".into(),
            status,
            created_at: Utc::now(),
            description: None,
            reference: None,
            created_by: None,
            updated_at: None,
        }
    }

    #[test]
    fn totals_only_counting_statuses() {
        let summary = summarize(&[
            tx(TransactionType::Income, 100000, TransactionStatus::Approved),
            tx(TransactionType::FeePayment, 25000, TransactionStatus::Completed),
            tx(TransactionType::Expense, 40000, TransactionStatus::Approved),
            tx(TransactionType::Expense, 99900, TransactionStatus::Pending),
            tx(TransactionType::Income, 500, TransactionStatus::Rejected),
        ])
        .unwrap();
        assert_eq!(summary.income.to_string(), "1000.00");
        assert_eq!(summary.fee_payments.to_string(), "250.00");
        assert_eq!(summary.expenses.to_string(), "400.00");
        assert_eq!(summary.net.to_string(), "850.00");
        assert_eq!(summary.transaction_count, 5);
        assert_eq!(summary.counts[&TransactionStatus::Pending], 1);
        assert_eq!(summary.counts[&TransactionStatus::Approved], 2);
    }

    #[test]
    fn empty_summary_has_zero_counts() {
        let summary = summarize(&[]).unwrap();
        assert_eq!(summary.net, Decimal::ZERO);
        assert_eq!(summary.counts.len(), 4);
        assert!(summary.counts.values().all(|count| *count == 0));
    }

    #[test]
    fn overflowing_totals_are_rejected() {
        let mut huge = tx(TransactionType::Income, 0, TransactionStatus::Approved);
        huge.amount = Decimal::MAX;
        let result = summarize(&[huge.clone(), huge]);
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }
}
