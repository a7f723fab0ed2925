//! Folds transactions into [`Account`] snapshots.
//!
//! Only `approved` and `completed` transactions move an account. Payments
//! (`fee_payment`, `income`) raise `total_paid`; charges (`expense` billed to the
//! entity) raise `total_charged`. Nothing here reads a clock: the caller passes
//! `as_of`, so the same input always produces the same snapshot. A fold whose
//! totals would leave the `Decimal` range stops with [`AmountOverflow`].

use chrono::{DateTime, Utc};
use model::{Account, AmountOverflow, Transaction};
use rust_decimal::Decimal;

/// What a single transaction does to an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Charge(Decimal),
    Payment(Decimal),
    None,
}

/// The effect of `transaction` on the account of `entity_id`.
pub fn effect(entity_id: &str, transaction: &Transaction) -> Effect {
    if transaction.entity_id.as_deref() != Some(entity_id)
        || !transaction.status.counts_toward_balance()
    {
        return Effect::None;
    }
    if transaction.is_payment() {
        Effect::Payment(transaction.amount)
    } else if transaction.is_charge() {
        Effect::Charge(transaction.amount)
    } else {
        Effect::None
    }
}

/// Single fold step. Transactions for other entities or in a non-counting
/// status leave the figures unchanged but still restamp the account.
pub fn apply(
    account: Account,
    transaction: &Transaction,
    as_of: DateTime<Utc>,
) -> Result<Account, AmountOverflow> {
    match effect(account.entity_id(), transaction) {
        Effect::Charge(amount) => account.charge(amount, as_of),
        Effect::Payment(amount) => account.pay(amount, as_of),
        Effect::None => Ok(account.touch(as_of)),
    }
}

/// Full left-to-right fold of `transactions` into the account of `entity_id`.
pub fn project<'a, I>(
    entity_id: &str,
    transactions: I,
    as_of: DateTime<Utc>,
) -> Result<Account, AmountOverflow>
where
    I: IntoIterator<Item = &'a Transaction>,
{
    transactions
        .into_iter()
        .try_fold(Account::new(entity_id, as_of), |account, transaction| {
            apply(account, transaction, as_of)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use model::{TransactionStatus, TransactionType};
    use uuid::Uuid;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn tx(kind: TransactionType, cents: i64, status: TransactionStatus) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            entity_id: Some("S1".into()),
            kind,
            amount: Decimal::new(cents, 2),
            category: "tuition".into(),
            status,
            created_at: at(),
            description: None,
            reference: None,
            created_by: None,
            updated_at: None,
        }
    }

    #[test]
    fn single_completed_fee_payment() {
        let log = vec![tx(TransactionType::FeePayment, 15000, TransactionStatus::Completed)];
        let account = project("S1", &log, at()).unwrap();
        assert_eq!(account.total_paid(), Decimal::new(15000, 2));
        assert_eq!(account.total_charged(), Decimal::ZERO);
        assert_eq!(account.balance(), Decimal::new(-15000, 2));
        assert_eq!(account.updated_at(), at());
    }

    #[test]
    fn pending_and_rejected_are_skipped() {
        let log = vec![
            tx(TransactionType::Expense, 50000, TransactionStatus::Approved),
            tx(TransactionType::FeePayment, 20000, TransactionStatus::Pending),
            tx(TransactionType::Income, 10000, TransactionStatus::Rejected),
            tx(TransactionType::Income, 5000, TransactionStatus::Approved),
        ];
        let account = project("S1", &log, at()).unwrap();
        assert_eq!(account.total_charged(), Decimal::new(50000, 2));
        assert_eq!(account.total_paid(), Decimal::new(5000, 2));
        assert_eq!(account.balance(), Decimal::new(45000, 2));
    }

    #[test]
    fn ignores_other_entities_and_institution_level() {
        let mut other = tx(TransactionType::FeePayment, 100, TransactionStatus::Completed);
        other.entity_id = Some("S2".into());
        let mut institution = tx(TransactionType::Expense, 100, TransactionStatus::Approved);
        institution.entity_id = None;
        let account = project("S1", [&other, &institution], at()).unwrap();
        assert_eq!(account.balance(), Decimal::ZERO);
    }

    #[test]
    fn projection_is_deterministic() {
        let log: Vec<_> = (1..=50)
            .map(|i| {
                let kind = if i % 3 == 0 {
                    TransactionType::Expense
                } else {
                    TransactionType::FeePayment
                };
                tx(kind, i * 137, TransactionStatus::Completed)
            })
            .collect();
        let first = project("S1", &log, at()).unwrap();
        let second = project("S1", &log, at()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.balance().to_string(), second.balance().to_string());
    }

    #[test]
    fn no_drift_across_a_thousand_folds() {
        let charge = tx(TransactionType::Expense, 3333, TransactionStatus::Approved);
        let payment = tx(TransactionType::FeePayment, 1111, TransactionStatus::Completed);
        let mut account = Account::new("S1", at());
        for i in 0..1000 {
            let next = if i % 2 == 0 { &charge } else { &payment };
            account = apply(account, next, at()).unwrap();
            assert_eq!(account.balance(), account.total_charged() - account.total_paid());
        }
        assert_eq!(account.total_charged(), Decimal::new(3333 * 500, 2));
        assert_eq!(account.total_paid(), Decimal::new(1111 * 500, 2));
        assert_eq!(account.balance(), Decimal::new((3333 - 1111) * 500, 2));
    }

    #[test]
    fn apply_matches_project() {
        let log = vec![
            tx(TransactionType::Expense, 70000, TransactionStatus::Approved),
            tx(TransactionType::FeePayment, 25050, TransactionStatus::Completed),
        ];
        let stepped = log
            .iter()
            .try_fold(Account::new("S1", at()), |acc, t| apply(acc, t, at()))
            .unwrap();
        assert_eq!(stepped, project("S1", &log, at()).unwrap());
    }

    #[test]
    fn overflowing_totals_stop_the_fold() {
        let mut huge = tx(TransactionType::FeePayment, 0, TransactionStatus::Completed);
        huge.amount = Decimal::MAX;
        let log = vec![huge.clone(), huge];
        let err = project("S1", &log, at()).unwrap_err();
        assert_eq!(err.entity_id, "S1");
        assert_eq!(err.total, "total paid");
    }
}
