//! Stateless filters over slices of ledger records.

use chrono::{DateTime, Utc};
use common::DateRange;
use model::{AuditLogEntry, Budget, Transaction, TransactionStatus};

/// Records with a point in time to filter and sort on.
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Records that can be matched by free-text search.
pub trait Searchable {
    /// The text fields a search looks at.
    fn search_fields(&self) -> Vec<&str>;
}

pub trait Categorized {
    fn category(&self) -> &str;
}

impl Timestamped for Transaction {
    fn timestamp(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Timestamped for AuditLogEntry {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for Budget {
    fn timestamp(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Searchable for Transaction {
    fn search_fields(&self) -> Vec<&str> {
        [
            Some(self.category.as_str()),
            self.entity_id.as_deref(),
            self.description.as_deref(),
            self.reference.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

impl Searchable for AuditLogEntry {
    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.entity.as_str(), self.entity_id.as_str(), self.user_id.as_str()];
        if let Some(email) = &self.user_email {
            fields.push(email);
        }
        fields
    }
}

impl Searchable for Budget {
    fn search_fields(&self) -> Vec<&str> {
        vec![self.name.as_str(), self.category.as_str()]
    }
}

impl Categorized for Transaction {
    fn category(&self) -> &str {
        &self.category
    }
}

impl Categorized for Budget {
    fn category(&self) -> &str {
        &self.category
    }
}

/// Items inside `range`, the end date counting through its final instant.
pub fn filter_by_date_range<T: Timestamped + Clone>(items: &[T], range: &DateRange) -> Vec<T> {
    items
        .iter()
        .filter(|item| range.contains(&item.timestamp()))
        .cloned()
        .collect()
}

/// Case-insensitive substring match over each item's search fields.
/// A blank term matches everything.
pub fn search<T: Searchable + Clone>(items: &[T], term: &str) -> Vec<T> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return items.to_vec();
    }
    items
        .iter()
        .filter(|item| {
            item.search_fields()
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
        })
        .cloned()
        .collect()
}

pub fn filter_by_status(transactions: &[Transaction], status: TransactionStatus) -> Vec<Transaction> {
    transactions
        .iter()
        .filter(|transaction| transaction.status == status)
        .cloned()
        .collect()
}

/// Exact, case-sensitive category match.
pub fn filter_by_category<T: Categorized + Clone>(items: &[T], category: &str) -> Vec<T> {
    items
        .iter()
        .filter(|item| item.category() == category)
        .cloned()
        .collect()
}

pub fn sort_newest_first<T: Timestamped>(items: &mut [T]) {
    items.sort_by_key(|item| std::cmp::Reverse(item.timestamp()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use model::TransactionType;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn tx(category: &str, at: DateTime<Utc>, status: TransactionStatus) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            entity_id: Some("STU-042".into()),
            kind: TransactionType::Expense,
            amount: Decimal::new(1000, 2),
            category: category.into(),
            status,
            created_at: at,
            description: Some("Lab Fee for spring term".into()),
            reference: None,
            created_by: None,
            updated_at: None,
        }
    }

    #[test]
    fn date_range_includes_the_whole_end_day() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
        )
        .unwrap();
        let items = vec![
            tx("fees", Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap(), TransactionStatus::Approved),
            tx("fees", Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(), TransactionStatus::Approved),
            tx("fees", Utc.with_ymd_and_hms(2024, 3, 31, 23, 59, 59).unwrap(), TransactionStatus::Approved),
            tx("fees", Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(), TransactionStatus::Approved),
        ];
        assert_eq!(filter_by_date_range(&items, &range).len(), 2);
    }

    #[test]
    fn search_is_case_insensitive() {
        let items = vec![tx("Library", Utc::now(), TransactionStatus::Pending)];
        assert_eq!(search(&items, "lab fee").len(), 1);
        assert_eq!(search(&items, "stu-042").len(), 1);
        assert_eq!(search(&items, "LIBRARY").len(), 1);
        assert!(search(&items, "transport").is_empty());
        assert_eq!(search(&items, "  ").len(), 1);
    }

    #[test]
    fn status_and_category_filters() {
        let items = vec![
            tx("fees", Utc::now(), TransactionStatus::Pending),
            tx("fees", Utc::now(), TransactionStatus::Approved),
            tx("Fees", Utc::now(), TransactionStatus::Approved),
        ];
        assert_eq!(filter_by_status(&items, TransactionStatus::Approved).len(), 2);
        assert_eq!(filter_by_category(&items, "fees").len(), 2);
    }

    #[test]
    fn newest_first() {
        let old = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let new = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut items = vec![
            tx("a", old, TransactionStatus::Pending),
            tx("b", new, TransactionStatus::Pending),
        ];
        sort_newest_first(&mut items);
        assert_eq!(items[0].category, "b");
    }
}
