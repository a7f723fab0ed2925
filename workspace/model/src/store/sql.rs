use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Database, DatabaseConnection,
    DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde_json::Value;
use tracing::{debug, error, instrument, trace};

use super::{
    Change, ChangeFeed, Document, LedgerStore, Precondition, StoreError, WatchCallback,
    WatchHandle, WriteOp,
};
use crate::entities::ledger_document;
use crate::paths;

/// [`LedgerStore`] persisting documents in the `ledger_documents` table of a SQL
/// database through SeaORM. Each commit runs inside one database transaction and
/// versioned writes are conditional `UPDATE ... WHERE version = ?` statements.
///
/// Watchers see the changes committed through this handle (and its clones) only.
#[derive(Debug, Clone)]
pub struct SqlStore {
    name: String,
    db: DatabaseConnection,
    feed: ChangeFeed,
}

impl SqlStore {
    pub fn new(name: impl Into<String>, db: DatabaseConnection) -> Self {
        Self {
            name: name.into(),
            db,
            feed: ChangeFeed::default(),
        }
    }

    pub async fn connect(name: impl Into<String>, database_url: &str) -> Result<Self, StoreError> {
        let name = name.into();
        debug!(store = %name, "connecting to {}", database_url);
        let db = Database::connect(database_url).await?;
        Ok(Self::new(name, db))
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn apply(
        &self,
        txn: &DatabaseTransaction,
        op: &WriteOp,
    ) -> Result<Change, StoreError> {
        let path = op.path();
        let existing = ledger_document::Entity::find_by_id(path.to_string())
            .one(txn)
            .await?;
        let conflict = || StoreError::Conflict {
            path: path.to_string(),
        };

        match (op.expect(), existing.as_ref()) {
            (Precondition::Absent, Some(_)) | (Precondition::Version(_), None) => {
                return Err(conflict());
            }
            (Precondition::Version(expected), Some(row)) if row.version as u64 != expected => {
                return Err(conflict());
            }
            _ => {}
        }

        match op {
            WriteOp::Put { value, .. } => {
                let body = serde_json::to_string(value)?;
                let now = Utc::now();
                let version = match existing {
                    Some(row) => {
                        let next = row.version + 1;
                        let result = ledger_document::Entity::update_many()
                            .col_expr(ledger_document::Column::Body, Expr::value(body))
                            .col_expr(ledger_document::Column::Version, Expr::value(next))
                            .col_expr(ledger_document::Column::UpdatedAt, Expr::value(now))
                            .filter(ledger_document::Column::Path.eq(path))
                            .filter(ledger_document::Column::Version.eq(row.version))
                            .exec(txn)
                            .await?;
                        if result.rows_affected != 1 {
                            return Err(conflict());
                        }
                        next
                    }
                    None => {
                        let row = ledger_document::ActiveModel {
                            path: Set(path.to_string()),
                            parent: Set(paths::parent(path).to_string()),
                            body: Set(body),
                            version: Set(1),
                            updated_at: Set(now),
                        };
                        row.insert(txn).await.map_err(|db_error| {
                            match db_error.sql_err() {
                                Some(SqlErr::UniqueConstraintViolation(_)) => conflict(),
                                _ => StoreError::from(db_error),
                            }
                        })?;
                        1
                    }
                };
                Ok(Change {
                    path: path.to_string(),
                    document: Some(Document {
                        path: path.to_string(),
                        value: value.clone(),
                        version: version as u64,
                    }),
                })
            }
            WriteOp::Remove { .. } => {
                ledger_document::Entity::delete_by_id(path.to_string())
                    .exec(txn)
                    .await?;
                Ok(Change {
                    path: path.to_string(),
                    document: None,
                })
            }
        }
    }
}

fn to_document(row: ledger_document::Model) -> Result<Document, StoreError> {
    Ok(Document {
        value: serde_json::from_str::<Value>(&row.body)?,
        version: row.version as u64,
        path: row.path,
    })
}

#[async_trait]
impl LedgerStore for SqlStore {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(store = %self.name))]
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        ledger_document::Entity::find_by_id(path.to_string())
            .one(&self.db)
            .await?
            .map(to_document)
            .transpose()
    }

    #[instrument(skip(self), fields(store = %self.name))]
    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        ledger_document::Entity::find()
            .filter(ledger_document::Column::Parent.eq(collection))
            .order_by_asc(ledger_document::Column::Path)
            .all(&self.db)
            .await?
            .into_iter()
            .map(to_document)
            .collect()
    }

    #[instrument(skip(self, ops), fields(store = %self.name, writes = ops.len()))]
    async fn commit(&self, ops: Vec<WriteOp>) -> Result<Vec<u64>, StoreError> {
        let txn = self.db.begin().await?;
        let mut changes = Vec::with_capacity(ops.len());

        for op in &ops {
            match self.apply(&txn, op).await {
                Ok(change) => changes.push(change),
                Err(store_error) => {
                    trace!(path = op.path(), "rolling back commit: {}", store_error);
                    if let Err(rollback_error) = txn.rollback().await {
                        error!("Failed to roll back commit on {}: {}", self.name, rollback_error);
                    }
                    return Err(store_error);
                }
            }
        }

        txn.commit().await?;

        let versions = changes
            .iter()
            .map(|change| change.document.as_ref().map(|d| d.version).unwrap_or(0))
            .collect();
        for change in changes {
            self.feed.publish(change);
        }
        Ok(versions)
    }

    async fn watch(
        &self,
        prefix: &str,
        callback: WatchCallback,
    ) -> Result<WatchHandle, StoreError> {
        let subscription = self.feed.subscribe();
        let rows = ledger_document::Entity::find()
            .order_by_asc(ledger_document::Column::Path)
            .all(&self.db)
            .await?;
        let initial = rows
            .into_iter()
            .filter(|row| paths::is_under(prefix, &row.path))
            .map(to_document)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(subscription.deliver(prefix, initial, callback))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.db.ping().await.map_err(StoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use serde_json::json;

    async fn setup_store() -> SqlStore {
        let store = SqlStore::connect("primary", "sqlite::memory:")
            .await
            .expect("Failed to connect to in-memory database");
        Migrator::up(store.connection(), None)
            .await
            .expect("Migrations failed.");
        store
    }

    #[tokio::test]
    async fn round_trips_documents_with_versions() {
        let store = setup_store().await;
        assert_eq!(store.set("accounts/S1", json!({"n": 1})).await.unwrap(), 1);
        assert_eq!(store.set("accounts/S1", json!({"n": 2})).await.unwrap(), 2);

        let doc = store.get("accounts/S1").await.unwrap().unwrap();
        assert_eq!(doc.version, 2);
        assert_eq!(doc.value, json!({"n": 2}));
        assert!(store.get("accounts/S2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conditional_commit_rolls_back_on_conflict() {
        let store = setup_store().await;
        store.set("accounts/S1", json!({"n": 1})).await.unwrap();

        let err = store
            .commit(vec![
                WriteOp::create("transactions/t1", json!({"entityId": "S1"})),
                WriteOp::put_if("accounts/S1", json!({"n": 2}), Precondition::Version(3)),
            ])
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(store.get("transactions/t1").await.unwrap().is_none());

        let versions = store
            .commit(vec![
                WriteOp::create("transactions/t1", json!({"entityId": "S1"})),
                WriteOp::put_if("accounts/S1", json!({"n": 2}), Precondition::Version(1)),
            ])
            .await
            .unwrap();
        assert_eq!(versions, vec![1, 2]);
    }

    #[tokio::test]
    async fn lists_direct_children_and_queries_fields() {
        let store = setup_store().await;
        store
            .set("transactions/a", json!({"entityId": "S1"}))
            .await
            .unwrap();
        store
            .set("transactions/b", json!({"entityId": "S2"}))
            .await
            .unwrap();
        store.set("sync/stale/S1", json!({"entityId": "S1"})).await.unwrap();

        assert_eq!(store.list("transactions").await.unwrap().len(), 2);
        assert_eq!(store.list("sync/stale").await.unwrap().len(), 1);
        let only_s2 = store
            .query("transactions", "entityId", &json!("S2"))
            .await
            .unwrap();
        assert_eq!(only_s2.len(), 1);
        assert_eq!(only_s2[0].path, "transactions/b");

        store.remove("transactions/a").await.unwrap();
        assert_eq!(store.list("transactions").await.unwrap().len(), 1);
        store.ping().await.unwrap();
    }
}
