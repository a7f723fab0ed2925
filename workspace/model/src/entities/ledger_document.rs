use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

/// A stored document. `path` is the full key (`accounts/S1`), `parent` the
/// collection it belongs to (`accounts`).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "ledger_documents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub path: String,
    pub parent: String,
    /// JSON body of the document.
    #[sea_orm(column_type = "Text")]
    pub body: String,
    /// Starts at 1 and grows by exactly one on every write.
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
