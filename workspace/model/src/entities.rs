//! SeaORM entities backing [`crate::store::SqlStore`].
//! The ledger collections are schemaless JSON documents, so a single table holds
//! every document together with its optimistic-concurrency version.

pub mod ledger_document;

pub mod prelude {
    //! A prelude module for easy importing of all entities.
    pub use super::ledger_document::Entity as LedgerDocument;
}
