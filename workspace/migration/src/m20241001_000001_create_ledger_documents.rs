use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One row per document; `parent` is the collection path the document lives in
        manager
            .create_table(
                Table::create()
                    .table(LedgerDocuments::Table)
                    .if_not_exists()
                    .col(string(LedgerDocuments::Path).primary_key())
                    .col(string(LedgerDocuments::Parent))
                    .col(text(LedgerDocuments::Body))
                    .col(big_integer(LedgerDocuments::Version))
                    .col(timestamp_with_time_zone(LedgerDocuments::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_ledger_documents_parent")
                    .table(LedgerDocuments::Table)
                    .col(LedgerDocuments::Parent)
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_ledger_documents_parent")
                    .table(LedgerDocuments::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(LedgerDocuments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum LedgerDocuments {
    Table,
    Path,
    Parent,
    Body,
    Version,
    UpdatedAt,
}
