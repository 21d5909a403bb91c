use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::Expr;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One row per logical mint attempt, keyed by the client request id.
        manager
            .create_table(
                Table::create()
                    .table(MintRequests::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MintRequests::RequestId)
                            .string_len(128)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MintRequests::ResolvedAddress)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MintRequests::Status)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(MintRequests::TxHash).string_len(128))
                    .col(ColumnDef::new(MintRequests::TokenId).string_len(96))
                    .col(
                        ColumnDef::new(MintRequests::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    // Index for per-recipient audits
                    .index(
                        Index::create()
                            .name("idx_mint_requests_address")
                            .col(MintRequests::ResolvedAddress)
                            .col(MintRequests::CreatedAt),
                    )
                    .to_owned(),
            )
            .await?;

        // Per-recipient mint counter, keyed by lowercased address.
        manager
            .create_table(
                Table::create()
                    .table(MintCounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MintCounts::Address)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MintCounts::Count)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(MintCounts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Rate-limit windows, keyed by client IP.
        manager
            .create_table(
                Table::create()
                    .table(RateWindows::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RateWindows::Key)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RateWindows::Count)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RateWindows::ResetAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RateWindows::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MintCounts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MintRequests::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(Iden)]
enum MintRequests {
    Table,
    RequestId,
    ResolvedAddress,
    Status,
    TxHash,
    TokenId,
    CreatedAt,
}

#[derive(Iden)]
enum MintCounts {
    Table,
    Address,
    Count,
    UpdatedAt,
}

#[derive(Iden)]
enum RateWindows {
    Table,
    Key,
    Count,
    ResetAt,
}
