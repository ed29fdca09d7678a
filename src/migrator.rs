use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(
            m20240701_000001_create_stock_transactions_table::Migration,
        )]
    }
}

mod m20240701_000001_create_stock_transactions_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240701_000001_create_stock_transactions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Aligned with entities::stock_transaction Model
            manager
                .create_table(
                    Table::create()
                        .table(StockTransactions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockTransactions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockTransactions::Kind).string().not_null())
                        .col(
                            ColumnDef::new(StockTransactions::MyobNumber)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockTransactions::PartNumber)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockTransactions::Model).string().null())
                        .col(ColumnDef::new(StockTransactions::PartName).string().null())
                        .col(ColumnDef::new(StockTransactions::Revision).string().null())
                        .col(
                            ColumnDef::new(StockTransactions::ReceivedQty)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockTransactions::ReceivedDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(StockTransactions::PoNumber).string().null())
                        .col(ColumnDef::new(StockTransactions::Supplier).string().null())
                        .col(
                            ColumnDef::new(StockTransactions::IssuedQty)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockTransactions::IssueDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(StockTransactions::InvoiceNumber)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(StockTransactions::Customer).string().null())
                        .col(
                            ColumnDef::new(StockTransactions::WithdrawalNumber)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(StockTransactions::Event).string().null())
                        .col(ColumnDef::new(StockTransactions::DueDate).date().null())
                        .col(ColumnDef::new(StockTransactions::Remarks).text().null())
                        .col(
                            ColumnDef::new(StockTransactions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockTransactions::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_transactions_part")
                        .table(StockTransactions::Table)
                        .col(StockTransactions::MyobNumber)
                        .col(StockTransactions::PartNumber)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_transactions_kind")
                        .table(StockTransactions::Table)
                        .col(StockTransactions::Kind)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_transactions_created_at")
                        .table(StockTransactions::Table)
                        .col(StockTransactions::CreatedAt)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockTransactions::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum StockTransactions {
        Table,
        Id,
        Kind,
        MyobNumber,
        PartNumber,
        Model,
        PartName,
        Revision,
        ReceivedQty,
        ReceivedDate,
        PoNumber,
        Supplier,
        IssuedQty,
        IssueDate,
        InvoiceNumber,
        Customer,
        WithdrawalNumber,
        Event,
        DueDate,
        Remarks,
        CreatedAt,
        UpdatedAt,
    }
}
