//! Per-transaction fund holds.
//!
//! `vas_transactions.reserved_minor` is the part of
//! `wallet_accounts.reserved_minor` a purchase holds while its outcome is
//! open. Pending purchases that already exist get their hold backfilled.

use sea_orm::{ConnectionTrait, Statement};
use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
enum VasTransactions {
    Table,
    ReservedMinor,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(VasTransactions::Table)
                    .add_column(
                        ColumnDef::new(VasTransactions::ReservedMinor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        let db = manager.get_connection();
        let backend = db.get_database_backend();
        db.execute(Statement::from_string(
            backend,
            "UPDATE vas_transactions SET reserved_minor = amount_minor \
             WHERE status = 'pending' AND kind NOT IN ('wallet_funding', 'refund');",
        ))
        .await?;
        db.execute(Statement::from_string(
            backend,
            "UPDATE wallet_accounts SET reserved_minor = (\
                 SELECT COALESCE(SUM(v.reserved_minor), 0) FROM vas_transactions v \
                 WHERE v.user_id = wallet_accounts.user_id);",
        ))
        .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        let backend = db.get_database_backend();
        db.execute(Statement::from_string(
            backend,
            "UPDATE wallet_accounts SET reserved_minor = 0;",
        ))
        .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(VasTransactions::Table)
                    .drop_column(VasTransactions::ReservedMinor)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }
}
