use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
enum VasTransactions {
    Table,
    Status,
    NeedsReconciliation,
    CreatedAt,
}

#[derive(Iden)]
enum AdminActions {
    Table,
    TargetId,
    CreatedAt,
}

#[derive(Iden)]
enum SystemAlerts {
    Table,
    CreatedAt,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Every scanner detector filters on these three.
        manager
            .create_index(
                Index::create()
                    .name("idx-vas_transactions-status-needs_reconciliation-created_at")
                    .table(VasTransactions::Table)
                    .col(VasTransactions::Status)
                    .col(VasTransactions::NeedsReconciliation)
                    .col(VasTransactions::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-admin_actions-target_id-created_at")
                    .table(AdminActions::Table)
                    .col(AdminActions::TargetId)
                    .col(AdminActions::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-system_alerts-created_at")
                    .table(SystemAlerts::Table)
                    .col(SystemAlerts::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx-system_alerts-created_at")
                    .table(SystemAlerts::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx-admin_actions-target_id-created_at")
                    .table(AdminActions::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx-vas_transactions-status-needs_reconciliation-created_at")
                    .table(VasTransactions::Table)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }
}
