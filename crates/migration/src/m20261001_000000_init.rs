//! Initial schema.
//!
//! - `ledger_entries`: versioned incomes and expenses
//! - `ledger_entry_audit`: one row per lifecycle transition of an entry
//! - `wallet_accounts`: authoritative wallet balances
//! - `user_profiles`: profile data with the read-only balance mirror
//! - `wallet_history`: append-only balance movements
//! - `vas_transactions`: airtime, data and bill purchases with their
//!   reconciliation state
//! - `admin_actions`, `system_alerts`: append-only audit stores

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

// ─────────────────────────────────────────────────────────────────────────────
// Table identifiers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Iden)]
enum LedgerEntries {
    Table,
    Id,
    OwnerId,
    Kind,
    AmountMinor,
    Category,
    CategoryNorm,
    Description,
    OccurredAt,
    LifecycleStatus,
    IsDeleted,
    Version,
    OriginalEntryId,
    SupersededBy,
    ReversalEntryId,
    CreatedAt,
    CreatedBy,
}

#[derive(Iden)]
enum LedgerEntryAudit {
    Table,
    Id,
    EntryId,
    OriginalEntryId,
    Action,
    Actor,
    Version,
    Changes,
    Reason,
    At,
}

#[derive(Iden)]
enum WalletAccounts {
    Table,
    UserId,
    BalanceMinor,
    ReservedMinor,
    Tier,
    KycStatus,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum UserProfiles {
    Table,
    UserId,
    DisplayName,
    WalletBalanceMinor,
    WalletSyncedAt,
}

#[derive(Iden)]
enum WalletHistory {
    Table,
    Id,
    UserId,
    DeltaMinor,
    BalanceAfterMinor,
    Reason,
    RelatedTransactionId,
    IdempotencyKey,
    CreatedAt,
}

#[derive(Iden)]
enum VasTransactions {
    Table,
    Id,
    UserId,
    Kind,
    AmountMinor,
    Plan,
    Target,
    Provider,
    Status,
    FailureCode,
    FailureReason,
    ExpiresAt,
    CreatedAt,
    UpdatedAt,
    NeedsReconciliation,
    ReconciliationReason,
    ReconciliationDetails,
    ReconciliationDismissed,
    ReconciliationDismissedBy,
    ReconciliationDismissedAt,
    ReconciliationDismissedReason,
    ReconciliationDismissedNotes,
    ReconciliationRecoveredBy,
    ReconciliationRecoveredAt,
    ReconciliationResolved,
    ReconciliationResolvedBy,
    ReconciliationResolvedAt,
    ResolutionNotes,
}

#[derive(Iden)]
enum AdminActions {
    Table,
    Id,
    ActorId,
    Action,
    TargetId,
    Reason,
    Details,
    CreatedAt,
}

#[derive(Iden)]
enum SystemAlerts {
    Table,
    Id,
    Kind,
    Severity,
    SubjectId,
    Message,
    Details,
    CreatedAt,
}

// ─────────────────────────────────────────────────────────────────────────────
// Migration implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ───────────────────────────────────────────────────────────────────
        // 1. Ledger entries
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(LedgerEntries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LedgerEntries::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(LedgerEntries::OwnerId).string().not_null())
                    .col(ColumnDef::new(LedgerEntries::Kind).string().not_null())
                    .col(
                        ColumnDef::new(LedgerEntries::AmountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(LedgerEntries::Category).string().not_null())
                    .col(
                        ColumnDef::new(LedgerEntries::CategoryNorm)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LedgerEntries::Description)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LedgerEntries::OccurredAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LedgerEntries::LifecycleStatus)
                            .string()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(LedgerEntries::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(LedgerEntries::Version)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(LedgerEntries::OriginalEntryId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(LedgerEntries::SupersededBy).string())
                    .col(ColumnDef::new(LedgerEntries::ReversalEntryId).string())
                    .col(
                        ColumnDef::new(LedgerEntries::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(ColumnDef::new(LedgerEntries::CreatedBy).string().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uidx-ledger_entries-original_entry_id-version")
                    .table(LedgerEntries::Table)
                    .col(LedgerEntries::OriginalEntryId)
                    .col(LedgerEntries::Version)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-ledger_entries-owner_id-lifecycle_status-occurred_at")
                    .table(LedgerEntries::Table)
                    .col(LedgerEntries::OwnerId)
                    .col(LedgerEntries::LifecycleStatus)
                    .col(LedgerEntries::OccurredAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(LedgerEntryAudit::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LedgerEntryAudit::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(LedgerEntryAudit::EntryId).string().not_null())
                    .col(
                        ColumnDef::new(LedgerEntryAudit::OriginalEntryId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(LedgerEntryAudit::Action).string().not_null())
                    .col(ColumnDef::new(LedgerEntryAudit::Actor).string().not_null())
                    .col(
                        ColumnDef::new(LedgerEntryAudit::Version)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LedgerEntryAudit::Changes)
                            .text()
                            .not_null()
                            .default("[]"),
                    )
                    .col(ColumnDef::new(LedgerEntryAudit::Reason).string())
                    .col(ColumnDef::new(LedgerEntryAudit::At).timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-ledger_entry_audit-entry_id")
                            .from(LedgerEntryAudit::Table, LedgerEntryAudit::EntryId)
                            .to(LedgerEntries::Table, LedgerEntries::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-ledger_entry_audit-entry_id")
                    .table(LedgerEntryAudit::Table)
                    .col(LedgerEntryAudit::EntryId)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 2. Wallets
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(WalletAccounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WalletAccounts::UserId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WalletAccounts::BalanceMinor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WalletAccounts::ReservedMinor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WalletAccounts::Tier)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(WalletAccounts::KycStatus)
                            .string()
                            .not_null()
                            .default("unverified"),
                    )
                    .col(
                        ColumnDef::new(WalletAccounts::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WalletAccounts::UpdatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UserProfiles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserProfiles::UserId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(UserProfiles::DisplayName).string())
                    .col(
                        ColumnDef::new(UserProfiles::WalletBalanceMinor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(UserProfiles::WalletSyncedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WalletHistory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WalletHistory::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WalletHistory::UserId).string().not_null())
                    .col(
                        ColumnDef::new(WalletHistory::DeltaMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WalletHistory::BalanceAfterMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WalletHistory::Reason).string().not_null())
                    .col(ColumnDef::new(WalletHistory::RelatedTransactionId).string())
                    .col(ColumnDef::new(WalletHistory::IdempotencyKey).string())
                    .col(
                        ColumnDef::new(WalletHistory::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-wallet_history-user_id")
                            .from(WalletHistory::Table, WalletHistory::UserId)
                            .to(WalletAccounts::Table, WalletAccounts::UserId),
                    )
                    .to_owned(),
            )
            .await?;

        // At most one movement per key, so a settlement can never be booked
        // twice even by racing writers.
        manager
            .create_index(
                Index::create()
                    .name("uidx-wallet_history-idempotency_key")
                    .table(WalletHistory::Table)
                    .col(WalletHistory::IdempotencyKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-wallet_history-user_id-created_at")
                    .table(WalletHistory::Table)
                    .col(WalletHistory::UserId)
                    .col(WalletHistory::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 3. VAS transactions
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(VasTransactions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(VasTransactions::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(VasTransactions::UserId).string().not_null())
                    .col(ColumnDef::new(VasTransactions::Kind).string().not_null())
                    .col(
                        ColumnDef::new(VasTransactions::AmountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(VasTransactions::Plan).string())
                    .col(ColumnDef::new(VasTransactions::Target).string().not_null())
                    .col(ColumnDef::new(VasTransactions::Provider).string())
                    .col(
                        ColumnDef::new(VasTransactions::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(VasTransactions::FailureCode).string())
                    .col(ColumnDef::new(VasTransactions::FailureReason).text())
                    .col(ColumnDef::new(VasTransactions::ExpiresAt).timestamp())
                    .col(
                        ColumnDef::new(VasTransactions::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VasTransactions::UpdatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VasTransactions::NeedsReconciliation)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(VasTransactions::ReconciliationReason).string())
                    .col(ColumnDef::new(VasTransactions::ReconciliationDetails).text())
                    .col(
                        ColumnDef::new(VasTransactions::ReconciliationDismissed)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(VasTransactions::ReconciliationDismissedBy).string())
                    .col(ColumnDef::new(VasTransactions::ReconciliationDismissedAt).timestamp())
                    .col(ColumnDef::new(VasTransactions::ReconciliationDismissedReason).string())
                    .col(ColumnDef::new(VasTransactions::ReconciliationDismissedNotes).text())
                    .col(ColumnDef::new(VasTransactions::ReconciliationRecoveredBy).string())
                    .col(ColumnDef::new(VasTransactions::ReconciliationRecoveredAt).timestamp())
                    .col(
                        ColumnDef::new(VasTransactions::ReconciliationResolved)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(VasTransactions::ReconciliationResolvedBy).string())
                    .col(ColumnDef::new(VasTransactions::ReconciliationResolvedAt).timestamp())
                    .col(ColumnDef::new(VasTransactions::ResolutionNotes).text())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-vas_transactions-user_id-created_at")
                    .table(VasTransactions::Table)
                    .col(VasTransactions::UserId)
                    .col(VasTransactions::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 4. Audit stores
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(AdminActions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AdminActions::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AdminActions::ActorId).string().not_null())
                    .col(ColumnDef::new(AdminActions::Action).string().not_null())
                    .col(ColumnDef::new(AdminActions::TargetId).string().not_null())
                    .col(ColumnDef::new(AdminActions::Reason).text())
                    .col(
                        ColumnDef::new(AdminActions::Details)
                            .text()
                            .not_null()
                            .default("{}"),
                    )
                    .col(
                        ColumnDef::new(AdminActions::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SystemAlerts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SystemAlerts::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SystemAlerts::Kind).string().not_null())
                    .col(ColumnDef::new(SystemAlerts::Severity).string().not_null())
                    .col(ColumnDef::new(SystemAlerts::SubjectId).string().not_null())
                    .col(ColumnDef::new(SystemAlerts::Message).text().not_null())
                    .col(
                        ColumnDef::new(SystemAlerts::Details)
                            .text()
                            .not_null()
                            .default("{}"),
                    )
                    .col(
                        ColumnDef::new(SystemAlerts::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Drop in reverse order of creation (respecting FK dependencies)
        manager
            .drop_table(Table::drop().table(SystemAlerts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AdminActions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(VasTransactions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WalletHistory::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UserProfiles::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WalletAccounts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LedgerEntryAudit::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LedgerEntries::Table).to_owned())
            .await?;
        Ok(())
    }
}
