use std::error::Error;

use clap::{Args, Parser, Subcommand};
use chrono::Utc;
use engine::{
    Engine, EntryKind, EntryListFilter, KycStatus, ManualFlagCmd, Money, ResolveCmd, Resolution,
};
use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};
use serde::Serialize;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "ledger_admin")]
#[command(about = "Admin utilities for the ledger (reconciliation, wallets, chains)")]
struct Cli {
    /// Database connection string (also read from `DATABASE_URL`).
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:./ledger.db?mode=rwc")]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the reconciliation scanner once.
    Scan {
        /// Report candidates without flagging them.
        #[arg(long)]
        dry_run: bool,
    },
    Reconciliation(Reconciliation),
    Wallet(Wallet),
    Ledger(Ledger),
    Audit(Audit),
}

#[derive(Args, Debug)]
struct Reconciliation {
    #[command(subcommand)]
    command: ReconciliationCommand,
}

#[derive(Subcommand, Debug)]
enum ReconciliationCommand {
    Pending {
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
    Dismissed {
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
    Stats,
    Resolve {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        actor: String,
        /// `success` or `failed`.
        #[arg(long, value_parser = parse_resolution)]
        status: Resolution,
        #[arg(long)]
        notes: Option<String>,
    },
    BulkResolve {
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<Uuid>,
        #[arg(long)]
        actor: String,
        #[arg(long, value_parser = parse_resolution)]
        status: Resolution,
        #[arg(long)]
        notes: Option<String>,
    },
    Dismiss {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        notes: Option<String>,
    },
    Recover {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        reason: String,
    },
    Mark {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        actor: String,
        /// What the user reported, for ghost successes.
        #[arg(long)]
        user_report: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
}

#[derive(Args, Debug)]
struct Wallet {
    #[command(subcommand)]
    command: WalletCommand,
}

#[derive(Subcommand, Debug)]
enum WalletCommand {
    Open {
        #[arg(long)]
        user: String,
        #[arg(long)]
        name: Option<String>,
    },
    Balance {
        #[arg(long)]
        user: String,
    },
    History {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
    Reconcile {
        #[arg(long)]
        user: String,
    },
    /// Move the balance to `--target` with a logged correction.
    Correct {
        #[arg(long)]
        user: String,
        /// Naira amount, e.g. `1,250.50`.
        #[arg(long, allow_hyphen_values = true)]
        target: Money,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        reason: String,
    },
    Kyc {
        #[arg(long)]
        user: String,
        #[arg(long)]
        tier: Option<i32>,
        #[arg(long, value_parser = parse_kyc_status)]
        status: Option<KycStatus>,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        reason: String,
    },
}

#[derive(Args, Debug)]
struct Ledger {
    #[command(subcommand)]
    command: LedgerCommand,
}

#[derive(Subcommand, Debug)]
enum LedgerCommand {
    History {
        #[arg(long)]
        entry: Uuid,
        #[arg(long)]
        owner: String,
    },
    Active {
        #[arg(long)]
        owner: String,
        #[arg(long, value_parser = parse_entry_kind)]
        kind: Option<EntryKind>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        search: Option<String>,
    },
    /// Check one chain, or every chain of an owner.
    Check {
        #[arg(long, conflicts_with = "owner", required_unless_present = "owner")]
        chain: Option<Uuid>,
        #[arg(long)]
        owner: Option<String>,
    },
    Repair {
        #[arg(long)]
        chain: Uuid,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        reason: String,
    },
}

#[derive(Args, Debug)]
struct Audit {
    #[command(subcommand)]
    command: AuditCommand,
}

#[derive(Subcommand, Debug)]
enum AuditCommand {
    Actions {
        #[arg(long)]
        target: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
    Alerts {
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
}

fn parse_resolution(raw: &str) -> Result<Resolution, String> {
    Resolution::try_from(raw).map_err(|err| err.to_string())
}

fn parse_kyc_status(raw: &str) -> Result<KycStatus, String> {
    KycStatus::try_from(raw).map_err(|err| err.to_string())
}

fn parse_entry_kind(raw: &str) -> Result<EntryKind, String> {
    EntryKind::try_from(raw).map_err(|err| err.to_string())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error + Send + Sync>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn connect_db(
    database_url: &str,
) -> Result<DatabaseConnection, Box<dyn Error + Send + Sync>> {
    let db = Database::connect(database_url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()))
        .with_writer(std::io::stderr)
        .init();

    let db = connect_db(&cli.database_url).await?;
    let engine = Engine::builder().database(db).build().await?;

    match cli.command {
        Command::Scan { dry_run } => print_json(&engine.scan_once(dry_run).await?)?,
        Command::Reconciliation(Reconciliation { command }) => match command {
            ReconciliationCommand::Pending { limit } => {
                print_json(&engine.list_pending_reconciliations(limit).await?)?;
            }
            ReconciliationCommand::Dismissed { limit } => {
                print_json(&engine.list_dismissed_reconciliations(limit).await?)?;
            }
            ReconciliationCommand::Stats => {
                print_json(&engine.reconciliation_stats(Utc::now()).await?)?;
            }
            ReconciliationCommand::Resolve {
                id,
                actor,
                status,
                notes,
            } => {
                let mut cmd = ResolveCmd::new(id, actor, status);
                if let Some(notes) = notes {
                    cmd = cmd.notes(notes);
                }
                print_json(&engine.resolve_reconciliation(cmd).await?)?;
            }
            ReconciliationCommand::BulkResolve {
                ids,
                actor,
                status,
                notes,
            } => {
                let report = engine
                    .bulk_resolve_reconciliations(&ids, &actor, status, notes.as_deref())
                    .await?;
                print_json(&report)?;
            }
            ReconciliationCommand::Dismiss {
                id,
                actor,
                reason,
                notes,
            } => {
                let txn = engine
                    .dismiss_reconciliation(id, &actor, &reason, notes.as_deref())
                    .await?;
                print_json(&txn)?;
            }
            ReconciliationCommand::Recover { id, actor, reason } => {
                print_json(&engine.recover_reconciliation(id, &actor, &reason).await?)?;
            }
            ReconciliationCommand::Mark {
                id,
                actor,
                user_report,
                notes,
            } => {
                let mut cmd = ManualFlagCmd::new(id, actor);
                if let Some(report) = user_report {
                    cmd = cmd.ghost_success(report);
                }
                if let Some(notes) = notes {
                    cmd = cmd.notes(notes);
                }
                let reason = cmd.reason;
                let flagged = engine.mark_manually(cmd).await?;
                print_json(&serde_json::json!({
                    "transaction_id": id,
                    "flagged": flagged,
                    "reason": reason,
                    "checklist": reason.verification_steps(),
                }))?;
            }
        },
        Command::Wallet(Wallet { command }) => match command {
            WalletCommand::Open { user, name } => {
                print_json(&engine.open_wallet(&user, name.as_deref()).await?)?;
            }
            WalletCommand::Balance { user } => {
                let wallet = engine.wallet_account(&user).await?;
                print_json(&serde_json::json!({
                    "user_id": user,
                    "balance_minor": wallet.balance_minor,
                    "reserved_minor": wallet.reserved_minor,
                    "balance": wallet.balance().to_string(),
                    "available": wallet.available().to_string(),
                }))?;
            }
            WalletCommand::History { user, limit } => {
                print_json(&engine.wallet_history(&user, limit).await?)?;
            }
            WalletCommand::Reconcile { user } => {
                let balance = engine.reconcile_wallet(&user).await?;
                print_json(&serde_json::json!({ "user_id": user, "balance_minor": balance }))?;
            }
            WalletCommand::Correct {
                user,
                target,
                actor,
                reason,
            } => {
                let balance = engine
                    .force_balance_correction(&user, target.kobo(), &actor, &reason)
                    .await?;
                print_json(&serde_json::json!({ "user_id": user, "balance_minor": balance }))?;
            }
            WalletCommand::Kyc {
                user,
                tier,
                status,
                actor,
                reason,
            } => {
                print_json(&engine.fix_kyc(&user, tier, status, &actor, &reason).await?)?;
            }
        },
        Command::Ledger(Ledger { command }) => match command {
            LedgerCommand::History { entry, owner } => {
                print_json(&engine.entry_history(entry, &owner).await?)?;
            }
            LedgerCommand::Active {
                owner,
                kind,
                category,
                search,
            } => {
                let mut filter = EntryListFilter::default();
                if let Some(kind) = kind {
                    filter = filter.kind(kind);
                }
                if let Some(category) = category {
                    filter = filter.category(category);
                }
                if let Some(search) = search {
                    filter = filter.search(search);
                }
                let entries = engine.list_active_entries(&owner, &filter).await?;
                let totals = engine.entry_totals(&owner, &filter).await?;
                print_json(&serde_json::json!({ "entries": entries, "totals": totals }))?;
            }
            LedgerCommand::Check { chain, owner } => match (chain, owner) {
                (Some(chain), _) => print_json(&engine.check_chain(chain).await?)?,
                (None, Some(owner)) => print_json(&engine.check_chains(&owner).await?)?,
                (None, None) => return Err("pass --chain or --owner".into()),
            },
            LedgerCommand::Repair {
                chain,
                actor,
                reason,
            } => {
                print_json(&engine.repair_chain(chain, &actor, &reason).await?)?;
            }
        },
        Command::Audit(Audit { command }) => match command {
            AuditCommand::Actions { target, limit } => {
                print_json(&engine.list_admin_actions(target.as_deref(), limit).await?)?;
            }
            AuditCommand::Alerts { limit } => {
                print_json(&engine.list_system_alerts(limit).await?)?;
            }
        },
    }

    Ok(())
}
