//! Immutable financial ledger and VAS reconciliation engine.
//!
//! The crate keeps three kinds of financial facts:
//!
//! - **Ledger entries** (incomes and expenses). Every edit creates a new
//!   version and every delete a reversal; nothing is overwritten.
//! - **Wallet balances** with an append-only history that can always
//!   re-derive them, plus a read-only mirror on the user profile.
//! - **VAS transactions** whose uncertain outcomes are flagged for human
//!   review instead of being guessed.
//!
//! Everything goes through [`Engine`].

pub use admin_actions::{AdminAction, AdminActionKind};
pub use commands::{
    ApplyDeltaCmd, CreateEntryCmd, CreateVasCmd, ManualFlagCmd, ResolveCmd, UpdateEntryCmd,
};
pub use entries::{AuditAction, AuditRecord, EntryKind, LedgerEntry, LifecycleStatus};
pub use error::EngineError;
pub use failure::{FailureClass, FailureCode, FailureReason};
pub use money::Money;
pub use notify::{Notification, NotificationSink, NotifyError, TracingSink};
pub use ops::{
    BulkResolveItem, BulkResolveReport, ChainReport, DeletedEntry, Engine, EngineBuilder,
    EntryListFilter, EntryTotals, ReconciliationStats, ScanFinding, ScanPolicy, ScanReport,
};
pub use provider::{
    DeliveredDetails, PaymentProvider, ProviderError, ProviderOutcome, PurchaseRequest,
};
pub use reconciliation::{
    Evidence, MarkRequest, ReconciliationDetails, ReconciliationReason, Severity,
};
pub use scheduler::{SchedulerConfig, start_scheduler};
pub use system_alerts::{AlertKind, SystemAlert};
pub use vas::{ReconciliationState, Resolution, VasEvent, VasKind, VasStatus, VasTransaction};
pub use wallet_history::{WalletHistoryEntry, vas_debit_key, vas_settlement_key};
pub use wallets::{KycStatus, WalletAccount};

mod admin_actions;
mod commands;
mod entries;
mod entry_audit;
mod error;
mod failure;
mod money;
mod notify;
mod ops;
mod profiles;
mod provider;
mod reconciliation;
mod scheduler;
mod system_alerts;
mod util;
mod vas;
mod wallet_history;
mod wallets;

type ResultEngine<T> = Result<T, EngineError>;
