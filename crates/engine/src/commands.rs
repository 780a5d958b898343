//! Command structs for engine operations.
//!
//! These types group parameters for write operations (ledger entries, wallet
//! deltas, VAS purchases, reconciliation verdicts), keeping call sites
//! readable and avoiding long argument lists.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{EntryKind, Evidence, ReconciliationReason, Resolution, VasKind};

/// Record a new income or expense.
#[derive(Clone, Debug)]
pub struct CreateEntryCmd {
    pub owner_id: String,
    pub kind: EntryKind,
    pub amount_minor: i64,
    pub category: String,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
    /// Defaults to the owner.
    pub actor: Option<String>,
}

impl CreateEntryCmd {
    #[must_use]
    pub fn new(
        owner_id: impl Into<String>,
        kind: EntryKind,
        amount_minor: i64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            kind,
            amount_minor,
            category: String::new(),
            description: String::new(),
            occurred_at,
            actor: None,
        }
    }

    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// Patch an active entry. Fields left `None` are copied from the current
/// version.
#[derive(Clone, Debug)]
pub struct UpdateEntryCmd {
    pub entry_id: Uuid,
    pub owner_id: String,
    pub amount_minor: Option<i64>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub actor: Option<String>,
    pub reason: Option<String>,
}

impl UpdateEntryCmd {
    #[must_use]
    pub fn new(entry_id: Uuid, owner_id: impl Into<String>) -> Self {
        Self {
            entry_id,
            owner_id: owner_id.into(),
            amount_minor: None,
            category: None,
            description: None,
            occurred_at: None,
            actor: None,
            reason: None,
        }
    }

    #[must_use]
    pub fn amount_minor(mut self, amount_minor: i64) -> Self {
        self.amount_minor = Some(amount_minor);
        self
    }

    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    #[must_use]
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.amount_minor.is_none()
            && self.category.is_none()
            && self.description.is_none()
            && self.occurred_at.is_none()
    }
}

/// Change a wallet balance by a signed amount.
#[derive(Clone, Debug)]
pub struct ApplyDeltaCmd {
    pub user_id: String,
    pub delta_minor: i64,
    pub reason: String,
    pub related_transaction_id: Option<Uuid>,
    /// A repeated key is a no-op.
    pub idempotency_key: Option<String>,
    /// Skip the non-negative guard. Only for debits of services already
    /// delivered and admin corrections.
    pub allow_negative: bool,
}

impl ApplyDeltaCmd {
    #[must_use]
    pub fn new(user_id: impl Into<String>, delta_minor: i64, reason: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            delta_minor,
            reason: reason.into(),
            related_transaction_id: None,
            idempotency_key: None,
            allow_negative: false,
        }
    }

    #[must_use]
    pub fn related_transaction(mut self, transaction_id: Uuid) -> Self {
        self.related_transaction_id = Some(transaction_id);
        self
    }

    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn allow_negative(mut self) -> Self {
        self.allow_negative = true;
        self
    }
}

/// Start a VAS purchase.
#[derive(Clone, Debug)]
pub struct CreateVasCmd {
    pub user_id: String,
    pub kind: VasKind,
    pub amount_minor: i64,
    pub target: String,
    pub plan: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CreateVasCmd {
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        kind: VasKind,
        amount_minor: i64,
        target: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            kind,
            amount_minor,
            target: target.into(),
            plan: None,
            expires_at: None,
        }
    }

    #[must_use]
    pub fn plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = Some(plan.into());
        self
    }

    #[must_use]
    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// Admin verdict on a flagged transaction.
#[derive(Clone, Debug)]
pub struct ResolveCmd {
    pub transaction_id: Uuid,
    pub actor: String,
    pub resolution: Resolution,
    pub notes: Option<String>,
}

impl ResolveCmd {
    #[must_use]
    pub fn new(transaction_id: Uuid, actor: impl Into<String>, resolution: Resolution) -> Self {
        Self {
            transaction_id,
            actor: actor.into(),
            resolution,
            notes: None,
        }
    }

    #[must_use]
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Admin request to flag a transaction.
#[derive(Clone, Debug)]
pub struct ManualFlagCmd {
    pub transaction_id: Uuid,
    pub actor: String,
    pub reason: ReconciliationReason,
    pub notes: Option<String>,
    pub evidence: Option<Evidence>,
}

impl ManualFlagCmd {
    #[must_use]
    pub fn new(transaction_id: Uuid, actor: impl Into<String>) -> Self {
        Self {
            transaction_id,
            actor: actor.into(),
            reason: ReconciliationReason::Manual,
            notes: None,
            evidence: None,
        }
    }

    /// A user reporting they received the service.
    #[must_use]
    pub fn ghost_success(mut self, user_report: impl Into<String>) -> Self {
        self.reason = ReconciliationReason::GhostSuccess;
        self.evidence = Some(Evidence::UserReport {
            report: user_report.into(),
        });
        self
    }

    #[must_use]
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}
