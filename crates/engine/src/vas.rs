//! Value-added-service purchases (airtime, data, bills, ...).
//!
//! A [`VasTransaction`] moves through the states of [`VasStatus`]. The only
//! legal moves are the ones [`VasStatus::apply`] returns `Some` for; every
//! write path in the engine asks the table first and then performs a
//! compare-and-set on the stored status.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    EngineError, FailureCode, FailureReason, ReconciliationDetails, ReconciliationReason,
    util::parse_uuid,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VasKind {
    Airtime,
    Data,
    Bills,
    WalletFunding,
    Refund,
}

impl VasKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Airtime => "airtime",
            Self::Data => "data",
            Self::Bills => "bills",
            Self::WalletFunding => "wallet_funding",
            Self::Refund => "refund",
        }
    }

    /// Purchases take money out of the wallet; funding and refunds put it in.
    pub fn debits_wallet(self) -> bool {
        !matches!(self, Self::WalletFunding | Self::Refund)
    }

    /// Signed wallet movement of a successful transaction of this kind.
    pub fn wallet_delta(self, amount_minor: i64) -> i64 {
        if self.debits_wallet() {
            -amount_minor
        } else {
            amount_minor
        }
    }
}

impl TryFrom<&str> for VasKind {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "airtime" => Ok(Self::Airtime),
            "data" => Ok(Self::Data),
            "bills" => Ok(Self::Bills),
            "wallet_funding" => Ok(Self::WalletFunding),
            "refund" => Ok(Self::Refund),
            other => Err(EngineError::InvalidName(format!("invalid vas kind: {other}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VasStatus {
    Pending,
    Success,
    Failed,
    NeedsReconciliation,
    Expired,
}

/// Something that happens to a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VasEvent {
    Succeed,
    Fail,
    Expire,
    /// Flag for manual review. `dismissed` tells whether the current
    /// reconciliation item (if any) was dismissed.
    Flag { dismissed: bool },
    /// Admin verdict on a flagged transaction.
    Resolve(Resolution),
}

/// Final verdict an admin gives a flagged transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Success,
    Failed,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn status(self) -> VasStatus {
        match self {
            Self::Success => VasStatus::Success,
            Self::Failed => VasStatus::Failed,
        }
    }
}

impl TryFrom<&str> for Resolution {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(EngineError::InvalidName(format!(
                "resolution must be success or failed, got {other}"
            ))),
        }
    }
}

impl VasStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::NeedsReconciliation => "needs_reconciliation",
            Self::Expired => "expired",
        }
    }

    /// The transition table. `None` means the event is not allowed from
    /// `self`.
    pub fn apply(self, event: VasEvent) -> Option<VasStatus> {
        use VasEvent::*;
        use VasStatus::*;
        match (self, event) {
            (Pending, Succeed) => Some(Success),
            (Pending, Fail) => Some(Failed),
            (Pending, Expire) => Some(Expired),
            (Pending | Failed, Flag { .. }) => Some(NeedsReconciliation),
            (NeedsReconciliation, Flag { dismissed: true }) => Some(NeedsReconciliation),
            (NeedsReconciliation, Resolve(resolution)) => Some(resolution.status()),
            _ => None,
        }
    }
}

impl TryFrom<&str> for VasStatus {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "needs_reconciliation" => Ok(Self::NeedsReconciliation),
            "expired" => Ok(Self::Expired),
            other => Err(EngineError::InvalidName(format!(
                "invalid vas status: {other}"
            ))),
        }
    }
}

/// Review state of a flagged transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationState {
    pub needs_reconciliation: bool,
    pub reason: Option<ReconciliationReason>,
    pub details: Option<ReconciliationDetails>,
    pub dismissed: bool,
    pub dismissed_by: Option<String>,
    pub dismissed_at: Option<DateTime<Utc>>,
    pub dismissed_reason: Option<String>,
    pub dismissed_notes: Option<String>,
    pub recovered_by: Option<String>,
    pub recovered_at: Option<DateTime<Utc>>,
    pub resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VasTransaction {
    pub id: Uuid,
    pub user_id: String,
    pub kind: VasKind,
    pub amount_minor: i64,
    /// Requested plan code, for data and bills.
    pub plan: Option<String>,
    /// Phone number, meter number or account the service is for.
    pub target: String,
    pub provider: Option<String>,
    pub status: VasStatus,
    pub failure: Option<FailureReason>,
    /// Funds this purchase still holds on the wallet. Zero once its outcome
    /// is settled either way.
    pub reserved_minor: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reconciliation: ReconciliationState,
}

impl VasTransaction {
    /// An open item in the reconciliation queue.
    pub fn awaits_review(&self) -> bool {
        self.status == VasStatus::NeedsReconciliation
            && self.reconciliation.needs_reconciliation
            && !self.reconciliation.dismissed
            && !self.reconciliation.resolved
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "vas_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub amount_minor: i64,
    pub plan: Option<String>,
    pub target: String,
    pub provider: Option<String>,
    pub status: String,
    pub failure_code: Option<String>,
    pub failure_reason: Option<String>,
    pub reserved_minor: i64,
    pub expires_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
    pub needs_reconciliation: bool,
    pub reconciliation_reason: Option<String>,
    /// JSON-encoded [`ReconciliationDetails`].
    pub reconciliation_details: Option<String>,
    pub reconciliation_dismissed: bool,
    pub reconciliation_dismissed_by: Option<String>,
    pub reconciliation_dismissed_at: Option<DateTimeUtc>,
    pub reconciliation_dismissed_reason: Option<String>,
    pub reconciliation_dismissed_notes: Option<String>,
    pub reconciliation_recovered_by: Option<String>,
    pub reconciliation_recovered_at: Option<DateTimeUtc>,
    pub reconciliation_resolved: bool,
    pub reconciliation_resolved_by: Option<String>,
    pub reconciliation_resolved_at: Option<DateTimeUtc>,
    pub resolution_notes: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for VasTransaction {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let failure = match (model.failure_code.as_deref(), model.failure_reason) {
            (Some(code), message) => Some(FailureReason::new(
                FailureCode::try_from(code)?,
                message.unwrap_or_default(),
            )),
            (None, Some(message)) => Some(FailureReason::from_text(message)),
            (None, None) => None,
        };
        let details = model
            .reconciliation_details
            .as_deref()
            .map(serde_json::from_str::<ReconciliationDetails>)
            .transpose()?;
        let reason = model
            .reconciliation_reason
            .as_deref()
            .map(ReconciliationReason::try_from)
            .transpose()?;
        Ok(Self {
            id: parse_uuid(&model.id, "vas transaction")?,
            user_id: model.user_id,
            kind: VasKind::try_from(model.kind.as_str())?,
            amount_minor: model.amount_minor,
            plan: model.plan,
            target: model.target,
            provider: model.provider,
            status: VasStatus::try_from(model.status.as_str())?,
            failure,
            reserved_minor: model.reserved_minor,
            expires_at: model.expires_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
            reconciliation: ReconciliationState {
                needs_reconciliation: model.needs_reconciliation,
                reason,
                details,
                dismissed: model.reconciliation_dismissed,
                dismissed_by: model.reconciliation_dismissed_by,
                dismissed_at: model.reconciliation_dismissed_at,
                dismissed_reason: model.reconciliation_dismissed_reason,
                dismissed_notes: model.reconciliation_dismissed_notes,
                recovered_by: model.reconciliation_recovered_by,
                recovered_at: model.reconciliation_recovered_at,
                resolved: model.reconciliation_resolved,
                resolved_by: model.reconciliation_resolved_by,
                resolved_at: model.reconciliation_resolved_at,
                resolution_notes: model.resolution_notes,
            },
        })
    }
}

/// Insert model for a freshly created, pending transaction.
pub(crate) fn new_row(txn: &VasTransaction) -> ActiveModel {
    ActiveModel {
        id: ActiveValue::Set(txn.id.to_string()),
        user_id: ActiveValue::Set(txn.user_id.clone()),
        kind: ActiveValue::Set(txn.kind.as_str().to_string()),
        amount_minor: ActiveValue::Set(txn.amount_minor),
        plan: ActiveValue::Set(txn.plan.clone()),
        target: ActiveValue::Set(txn.target.clone()),
        provider: ActiveValue::Set(txn.provider.clone()),
        status: ActiveValue::Set(txn.status.as_str().to_string()),
        failure_code: ActiveValue::Set(None),
        failure_reason: ActiveValue::Set(None),
        reserved_minor: ActiveValue::Set(txn.reserved_minor),
        expires_at: ActiveValue::Set(txn.expires_at),
        created_at: ActiveValue::Set(txn.created_at),
        updated_at: ActiveValue::Set(txn.updated_at),
        needs_reconciliation: ActiveValue::Set(false),
        reconciliation_reason: ActiveValue::Set(None),
        reconciliation_details: ActiveValue::Set(None),
        reconciliation_dismissed: ActiveValue::Set(false),
        reconciliation_dismissed_by: ActiveValue::Set(None),
        reconciliation_dismissed_at: ActiveValue::Set(None),
        reconciliation_dismissed_reason: ActiveValue::Set(None),
        reconciliation_dismissed_notes: ActiveValue::Set(None),
        reconciliation_recovered_by: ActiveValue::Set(None),
        reconciliation_recovered_at: ActiveValue::Set(None),
        reconciliation_resolved: ActiveValue::Set(false),
        reconciliation_resolved_by: ActiveValue::Set(None),
        reconciliation_resolved_at: ActiveValue::Set(None),
        resolution_notes: ActiveValue::Set(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [VasStatus; 5] = [
        VasStatus::Pending,
        VasStatus::Success,
        VasStatus::Failed,
        VasStatus::NeedsReconciliation,
        VasStatus::Expired,
    ];

    #[test]
    fn success_and_expired_are_final() {
        let events = [
            VasEvent::Succeed,
            VasEvent::Fail,
            VasEvent::Expire,
            VasEvent::Flag { dismissed: false },
            VasEvent::Flag { dismissed: true },
            VasEvent::Resolve(Resolution::Success),
            VasEvent::Resolve(Resolution::Failed),
        ];
        for event in events {
            assert_eq!(VasStatus::Success.apply(event), None, "{event:?}");
            assert_eq!(VasStatus::Expired.apply(event), None, "{event:?}");
        }
    }

    #[test]
    fn only_pending_completes() {
        for status in ALL {
            let expected = (status == VasStatus::Pending).then_some(VasStatus::Success);
            assert_eq!(status.apply(VasEvent::Succeed), expected);
        }
        assert_eq!(VasStatus::Failed.apply(VasEvent::Fail), None);
        assert_eq!(
            VasStatus::Pending.apply(VasEvent::Expire),
            Some(VasStatus::Expired)
        );
    }

    #[test]
    fn flagging_twice_needs_a_dismissal() {
        let flag = VasEvent::Flag { dismissed: false };
        assert_eq!(
            VasStatus::Failed.apply(flag),
            Some(VasStatus::NeedsReconciliation)
        );
        assert_eq!(VasStatus::NeedsReconciliation.apply(flag), None);
        assert_eq!(
            VasStatus::NeedsReconciliation.apply(VasEvent::Flag { dismissed: true }),
            Some(VasStatus::NeedsReconciliation)
        );
    }

    #[test]
    fn resolution_is_only_for_flagged() {
        let resolve = VasEvent::Resolve(Resolution::Failed);
        assert_eq!(
            VasStatus::NeedsReconciliation.apply(resolve),
            Some(VasStatus::Failed)
        );
        assert_eq!(VasStatus::Pending.apply(resolve), None);
        assert_eq!(VasStatus::Failed.apply(resolve), None);
    }

    #[test]
    fn purchases_debit_and_funding_credits() {
        assert_eq!(VasKind::Data.wallet_delta(500), -500);
        assert_eq!(VasKind::WalletFunding.wallet_delta(500), 500);
        assert!(!VasKind::Refund.debits_wallet());
    }

    #[test]
    fn resolution_parses_case_insensitively() {
        assert_eq!(Resolution::try_from("SUCCESS").unwrap(), Resolution::Success);
        assert!(Resolution::try_from("refunded").is_err());
    }
}
