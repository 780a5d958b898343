//! Reconciliation reasons and the review checklist attached to each flag.
//!
//! When a transaction is flagged, the engine stores a
//! [`ReconciliationDetails`] snapshot next to it: what it looked like at
//! flag time, how urgent it is, and the steps an admin should follow before
//! resolving it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EngineError, VasKind, VasStatus, VasTransaction};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationReason {
    /// The provider delivered a different plan or price than requested.
    PlanMismatch,
    /// The provider delivered but we never recorded it.
    GhostSuccess,
    /// Pending for longer than the grace period.
    StuckPending,
    /// No provider was ever recorded for the attempt.
    ProviderNone,
    /// Failed with wording that suggests the service went through.
    #[serde(rename = "AUTO_SCAN_SUSPICIOUS_FAILURE")]
    SuspiciousFailure,
    /// Flagged by an admin.
    Manual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl ReconciliationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlanMismatch => "PLAN_MISMATCH",
            Self::GhostSuccess => "GHOST_SUCCESS",
            Self::StuckPending => "STUCK_PENDING",
            Self::ProviderNone => "PROVIDER_NONE",
            Self::SuspiciousFailure => "AUTO_SCAN_SUSPICIOUS_FAILURE",
            Self::Manual => "MANUAL",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            Self::SuspiciousFailure | Self::Manual => Severity::Medium,
            _ => Severity::High,
        }
    }

    /// Whether the scanner (rather than a person) raises this reason.
    pub fn auto_detected(self) -> bool {
        !matches!(self, Self::GhostSuccess | Self::Manual)
    }

    pub fn action_required(self) -> &'static str {
        match self {
            Self::PlanMismatch => {
                "Review and potentially refund difference or debit correct amount"
            }
            Self::GhostSuccess => "Verify if user received service, then debit wallet if confirmed",
            Self::StuckPending => "Verify actual transaction outcome with provider",
            Self::ProviderNone => "Verify if user received service despite no recorded provider",
            Self::SuspiciousFailure => {
                "Verify if user actually received service despite FAILED status"
            }
            Self::Manual => "Review the transaction and resolve it",
        }
    }

    pub fn verification_steps(self) -> &'static [&'static str] {
        match self {
            Self::PlanMismatch => &[
                "Verify user actually received the delivered plan",
                "Check if wallet was debited for requested or delivered amount",
                "If user paid less but got more, debit the difference",
                "If user paid more but got less, refund the difference",
            ],
            Self::GhostSuccess => &[
                "Contact user to verify they received the service",
                "Check provider logs to confirm transaction succeeded",
                "If confirmed, resolve as SUCCESS so the wallet is debited",
            ],
            Self::StuckPending => &[
                "Check provider logs for this transaction",
                "Contact provider support if needed",
                "If provider succeeded, resolve as SUCCESS and debit wallet",
                "If provider failed, resolve as FAILED (no wallet debit)",
            ],
            Self::ProviderNone => &[
                "Contact user to verify if they received the service",
                "Check if there are any provider logs for this transaction",
                "If user got service, resolve as SUCCESS and debit wallet",
                "If user did not get service, resolve as FAILED",
            ],
            Self::SuspiciousFailure => &[
                "Contact user to verify if they received the service",
                "Check provider logs for this transaction",
                "If user got service, resolve as SUCCESS and debit wallet",
                "If user did not get service, dismiss this reconciliation item",
            ],
            Self::Manual => &[
                "Check provider logs for this transaction",
                "Resolve as SUCCESS if the service was delivered, FAILED otherwise",
            ],
        }
    }
}

impl TryFrom<&str> for ReconciliationReason {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "PLAN_MISMATCH" => Ok(Self::PlanMismatch),
            "GHOST_SUCCESS" => Ok(Self::GhostSuccess),
            "STUCK_PENDING" => Ok(Self::StuckPending),
            "PROVIDER_NONE" => Ok(Self::ProviderNone),
            "AUTO_SCAN_SUSPICIOUS_FAILURE" => Ok(Self::SuspiciousFailure),
            "MANUAL" => Ok(Self::Manual),
            other => Err(EngineError::InvalidName(format!(
                "invalid reconciliation reason: {other}"
            ))),
        }
    }
}

/// Reason-specific facts captured at flag time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Evidence {
    PlanMismatch {
        requested_plan: Option<String>,
        requested_amount_minor: i64,
        delivered_plan: Option<String>,
        delivered_amount_minor: i64,
        /// `delivered - requested`; positive means the user got more.
        price_difference_minor: i64,
    },
    StuckPending {
        stuck_minutes: i64,
    },
    SuspiciousPattern {
        pattern: String,
    },
    UserReport {
        report: String,
    },
    /// Delivered, but the wallet could no longer pay for it.
    UnpaidDelivery {
        delivered_plan: Option<String>,
        delivered_amount_minor: i64,
        available_minor: i64,
    },
}

/// Snapshot stored with a flagged transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationDetails {
    pub original_status: VasStatus,
    pub provider: Option<String>,
    pub severity: Severity,
    pub auto_detected: bool,
    pub action_required: String,
    pub verification_steps: Vec<String>,
    pub marked_at: DateTime<Utc>,
    pub marked_by: Option<String>,
    pub transaction_kind: VasKind,
    pub amount_minor: i64,
    pub target: String,
    pub failure_reason: Option<String>,
    pub notes: Option<String>,
    pub evidence: Option<Evidence>,
}

impl ReconciliationDetails {
    pub fn capture(txn: &VasTransaction, request: &MarkRequest, at: DateTime<Utc>) -> Self {
        let reason = request.reason;
        Self {
            original_status: txn.status,
            provider: txn.provider.clone(),
            severity: reason.severity(),
            auto_detected: reason.auto_detected() && request.actor.is_none(),
            action_required: reason.action_required().to_string(),
            verification_steps: reason
                .verification_steps()
                .iter()
                .enumerate()
                .map(|(i, step)| format!("{}. {step}", i + 1))
                .collect(),
            marked_at: at,
            marked_by: request.actor.clone(),
            transaction_kind: txn.kind,
            amount_minor: txn.amount_minor,
            target: txn.target.clone(),
            failure_reason: txn.failure.as_ref().map(|f| f.message.clone()),
            notes: request.notes.clone(),
            evidence: request.evidence.clone(),
        }
    }
}

/// A request to put a transaction into the reconciliation queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarkRequest {
    pub reason: ReconciliationReason,
    pub evidence: Option<Evidence>,
    /// `None` when the scanner or the purchase path raises the flag.
    pub actor: Option<String>,
    pub notes: Option<String>,
}

impl MarkRequest {
    #[must_use]
    pub fn new(reason: ReconciliationReason) -> Self {
        Self {
            reason,
            evidence: None,
            actor: None,
            notes: None,
        }
    }

    #[must_use]
    pub fn evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = Some(evidence);
        self
    }

    #[must_use]
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    #[must_use]
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use uuid::Uuid;

    use super::*;
    use crate::vas::ReconciliationState;

    fn failed_txn() -> VasTransaction {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        VasTransaction {
            id: Uuid::new_v4(),
            user_id: "ada".to_string(),
            kind: VasKind::Data,
            amount_minor: 50_000,
            plan: Some("1GB-30D".to_string()),
            target: "08030000000".to_string(),
            provider: Some("monnify".to_string()),
            status: VasStatus::Failed,
            failure: None,
            reserved_minor: 0,
            expires_at: None,
            created_at: at,
            updated_at: at,
            reconciliation: ReconciliationState::default(),
        }
    }

    #[test]
    fn severities_follow_reason() {
        assert_eq!(ReconciliationReason::PlanMismatch.severity(), Severity::High);
        assert_eq!(ReconciliationReason::StuckPending.severity(), Severity::High);
        assert_eq!(
            ReconciliationReason::SuspiciousFailure.severity(),
            Severity::Medium
        );
    }

    #[test]
    fn every_reason_has_a_checklist() {
        for reason in [
            ReconciliationReason::PlanMismatch,
            ReconciliationReason::GhostSuccess,
            ReconciliationReason::StuckPending,
            ReconciliationReason::ProviderNone,
            ReconciliationReason::SuspiciousFailure,
            ReconciliationReason::Manual,
        ] {
            assert!(!reason.verification_steps().is_empty(), "{reason:?}");
            assert_eq!(
                ReconciliationReason::try_from(reason.as_str()).unwrap(),
                reason
            );
        }
    }

    #[test]
    fn capture_numbers_steps_and_keeps_the_original_status() {
        let txn = failed_txn();
        let at = Utc.timestamp_opt(1_700_000_600, 0).unwrap();
        let request = MarkRequest::new(ReconciliationReason::SuspiciousFailure).evidence(
            Evidence::SuspiciousPattern {
                pattern: "plan mismatch".to_string(),
            },
        );
        let details = ReconciliationDetails::capture(&txn, &request, at);
        assert_eq!(details.original_status, VasStatus::Failed);
        assert_eq!(details.provider.as_deref(), Some("monnify"));
        assert!(details.auto_detected);
        assert!(details.verification_steps[0].starts_with("1. "));
        assert_eq!(details.verification_steps.len(), 4);
    }

    #[test]
    fn manual_flags_are_not_auto_detected() {
        let txn = failed_txn();
        let request = MarkRequest::new(ReconciliationReason::StuckPending).actor("admin-1");
        let details = ReconciliationDetails::capture(&txn, &request, txn.created_at);
        assert!(!details.auto_detected);
        assert_eq!(details.marked_by.as_deref(), Some("admin-1"));
    }

    #[test]
    fn details_survive_json_storage() {
        let txn = failed_txn();
        let request = MarkRequest::new(ReconciliationReason::PlanMismatch).evidence(
            Evidence::PlanMismatch {
                requested_plan: Some("1GB-30D".to_string()),
                requested_amount_minor: 50_000,
                delivered_plan: Some("1.5GB-30D".to_string()),
                delivered_amount_minor: 65_000,
                price_difference_minor: 15_000,
            },
        );
        let details = ReconciliationDetails::capture(&txn, &request, txn.created_at);
        let json = serde_json::to_string(&details).unwrap();
        assert!(json.contains("\"type\":\"plan_mismatch\""));
        let back: ReconciliationDetails = serde_json::from_str(&json).unwrap();
        assert_eq!(back, details);
    }
}
