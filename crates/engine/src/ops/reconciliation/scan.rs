//! Periodic detection of transactions whose outcome can't be trusted.
//!
//! Three detectors run in order: suspicious failures, stuck pending and
//! attempts without a provider. A transaction is reported by the first
//! detector that finds it and never twice in one scan.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use sea_orm::{QueryFilter, QueryOrder, QuerySelect, Select, prelude::*};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    Evidence, FailureClass, MarkRequest, ReconciliationReason, ResultEngine, VasStatus,
    VasTransaction, ops::Engine, vas,
};

const NO_PROVIDER_PATTERN: &str = "no provider recorded";

/// Grace periods and batch sizes of [`Engine::scan_once`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanPolicy {
    /// Failed transactions younger than this are left alone.
    pub failed_grace: Duration,
    pub pending_grace: Duration,
    /// How far back the provider-null detector looks.
    pub provider_null_window: Duration,
    pub failed_batch: u64,
    pub pending_batch: u64,
    pub provider_null_batch: u64,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            failed_grace: Duration::minutes(5),
            pending_grace: Duration::minutes(10),
            provider_null_window: Duration::hours(24),
            failed_batch: 100,
            pending_batch: 100,
            provider_null_batch: 50,
        }
    }
}

/// One transaction a detector picked up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScanFinding {
    pub transaction_id: Uuid,
    pub user_id: String,
    pub reason: ReconciliationReason,
    pub status: VasStatus,
    pub amount_minor: i64,
    pub age_minutes: i64,
    pub detail: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ScanReport {
    pub dry_run: bool,
    pub scanned_at: DateTime<Utc>,
    pub findings: Vec<ScanFinding>,
    /// Transactions this scan put into the queue. Always empty on dry runs.
    pub flagged: Vec<Uuid>,
    /// Findings that could not be flagged, with the error.
    pub errors: Vec<String>,
}

impl ScanReport {
    pub fn candidates(&self) -> usize {
        self.findings.len()
    }
}

/// The wording or code that makes a failed transaction worth a review, or
/// `None` for a legitimate failure.
fn suspicious_failure(txn: &VasTransaction) -> Option<String> {
    let Some(provider) = txn.provider.as_deref() else {
        return Some(NO_PROVIDER_PATTERN.to_string());
    };
    let failure = txn.failure.as_ref()?;
    match failure.code.class() {
        FailureClass::Suspicious => Some(failure.code.as_str().to_string()),
        FailureClass::SuspiciousWithProvider => Some(format!(
            "{} by {provider}",
            failure.code.as_str()
        )),
        FailureClass::Clear | FailureClass::Unclassified => None,
    }
}

fn unflagged(status: VasStatus) -> Select<vas::Entity> {
    vas::Entity::find()
        .filter(vas::Column::Status.eq(status.as_str()))
        .filter(vas::Column::NeedsReconciliation.eq(false))
        .order_by_desc(vas::Column::CreatedAt)
}

fn finding(
    txn: &VasTransaction,
    reason: ReconciliationReason,
    detail: String,
    now: DateTime<Utc>,
) -> ScanFinding {
    ScanFinding {
        transaction_id: txn.id,
        user_id: txn.user_id.clone(),
        reason,
        status: txn.status,
        amount_minor: txn.amount_minor,
        age_minutes: (now - txn.created_at).num_minutes(),
        detail,
    }
}

impl Engine {
    /// Runs every detector once and flags what they find.
    ///
    /// With `dry_run` the findings are reported and nothing is written. A
    /// finding that fails to flag is recorded in [`ScanReport::errors`] and
    /// does not stop the scan.
    pub async fn scan_once(&self, dry_run: bool) -> ResultEngine<ScanReport> {
        let now = Utc::now();
        let policy = &self.scan_policy;
        let mut seen = HashSet::new();
        let mut candidates: Vec<(ScanFinding, MarkRequest)> = Vec::new();

        let failed = unflagged(VasStatus::Failed)
            .filter(vas::Column::CreatedAt.lt(now - policy.failed_grace))
            .limit(policy.failed_batch)
            .all(&self.database)
            .await?;
        for model in failed {
            let txn = VasTransaction::try_from(model)?;
            let Some(pattern) = suspicious_failure(&txn) else {
                continue;
            };
            if seen.insert(txn.id) {
                let request = MarkRequest::new(ReconciliationReason::SuspiciousFailure)
                    .evidence(Evidence::SuspiciousPattern {
                        pattern: pattern.clone(),
                    });
                candidates.push((
                    finding(&txn, ReconciliationReason::SuspiciousFailure, pattern, now),
                    request,
                ));
            }
        }

        let pending = unflagged(VasStatus::Pending)
            .filter(vas::Column::CreatedAt.lt(now - policy.pending_grace))
            .limit(policy.pending_batch)
            .all(&self.database)
            .await?;
        for model in pending {
            let txn = VasTransaction::try_from(model)?;
            if seen.insert(txn.id) {
                let stuck_minutes = (now - txn.created_at).num_minutes();
                let request = MarkRequest::new(ReconciliationReason::StuckPending)
                    .evidence(Evidence::StuckPending { stuck_minutes });
                candidates.push((
                    finding(
                        &txn,
                        ReconciliationReason::StuckPending,
                        format!("pending for {stuck_minutes} minutes"),
                        now,
                    ),
                    request,
                ));
            }
        }

        let provider_null = vas::Entity::find()
            .filter(vas::Column::Provider.is_null())
            .filter(vas::Column::Status.is_in([
                VasStatus::Pending.as_str(),
                VasStatus::Failed.as_str(),
            ]))
            .filter(vas::Column::NeedsReconciliation.eq(false))
            .filter(vas::Column::CreatedAt.gte(now - policy.provider_null_window))
            .filter(vas::Column::CreatedAt.lt(now - policy.failed_grace))
            .order_by_desc(vas::Column::CreatedAt)
            .limit(policy.provider_null_batch)
            .all(&self.database)
            .await?;
        for model in provider_null {
            let txn = VasTransaction::try_from(model)?;
            if seen.insert(txn.id) {
                candidates.push((
                    finding(
                        &txn,
                        ReconciliationReason::ProviderNone,
                        NO_PROVIDER_PATTERN.to_string(),
                        now,
                    ),
                    MarkRequest::new(ReconciliationReason::ProviderNone),
                ));
            }
        }

        let mut report = ScanReport {
            dry_run,
            scanned_at: now,
            findings: Vec::with_capacity(candidates.len()),
            flagged: Vec::new(),
            errors: Vec::new(),
        };
        for (finding, request) in candidates {
            if !dry_run {
                match self
                    .mark_for_reconciliation(finding.transaction_id, request)
                    .await
                {
                    Ok(true) => report.flagged.push(finding.transaction_id),
                    Ok(false) => {}
                    Err(err) => {
                        tracing::warn!(
                            transaction_id = %finding.transaction_id,
                            "could not flag scan finding: {err}"
                        );
                        report
                            .errors
                            .push(format!("{}: {err}", finding.transaction_id));
                    }
                }
            }
            report.findings.push(finding);
        }

        tracing::info!(
            candidates = report.candidates(),
            flagged = report.flagged.len(),
            errors = report.errors.len(),
            dry_run,
            "reconciliation scan finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FailureCode, FailureReason, VasKind, vas::ReconciliationState};

    fn failed(provider: Option<&str>, failure: FailureReason) -> VasTransaction {
        let now = Utc::now();
        VasTransaction {
            id: Uuid::new_v4(),
            user_id: "ada".to_string(),
            kind: VasKind::Airtime,
            amount_minor: 10_000,
            plan: None,
            target: "08030000000".to_string(),
            provider: provider.map(ToString::to_string),
            status: VasStatus::Failed,
            failure: Some(failure),
            reserved_minor: 0,
            expires_at: None,
            created_at: now,
            updated_at: now,
            reconciliation: ReconciliationState::default(),
        }
    }

    #[test]
    fn missing_provider_is_always_suspicious() {
        let txn = failed(None, FailureReason::from_text("Insufficient balance"));
        assert_eq!(
            suspicious_failure(&txn).as_deref(),
            Some(NO_PROVIDER_PATTERN)
        );
    }

    #[test]
    fn clear_and_unknown_failures_are_legitimate() {
        let clear = failed(Some("peyflex"), FailureReason::from_text("Invalid phone number"));
        assert_eq!(suspicious_failure(&clear), None);
        let unknown = failed(Some("peyflex"), FailureReason::from_text("declined by bank"));
        assert_eq!(suspicious_failure(&unknown), None);
    }

    #[test]
    fn suspicious_codes_are_flagged() {
        let txn = failed(
            Some("monnify"),
            FailureReason::new(FailureCode::PlanMismatch, "plan mismatch on 1GB"),
        );
        assert_eq!(suspicious_failure(&txn).as_deref(), Some("plan_mismatch"));

        let unconfirmed = failed(
            Some("monnify"),
            FailureReason::new(FailureCode::ProviderUnconfirmed, "provider did not confirm"),
        );
        assert!(suspicious_failure(&unconfirmed).is_some());
    }

    #[test]
    fn default_policy_matches_documented_windows() {
        let policy = ScanPolicy::default();
        assert_eq!(policy.failed_grace, Duration::minutes(5));
        assert_eq!(policy.pending_grace, Duration::minutes(10));
        assert_eq!(policy.provider_null_window, Duration::hours(24));
        assert_eq!(
            (policy.failed_batch, policy.pending_batch, policy.provider_null_batch),
            (100, 100, 50)
        );
    }
}
