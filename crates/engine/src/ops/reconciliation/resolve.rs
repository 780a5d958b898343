//! Admin side of the queue: listing, stats and verdicts.

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    DatabaseTransaction, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select,
    TransactionTrait, prelude::*, sea_query::Expr,
};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    AdminAction, AdminActionKind, EngineError, ManualFlagCmd, MarkRequest, Notification,
    ResolveCmd, Resolution, ResultEngine, VasEvent, VasStatus, VasTransaction,
    util::{normalize_optional_text, normalize_required_text},
    vas,
};

use crate::ops::{
    Engine, record_admin_action,
    vas::{exec_guarded, guarded_update, next_status, release_in, require_vas, settle_in},
    wallets::DeltaOutcome,
    with_tx,
};

use super::flag_in;

const RESOLVED_STATS_DAYS: i64 = 30;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationStats {
    pub pending_count: u64,
    pub dismissed_count: u64,
    pub resolved_last_30_days: u64,
    pub pending_amount_minor: i64,
    pub affected_users: u64,
}

/// Outcome of one id in a bulk resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BulkResolveItem {
    pub transaction_id: Uuid,
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BulkResolveReport {
    pub items: Vec<BulkResolveItem>,
    pub succeeded: usize,
    pub failed: usize,
}

/// Items still waiting for a verdict and not dismissed.
fn awaiting_review() -> Select<vas::Entity> {
    vas::Entity::find()
        .filter(vas::Column::Status.eq(VasStatus::NeedsReconciliation.as_str()))
        .filter(vas::Column::NeedsReconciliation.eq(true))
        .filter(vas::Column::ReconciliationDismissed.eq(false))
        .filter(vas::Column::ReconciliationResolved.eq(false))
}

fn dismissed() -> Select<vas::Entity> {
    vas::Entity::find()
        .filter(vas::Column::ReconciliationDismissed.eq(true))
        .filter(vas::Column::ReconciliationResolved.eq(false))
}

fn into_transactions(models: Vec<vas::Model>) -> ResultEngine<Vec<VasTransaction>> {
    models.into_iter().map(VasTransaction::try_from).collect()
}

async fn resolve_in(
    db_tx: &DatabaseTransaction,
    cmd: &ResolveCmd,
    actor: &str,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> ResultEngine<(VasTransaction, Option<DeltaOutcome>)> {
    let model = require_vas(db_tx, cmd.transaction_id).await?;
    if model.reconciliation_resolved {
        return Err(EngineError::InvalidState(format!(
            "transaction {} was already resolved",
            model.id
        )));
    }
    let (from, to) = next_status(&model, VasEvent::Resolve(cmd.resolution))?;

    let update = guarded_update(&model, from, to, now)
        .col_expr(vas::Column::ReconciliationResolved, Expr::value(true))
        .col_expr(vas::Column::ReconciliationResolvedBy, Expr::value(actor))
        .col_expr(vas::Column::ReconciliationResolvedAt, Expr::value(now))
        .col_expr(
            vas::Column::ResolutionNotes,
            Expr::value(notes.map(ToString::to_string)),
        )
        .filter(vas::Column::ReconciliationResolved.eq(false));
    exec_guarded(db_tx, update, &model.id).await?;
    let released_minor = release_in(db_tx, &model, now).await?;

    let txn = VasTransaction::try_from(model)?;
    let settled = match cmd.resolution {
        // The service was delivered, so the debit goes through even if it
        // takes the balance below zero.
        Resolution::Success => {
            let (_, outcome) = settle_in(
                db_tx,
                &txn,
                format!("reconciliation of {} resolved as success", txn.id),
                true,
                now,
            )
            .await?;
            Some(outcome)
        }
        Resolution::Failed => None,
    };

    record_admin_action(
        db_tx,
        &AdminAction::new(
            actor,
            AdminActionKind::ResolveReconciliation,
            txn.id.to_string(),
            notes,
            json!({
                "resolution": cmd.resolution.as_str(),
                "previous_status": txn.status.as_str(),
                "reconciliation_reason": txn.reconciliation.reason.map(|r| r.as_str()),
                "wallet_delta": settled
                    .filter(|o| o.applied)
                    .map(|_| txn.kind.wallet_delta(txn.amount_minor)),
                "balance_after": settled.map(|o| o.balance_minor),
                "released_minor": released_minor,
            }),
            now,
        ),
    )
    .await?;

    let resolved = VasTransaction::try_from(require_vas(db_tx, cmd.transaction_id).await?)?;
    Ok((resolved, settled))
}

async fn dismiss_in(
    db_tx: &DatabaseTransaction,
    transaction_id: Uuid,
    actor: &str,
    reason: &str,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> ResultEngine<VasTransaction> {
    let model = require_vas(db_tx, transaction_id).await?;
    if !VasTransaction::try_from(model.clone())?.awaits_review() {
        return Err(EngineError::InvalidState(format!(
            "transaction {transaction_id} is not awaiting review"
        )));
    }
    let update = vas::Entity::update_many()
        .col_expr(vas::Column::ReconciliationDismissed, Expr::value(true))
        .col_expr(vas::Column::ReconciliationDismissedBy, Expr::value(actor))
        .col_expr(vas::Column::ReconciliationDismissedAt, Expr::value(now))
        .col_expr(vas::Column::ReconciliationDismissedReason, Expr::value(reason))
        .col_expr(
            vas::Column::ReconciliationDismissedNotes,
            Expr::value(notes.map(ToString::to_string)),
        )
        .col_expr(vas::Column::UpdatedAt, Expr::value(now))
        .filter(vas::Column::Id.eq(model.id.clone()))
        .filter(vas::Column::Status.eq(VasStatus::NeedsReconciliation.as_str()))
        .filter(vas::Column::ReconciliationDismissed.eq(false))
        .filter(vas::Column::ReconciliationResolved.eq(false));
    exec_guarded(db_tx, update, &model.id).await?;
    // A dismissed item has no verdict to wait for, so it stops holding funds.
    let released_minor = release_in(db_tx, &model, now).await?;

    record_admin_action(
        db_tx,
        &AdminAction::new(
            actor,
            AdminActionKind::DismissReconciliation,
            transaction_id.to_string(),
            Some(reason),
            json!({
                "notes": notes,
                "reconciliation_reason": model.reconciliation_reason,
                "released_minor": released_minor,
            }),
            now,
        ),
    )
    .await?;
    VasTransaction::try_from(require_vas(db_tx, transaction_id).await?)
}

impl Engine {
    /// Open review items, newest first.
    pub async fn list_pending_reconciliations(
        &self,
        limit: u64,
    ) -> ResultEngine<Vec<VasTransaction>> {
        let rows = awaiting_review()
            .order_by_desc(vas::Column::UpdatedAt)
            .order_by_desc(vas::Column::Id)
            .limit(limit)
            .all(&self.database)
            .await?;
        into_transactions(rows)
    }

    pub async fn list_dismissed_reconciliations(
        &self,
        limit: u64,
    ) -> ResultEngine<Vec<VasTransaction>> {
        let rows = dismissed()
            .order_by_desc(vas::Column::ReconciliationDismissedAt)
            .order_by_desc(vas::Column::Id)
            .limit(limit)
            .all(&self.database)
            .await?;
        into_transactions(rows)
    }

    /// Every transaction of `user_id` that was ever flagged, in any state.
    pub async fn list_reconciliations_for_user(
        &self,
        user_id: &str,
    ) -> ResultEngine<Vec<VasTransaction>> {
        let rows = vas::Entity::find()
            .filter(vas::Column::UserId.eq(user_id))
            .filter(vas::Column::NeedsReconciliation.eq(true))
            .order_by_desc(vas::Column::CreatedAt)
            .all(&self.database)
            .await?;
        into_transactions(rows)
    }

    pub async fn reconciliation_stats(
        &self,
        now: DateTime<Utc>,
    ) -> ResultEngine<ReconciliationStats> {
        let pending: Vec<(String, i64)> = awaiting_review()
            .select_only()
            .column(vas::Column::UserId)
            .column(vas::Column::AmountMinor)
            .into_tuple()
            .all(&self.database)
            .await?;
        let dismissed_count = dismissed().count(&self.database).await?;
        let resolved_last_30_days = vas::Entity::find()
            .filter(vas::Column::ReconciliationResolved.eq(true))
            .filter(
                vas::Column::ReconciliationResolvedAt
                    .gte(now - Duration::days(RESOLVED_STATS_DAYS)),
            )
            .count(&self.database)
            .await?;

        let mut users: Vec<&str> = pending.iter().map(|(user, _)| user.as_str()).collect();
        users.sort_unstable();
        users.dedup();

        Ok(ReconciliationStats {
            pending_count: pending.len() as u64,
            dismissed_count,
            resolved_last_30_days,
            pending_amount_minor: pending.iter().map(|(_, amount)| amount).sum(),
            affected_users: users.len() as u64,
        })
    }

    /// Takes an item off the queue without a verdict. The transaction keeps
    /// its status and releases any funds it still held.
    pub async fn dismiss_reconciliation(
        &self,
        transaction_id: Uuid,
        actor: &str,
        reason: &str,
        notes: Option<&str>,
    ) -> ResultEngine<VasTransaction> {
        let actor = normalize_required_text(actor, "actor")?;
        let reason = normalize_required_text(reason, "reason")?;
        let notes = normalize_optional_text(notes);
        let now = Utc::now();

        let result = with_tx!(self, |db_tx| {
            dismiss_in(
                &db_tx,
                transaction_id,
                &actor,
                &reason,
                notes.as_deref(),
                now,
            )
            .await
        });
        let txn = self
            .alert_on_violation(&transaction_id.to_string(), result)
            .await?;

        tracing::info!(%transaction_id, actor = %actor, "reconciliation dismissed");
        Ok(txn)
    }

    /// Puts a dismissed item back into the queue.
    pub async fn recover_reconciliation(
        &self,
        transaction_id: Uuid,
        actor: &str,
        reason: &str,
    ) -> ResultEngine<VasTransaction> {
        let actor = normalize_required_text(actor, "actor")?;
        let reason = normalize_required_text(reason, "reason")?;
        let now = Utc::now();

        let txn = with_tx!(self, |db_tx| {
            let model = require_vas(&db_tx, transaction_id).await?;
            if !model.reconciliation_dismissed || model.reconciliation_resolved {
                return Err(EngineError::InvalidState(format!(
                    "transaction {transaction_id} is not a dismissed review item"
                )));
            }
            let update = vas::Entity::update_many()
                .col_expr(vas::Column::ReconciliationDismissed, Expr::value(false))
                .col_expr(vas::Column::ReconciliationRecoveredBy, Expr::value(actor.as_str()))
                .col_expr(vas::Column::ReconciliationRecoveredAt, Expr::value(now))
                .col_expr(vas::Column::UpdatedAt, Expr::value(now))
                .filter(vas::Column::Id.eq(model.id.clone()))
                .filter(vas::Column::ReconciliationDismissed.eq(true))
                .filter(vas::Column::ReconciliationResolved.eq(false));
            exec_guarded(&db_tx, update, &model.id).await?;

            record_admin_action(
                &db_tx,
                &AdminAction::new(
                    &actor,
                    AdminActionKind::RecoverReconciliation,
                    transaction_id.to_string(),
                    Some(&reason),
                    json!({
                        "dismissed_by": model.reconciliation_dismissed_by,
                        "dismissed_reason": model.reconciliation_dismissed_reason,
                    }),
                    now,
                ),
            )
            .await?;
            VasTransaction::try_from(require_vas(&db_tx, transaction_id).await?)
        })?;

        tracing::info!(%transaction_id, actor = %actor, "reconciliation recovered");
        Ok(txn)
    }

    /// Gives a flagged transaction its final status.
    ///
    /// Any funds the transaction still held are released first. `Success`
    /// debits the wallet once, keyed on the transaction, and may take the
    /// balance negative. `Failed` leaves the wallet alone. A
    /// transaction that is not flagged, or already resolved, is
    /// [`EngineError::InvalidState`] and nothing is written.
    pub async fn resolve_reconciliation(&self, cmd: ResolveCmd) -> ResultEngine<VasTransaction> {
        let actor = normalize_required_text(&cmd.actor, "actor")?;
        let notes = normalize_optional_text(cmd.notes.as_deref());
        let now = Utc::now();

        let result = with_tx!(self, |db_tx| {
            resolve_in(&db_tx, &cmd, &actor, notes.as_deref(), now).await
        });
        let (txn, settled) = self
            .alert_on_violation(&cmd.transaction_id.to_string(), result)
            .await?;

        tracing::info!(
            transaction_id = %txn.id,
            resolution = cmd.resolution.as_str(),
            actor = %actor,
            "reconciliation resolved"
        );
        if let Some(outcome) = settled.filter(|o| o.applied) {
            self.notify(Notification::BalanceChanged {
                user_id: txn.user_id.clone(),
                delta_minor: txn.kind.wallet_delta(txn.amount_minor),
                balance_minor: outcome.balance_minor,
                reason: format!("reconciliation of {} resolved as success", txn.id),
            });
        }
        Ok(txn)
    }

    /// Resolves each id on its own; one failure doesn't stop the rest. A
    /// summary admin action is recorded once at the end.
    pub async fn bulk_resolve_reconciliations(
        &self,
        transaction_ids: &[Uuid],
        actor: &str,
        resolution: Resolution,
        notes: Option<&str>,
    ) -> ResultEngine<BulkResolveReport> {
        let actor = normalize_required_text(actor, "actor")?;
        let mut report = BulkResolveReport::default();

        for &transaction_id in transaction_ids {
            let mut cmd = ResolveCmd::new(transaction_id, actor.as_str(), resolution);
            if let Some(notes) = notes {
                cmd = cmd.notes(notes);
            }
            let item = match self.resolve_reconciliation(cmd).await {
                Ok(_) => BulkResolveItem {
                    transaction_id,
                    ok: true,
                    error: None,
                },
                Err(err) => BulkResolveItem {
                    transaction_id,
                    ok: false,
                    error: Some(err.to_string()),
                },
            };
            if item.ok {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
            report.items.push(item);
        }

        record_admin_action(
            &self.database,
            &AdminAction::new(
                &actor,
                AdminActionKind::BulkResolveReconciliation,
                "bulk",
                notes,
                json!({
                    "resolution": resolution.as_str(),
                    "transaction_ids": transaction_ids,
                    "succeeded": report.succeeded,
                    "failed": report.failed,
                }),
                Utc::now(),
            ),
        )
        .await?;

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            actor = %actor,
            "bulk reconciliation finished"
        );
        Ok(report)
    }

    /// Admin flag, for example after a user reports receiving a service the
    /// ledger shows as failed. Returns `false` when the transaction already
    /// awaits review.
    pub async fn mark_manually(&self, cmd: ManualFlagCmd) -> ResultEngine<bool> {
        let actor = normalize_required_text(&cmd.actor, "actor")?;
        let now = Utc::now();
        let mut request = MarkRequest::new(cmd.reason).actor(actor.as_str());
        if let Some(notes) = normalize_optional_text(cmd.notes.as_deref()) {
            request = request.notes(notes);
        }
        if let Some(evidence) = cmd.evidence.clone() {
            request = request.evidence(evidence);
        }

        let flagged = with_tx!(self, |db_tx| {
            let model = require_vas(&db_tx, cmd.transaction_id).await?;
            let flagged = flag_in(&db_tx, &model, &request, now).await?;
            if flagged.is_some() {
                record_admin_action(
                    &db_tx,
                    &AdminAction::new(
                        &actor,
                        AdminActionKind::MarkReconciliation,
                        cmd.transaction_id.to_string(),
                        request.notes.as_deref(),
                        json!({
                            "reason": cmd.reason.as_str(),
                            "previous_status": model.status,
                            "evidence": request.evidence,
                        }),
                        now,
                    ),
                )
                .await?;
            }
            Ok(flagged)
        })?;

        let Some(txn) = flagged else {
            return Ok(false);
        };
        tracing::info!(
            transaction_id = %txn.id,
            reason = cmd.reason.as_str(),
            actor = %actor,
            "transaction flagged manually"
        );
        self.notify(Notification::NeedsReview {
            transaction_id: txn.id,
            user_id: txn.user_id,
            reason: cmd.reason,
        });
        Ok(true)
    }
}
