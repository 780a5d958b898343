use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::{
    ConnectionTrait, DatabaseTransaction, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
    UpdateMany, prelude::*, sea_query::Expr,
};
use uuid::Uuid;

use crate::{
    ApplyDeltaCmd, CreateVasCmd, DeliveredDetails, EngineError, Evidence, FailureReason,
    MarkRequest, Notification, PaymentProvider, ProviderOutcome, PurchaseRequest,
    ReconciliationReason, ResultEngine, VasEvent, VasStatus, VasTransaction,
    util::{ensure_positive_amount, normalize_optional_text, normalize_required_text, parse_uuid},
    vas, vas_settlement_key,
};

use super::{
    Engine,
    reconciliation::flag_in,
    wallets::{DeltaOutcome, apply_delta_in, hold_in, require_wallet, unhold_in},
    with_tx,
};

/// Window in which an identical purchase is treated as a double submit.
const DUPLICATE_WINDOW_MINUTES: i64 = 5;

pub(super) async fn require_vas<C: ConnectionTrait>(
    db: &C,
    transaction_id: Uuid,
) -> ResultEngine<vas::Model> {
    vas::Entity::find_by_id(transaction_id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| EngineError::KeyNotFound("vas transaction not exists".to_string()))
}

/// Looks up the target state of `event`, or explains why it's not allowed.
pub(super) fn next_status(
    model: &vas::Model,
    event: VasEvent,
) -> ResultEngine<(VasStatus, VasStatus)> {
    let from = VasStatus::try_from(model.status.as_str())?;
    let to = from.apply(event).ok_or_else(|| {
        EngineError::InvalidState(format!(
            "transaction {} cannot go from {} on {event:?}",
            model.id, model.status
        ))
    })?;
    Ok((from, to))
}

/// An update that only lands if the stored status is still `from`.
pub(super) fn guarded_update(
    model: &vas::Model,
    from: VasStatus,
    to: VasStatus,
    now: DateTime<Utc>,
) -> UpdateMany<vas::Entity> {
    vas::Entity::update_many()
        .col_expr(vas::Column::Status, Expr::value(to.as_str()))
        .col_expr(vas::Column::UpdatedAt, Expr::value(now))
        .filter(vas::Column::Id.eq(model.id.clone()))
        .filter(vas::Column::Status.eq(from.as_str()))
}

pub(super) async fn exec_guarded<C: ConnectionTrait>(
    db: &C,
    update: UpdateMany<vas::Entity>,
    transaction_id: &str,
) -> ResultEngine<()> {
    let result = update.exec(db).await?;
    if result.rows_affected != 1 {
        return Err(EngineError::Conflict(format!(
            "transaction {transaction_id} was changed concurrently"
        )));
    }
    Ok(())
}

/// Books the single wallet movement of a settled transaction. Reusing the
/// settlement key makes a second call a no-op.
pub(super) async fn settle_in<C: ConnectionTrait>(
    db: &C,
    txn: &VasTransaction,
    reason: String,
    allow_negative: bool,
    now: DateTime<Utc>,
) -> ResultEngine<(ApplyDeltaCmd, DeltaOutcome)> {
    let mut cmd = ApplyDeltaCmd::new(
        txn.user_id.clone(),
        txn.kind.wallet_delta(txn.amount_minor),
        reason,
    )
    .related_transaction(txn.id)
    .idempotency_key(vas_settlement_key(txn.kind, txn.id));
    if allow_negative {
        cmd = cmd.allow_negative();
    }
    let outcome = apply_delta_in(db, &cmd, now).await?;
    Ok((cmd, outcome))
}

/// Gives the funds `model` holds back to the wallet. Clearing the hold on
/// the transaction is a compare-and-set, so it is released at most once.
/// Returns the released amount.
pub(super) async fn release_in<C: ConnectionTrait>(
    db: &C,
    model: &vas::Model,
    now: DateTime<Utc>,
) -> ResultEngine<i64> {
    if model.reserved_minor == 0 {
        return Ok(0);
    }
    let cleared = vas::Entity::update_many()
        .col_expr(vas::Column::ReservedMinor, Expr::value(0i64))
        .filter(vas::Column::Id.eq(model.id.clone()))
        .filter(vas::Column::ReservedMinor.eq(model.reserved_minor))
        .exec(db)
        .await?;
    if cleared.rows_affected != 1 {
        return Ok(0);
    }
    unhold_in(db, &model.user_id, model.reserved_minor, now).await?;
    Ok(model.reserved_minor)
}

fn plan_mismatch(txn: &VasTransaction, delivered: &DeliveredDetails) -> Option<Evidence> {
    let plan_differs = match (&txn.plan, &delivered.plan) {
        (Some(requested), Some(got)) => !requested.eq_ignore_ascii_case(got),
        _ => false,
    };
    if !plan_differs && delivered.amount_minor == txn.amount_minor {
        return None;
    }
    Some(Evidence::PlanMismatch {
        requested_plan: txn.plan.clone(),
        requested_amount_minor: txn.amount_minor,
        delivered_plan: delivered.plan.clone(),
        delivered_amount_minor: delivered.amount_minor,
        price_difference_minor: delivered.amount_minor - txn.amount_minor,
    })
}

enum Completion {
    Settled(VasTransaction, ApplyDeltaCmd, DeltaOutcome),
    Diverted(VasTransaction, ReconciliationReason),
}

async fn complete_in(
    db_tx: &DatabaseTransaction,
    transaction_id: Uuid,
    delivered: &DeliveredDetails,
    now: DateTime<Utc>,
) -> ResultEngine<Completion> {
    let model = require_vas(db_tx, transaction_id).await?;
    let (from, to) = next_status(&model, VasEvent::Succeed)?;
    let txn = VasTransaction::try_from(model.clone())?;

    let mut divert = plan_mismatch(&txn, delivered).map(|evidence| {
        MarkRequest::new(ReconciliationReason::PlanMismatch).evidence(evidence)
    });
    if divert.is_none() && txn.kind.debits_wallet() {
        // The hold covers the debit unless an admin correction took the
        // balance below it; the delivery is then kept for review.
        let wallet = require_wallet(db_tx, &txn.user_id).await?;
        let available_minor = wallet.balance_minor - wallet.reserved_minor + txn.reserved_minor;
        if available_minor < txn.amount_minor {
            divert = Some(
                MarkRequest::new(ReconciliationReason::GhostSuccess).evidence(
                    Evidence::UnpaidDelivery {
                        delivered_plan: delivered.plan.clone(),
                        delivered_amount_minor: delivered.amount_minor,
                        available_minor,
                    },
                ),
            );
        }
    }
    if let Some(request) = divert {
        let txn = match flag_in(db_tx, &model, &request, now).await? {
            Some(txn) => txn,
            None => VasTransaction::try_from(require_vas(db_tx, transaction_id).await?)?,
        };
        return Ok(Completion::Diverted(txn, request.reason));
    }

    exec_guarded(db_tx, guarded_update(&model, from, to, now), &model.id).await?;
    release_in(db_tx, &model, now).await?;
    let (cmd, outcome) = settle_in(
        db_tx,
        &txn,
        format!("vas {} purchase for {}", txn.kind.as_str(), txn.target),
        false,
        now,
    )
    .await?;
    let txn = VasTransaction::try_from(require_vas(db_tx, transaction_id).await?)?;
    Ok(Completion::Settled(txn, cmd, outcome))
}

async fn fail_in(
    db_tx: &DatabaseTransaction,
    transaction_id: Uuid,
    failure: &FailureReason,
    now: DateTime<Utc>,
) -> ResultEngine<VasTransaction> {
    let model = require_vas(db_tx, transaction_id).await?;
    let (from, to) = next_status(&model, VasEvent::Fail)?;
    let update = guarded_update(&model, from, to, now)
        .col_expr(vas::Column::FailureCode, Expr::value(failure.code.as_str()))
        .col_expr(
            vas::Column::FailureReason,
            Expr::value(failure.message.as_str()),
        );
    exec_guarded(db_tx, update, &model.id).await?;
    release_in(db_tx, &model, now).await?;
    VasTransaction::try_from(require_vas(db_tx, transaction_id).await?)
}

async fn expire_in(
    db_tx: &DatabaseTransaction,
    transaction_id: Uuid,
    now: DateTime<Utc>,
) -> ResultEngine<VasTransaction> {
    let model = require_vas(db_tx, transaction_id).await?;
    if let Some(expires_at) = model.expires_at
        && expires_at > now
    {
        return Err(EngineError::InvalidState(format!(
            "payment window of {transaction_id} is open until {expires_at}"
        )));
    }
    let (from, to) = next_status(&model, VasEvent::Expire)?;
    exec_guarded(db_tx, guarded_update(&model, from, to, now), &model.id).await?;
    release_in(db_tx, &model, now).await?;
    VasTransaction::try_from(require_vas(db_tx, transaction_id).await?)
}

async fn expire_lapsed_in(
    db_tx: &DatabaseTransaction,
    now: DateTime<Utc>,
) -> ResultEngine<Vec<Uuid>> {
    let lapsed = vas::Entity::find()
        .filter(vas::Column::Status.eq(VasStatus::Pending.as_str()))
        .filter(vas::Column::ExpiresAt.is_not_null())
        .filter(vas::Column::ExpiresAt.lte(now))
        .all(db_tx)
        .await?;

    let mut expired = Vec::with_capacity(lapsed.len());
    for model in lapsed {
        let (from, to) = next_status(&model, VasEvent::Expire)?;
        let updated = guarded_update(&model, from, to, now).exec(db_tx).await?;
        if updated.rows_affected == 1 {
            release_in(db_tx, &model, now).await?;
            expired.push(parse_uuid(&model.id, "vas transaction")?);
        }
    }
    Ok(expired)
}

impl Engine {
    /// Starts a purchase in `pending` with no provider.
    ///
    /// Purchases need a wallet whose spendable balance covers the amount;
    /// that amount stays held on the wallet until the outcome is known. An
    /// identical purchase that succeeded or is under review in the last five
    /// minutes is rejected as a double submit.
    pub async fn create_vas_transaction(&self, cmd: CreateVasCmd) -> ResultEngine<VasTransaction> {
        ensure_positive_amount(cmd.amount_minor)?;
        let user_id = normalize_required_text(&cmd.user_id, "user")?;
        let target = normalize_required_text(&cmd.target, "target")?;
        let plan = normalize_optional_text(cmd.plan.as_deref());
        let now = Utc::now();

        let txn = VasTransaction {
            id: Uuid::new_v4(),
            user_id,
            kind: cmd.kind,
            amount_minor: cmd.amount_minor,
            plan,
            target,
            provider: None,
            status: VasStatus::Pending,
            failure: None,
            reserved_minor: if cmd.kind.debits_wallet() {
                cmd.amount_minor
            } else {
                0
            },
            expires_at: cmd.expires_at,
            created_at: now,
            updated_at: now,
            reconciliation: Default::default(),
        };

        with_tx!(self, |db_tx| {
            require_wallet(&db_tx, &txn.user_id).await?;

            let duplicate = vas::Entity::find()
                .filter(vas::Column::UserId.eq(txn.user_id.as_str()))
                .filter(vas::Column::Kind.eq(txn.kind.as_str()))
                .filter(vas::Column::AmountMinor.eq(txn.amount_minor))
                .filter(vas::Column::Target.eq(txn.target.as_str()))
                .filter(vas::Column::Status.is_in([
                    VasStatus::Success.as_str(),
                    VasStatus::NeedsReconciliation.as_str(),
                ]))
                .filter(
                    vas::Column::CreatedAt
                        .gte(now - chrono::Duration::minutes(DUPLICATE_WINDOW_MINUTES)),
                )
                .one(&db_tx)
                .await?;
            if let Some(duplicate) = duplicate {
                return Err(EngineError::Conflict(format!(
                    "identical purchase {} was made less than {DUPLICATE_WINDOW_MINUTES} minutes ago",
                    duplicate.id
                )));
            }

            if txn.reserved_minor > 0 {
                hold_in(&db_tx, &txn.user_id, txn.reserved_minor, now).await?;
            }
            vas::new_row(&txn).insert(&db_tx).await?;
            Ok(())
        })?;

        tracing::info!(
            transaction_id = %txn.id,
            user_id = %txn.user_id,
            kind = txn.kind.as_str(),
            amount_minor = txn.amount_minor,
            reserved_minor = txn.reserved_minor,
            "vas transaction created"
        );
        Ok(txn)
    }

    /// Records which provider the purchase was sent to.
    ///
    /// The provider is set once: recording the same one again is a no-op,
    /// recording a different one is [`EngineError::InvalidState`].
    pub async fn record_provider_attempt(
        &self,
        transaction_id: Uuid,
        provider: &str,
    ) -> ResultEngine<VasTransaction> {
        let provider = normalize_required_text(provider, "provider")?;
        with_tx!(self, |db_tx| {
            let model = require_vas(&db_tx, transaction_id).await?;
            if model.status != VasStatus::Pending.as_str() {
                return Err(EngineError::InvalidState(format!(
                    "provider can only be recorded on pending transactions, not {}",
                    model.status
                )));
            }
            match model.provider.as_deref() {
                Some(current) if current == provider => return VasTransaction::try_from(model),
                Some(current) => {
                    return Err(EngineError::InvalidState(format!(
                        "transaction {transaction_id} was already sent to {current}"
                    )));
                }
                None => {}
            }

            let now = Utc::now();
            let updated = vas::Entity::update_many()
                .col_expr(vas::Column::Provider, Expr::value(provider.as_str()))
                .col_expr(vas::Column::UpdatedAt, Expr::value(now))
                .filter(vas::Column::Id.eq(model.id.clone()))
                .filter(vas::Column::Status.eq(VasStatus::Pending.as_str()))
                .filter(vas::Column::Provider.is_null())
                .exec(&db_tx)
                .await?;
            if updated.rows_affected != 1 {
                return Err(EngineError::Conflict(format!(
                    "transaction {transaction_id} was changed concurrently"
                )));
            }
            VasTransaction::try_from(require_vas(&db_tx, transaction_id).await?)
        })
    }

    /// Completes a purchase the provider delivered.
    ///
    /// When the provider delivered another plan or price than requested, the
    /// transaction is diverted to review as `PLAN_MISMATCH`; when the wallet
    /// can no longer pay, as `GHOST_SUCCESS` with the delivery recorded. In
    /// both cases the wallet is not charged and the hold stays until an
    /// admin resolves it. Otherwise the transaction becomes `success`, the
    /// hold is released and the wallet moves exactly once.
    pub async fn complete_as_success(
        &self,
        transaction_id: Uuid,
        delivered: DeliveredDetails,
    ) -> ResultEngine<VasTransaction> {
        let now = Utc::now();
        let result = with_tx!(self, |db_tx| {
            complete_in(&db_tx, transaction_id, &delivered, now).await
        });
        let completion = self
            .alert_on_violation(&transaction_id.to_string(), result)
            .await?;

        match completion {
            Completion::Diverted(txn, reason) => {
                tracing::warn!(
                    transaction_id = %txn.id,
                    reason = reason.as_str(),
                    "delivered purchase can't be settled, transaction needs review"
                );
                self.notify(Notification::NeedsReview {
                    transaction_id: txn.id,
                    user_id: txn.user_id.clone(),
                    reason,
                });
                Ok(txn)
            }
            Completion::Settled(txn, cmd, outcome) => {
                tracing::info!(
                    transaction_id = %txn.id,
                    balance_minor = outcome.balance_minor,
                    "vas transaction succeeded"
                );
                if outcome.applied {
                    self.notify(Notification::BalanceChanged {
                        user_id: cmd.user_id,
                        delta_minor: cmd.delta_minor,
                        balance_minor: outcome.balance_minor,
                        reason: cmd.reason,
                    });
                }
                Ok(txn)
            }
        }
    }

    /// Marks a purchase failed. Nothing was charged: the hold is released and
    /// the balance is not touched.
    pub async fn complete_as_failure(
        &self,
        transaction_id: Uuid,
        failure: FailureReason,
    ) -> ResultEngine<VasTransaction> {
        let now = Utc::now();
        let result = with_tx!(self, |db_tx| {
            fail_in(&db_tx, transaction_id, &failure, now).await
        });
        let txn = self
            .alert_on_violation(&transaction_id.to_string(), result)
            .await?;

        tracing::info!(
            transaction_id = %txn.id,
            failure_code = failure.code.as_str(),
            "vas transaction failed"
        );
        Ok(txn)
    }

    /// Expires a pending transaction whose payment window has closed and
    /// releases its hold.
    pub async fn expire(&self, transaction_id: Uuid) -> ResultEngine<VasTransaction> {
        let now = Utc::now();
        let result = with_tx!(self, |db_tx| expire_in(&db_tx, transaction_id, now).await);
        self.alert_on_violation(&transaction_id.to_string(), result)
            .await
    }

    /// Expires every pending transaction whose payment window closed before
    /// `now`. Returns the expired ids.
    pub async fn expire_lapsed(&self, now: DateTime<Utc>) -> ResultEngine<Vec<Uuid>> {
        let result = with_tx!(self, |db_tx| expire_lapsed_in(&db_tx, now).await);
        let expired = self.alert_on_violation("expiry sweep", result).await?;

        for id in &expired {
            tracing::info!(transaction_id = %id, "vas payment window expired");
        }
        Ok(expired)
    }

    /// Sends a pending purchase to `provider` and applies the answer.
    ///
    /// A timeout or transport error returns
    /// [`EngineError::ProviderUnavailable`] and leaves the transaction
    /// pending. An ambiguous answer also leaves it pending; the scanner picks
    /// it up if it never settles.
    pub async fn dispatch_purchase(
        &self,
        transaction_id: Uuid,
        provider: &dyn PaymentProvider,
        timeout: Duration,
    ) -> ResultEngine<VasTransaction> {
        let txn = self
            .record_provider_attempt(transaction_id, provider.name())
            .await?;
        let request = PurchaseRequest {
            transaction_id: txn.id,
            kind: txn.kind,
            amount_minor: txn.amount_minor,
            plan: txn.plan.clone(),
            target: txn.target.clone(),
        };

        let outcome = match tokio::time::timeout(timeout, provider.dispatch(&request)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                tracing::warn!(%transaction_id, provider = provider.name(), "dispatch failed: {err}");
                return Err(EngineError::ProviderUnavailable(err.to_string()));
            }
            Err(_) => {
                tracing::warn!(
                    %transaction_id,
                    provider = provider.name(),
                    timeout_ms = timeout.as_millis() as u64,
                    "dispatch timed out"
                );
                return Err(EngineError::ProviderUnavailable(format!(
                    "{} did not answer within {}ms",
                    provider.name(),
                    timeout.as_millis()
                )));
            }
        };

        match outcome {
            ProviderOutcome::Delivered(delivered) => {
                self.complete_as_success(transaction_id, delivered).await
            }
            ProviderOutcome::Rejected(failure) => {
                self.complete_as_failure(transaction_id, failure).await
            }
            ProviderOutcome::Ambiguous(message) => {
                tracing::warn!(
                    %transaction_id,
                    provider = provider.name(),
                    "ambiguous provider answer, leaving pending: {message}"
                );
                self.vas_transaction(transaction_id).await
            }
        }
    }

    pub async fn vas_transaction(&self, transaction_id: Uuid) -> ResultEngine<VasTransaction> {
        VasTransaction::try_from(require_vas(&self.database, transaction_id).await?)
    }

    /// Latest transactions of `user_id` first.
    pub async fn list_vas_transactions(
        &self,
        user_id: &str,
        limit: u64,
    ) -> ResultEngine<Vec<VasTransaction>> {
        let rows = vas::Entity::find()
            .filter(vas::Column::UserId.eq(user_id))
            .order_by_desc(vas::Column::CreatedAt)
            .order_by_desc(vas::Column::Id)
            .limit(limit)
            .all(&self.database)
            .await?;
        rows.into_iter().map(VasTransaction::try_from).collect()
    }
}
