use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use sea_orm::{
    ActiveValue, ConnectionTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
    prelude::*,
    sea_query::{Expr, SimpleExpr},
};

use crate::{
    AdminAction, AdminActionKind, AlertKind, ApplyDeltaCmd, EngineError, KycStatus, Notification,
    ResultEngine, Severity, SystemAlert, WalletAccount, WalletHistoryEntry, profiles,
    util::{normalize_optional_text, normalize_required_text},
    wallet_history, wallets,
};

use super::{Engine, record_admin_action, with_tx};

/// Result of a delta applied inside a caller's transaction.
#[derive(Clone, Copy, Debug)]
pub(super) struct DeltaOutcome {
    pub balance_minor: i64,
    /// `false` when the idempotency key had already been used.
    pub applied: bool,
}

pub(super) async fn require_wallet<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
) -> ResultEngine<wallets::Model> {
    wallets::Entity::find_by_id(user_id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| EngineError::KeyNotFound("wallet not exists".to_string()))
}

/// Writes `balance_minor` to the profile mirror.
async fn sync_mirror<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
    balance_minor: i64,
    now: DateTime<Utc>,
) -> ResultEngine<()> {
    let updated = profiles::Entity::update_many()
        .col_expr(profiles::Column::WalletBalanceMinor, Expr::value(balance_minor))
        .col_expr(profiles::Column::WalletSyncedAt, Expr::value(now))
        .filter(profiles::Column::UserId.eq(user_id))
        .exec(db)
        .await?;
    if updated.rows_affected == 0 {
        profiles::ActiveModel {
            user_id: ActiveValue::Set(user_id.to_string()),
            display_name: ActiveValue::Set(None),
            wallet_balance_minor: ActiveValue::Set(balance_minor),
            wallet_synced_at: ActiveValue::Set(now),
        }
        .insert(db)
        .await?;
    }
    Ok(())
}

/// `balance - reserved >= amount_minor` on the wallet row.
fn available_at_least(amount_minor: i64) -> SimpleExpr {
    Expr::expr(
        Expr::col(wallets::Column::BalanceMinor).sub(Expr::col(wallets::Column::ReservedMinor)),
    )
    .gte(amount_minor)
}

/// Holds `amount_minor` of the spendable balance for an in-flight purchase.
/// The check and the hold are one conditional update, so two purchases can
/// never hold the same money.
pub(super) async fn hold_in<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
    amount_minor: i64,
    now: DateTime<Utc>,
) -> ResultEngine<()> {
    let held = wallets::Entity::update_many()
        .col_expr(
            wallets::Column::ReservedMinor,
            Expr::col(wallets::Column::ReservedMinor).add(amount_minor),
        )
        .col_expr(wallets::Column::UpdatedAt, Expr::value(now))
        .filter(wallets::Column::UserId.eq(user_id))
        .filter(available_at_least(amount_minor))
        .exec(db)
        .await?;
    if held.rows_affected == 0 {
        let wallet = require_wallet(db, user_id).await?;
        return Err(EngineError::InsufficientFunds(format!(
            "available balance {} cannot cover {amount_minor}",
            wallet.balance_minor - wallet.reserved_minor
        )));
    }
    Ok(())
}

/// Gives a hold taken by [`hold_in`] back to the spendable balance.
pub(super) async fn unhold_in<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
    amount_minor: i64,
    now: DateTime<Utc>,
) -> ResultEngine<()> {
    let released = wallets::Entity::update_many()
        .col_expr(
            wallets::Column::ReservedMinor,
            Expr::col(wallets::Column::ReservedMinor).sub(amount_minor),
        )
        .col_expr(wallets::Column::UpdatedAt, Expr::value(now))
        .filter(wallets::Column::UserId.eq(user_id))
        .filter(wallets::Column::ReservedMinor.gte(amount_minor))
        .exec(db)
        .await?;
    if released.rows_affected != 1 {
        return Err(EngineError::InvariantViolation(format!(
            "wallet {user_id} holds less than the {amount_minor} being released"
        )));
    }
    Ok(())
}

async fn history_exists<C: ConnectionTrait>(db: &C, idempotency_key: &str) -> ResultEngine<bool> {
    Ok(wallet_history::Entity::find()
        .filter(wallet_history::Column::IdempotencyKey.eq(idempotency_key))
        .one(db)
        .await?
        .is_some())
}

/// The only write path of `wallet_accounts.balance_minor` outside of
/// reconciliation. Conditional update, history line and mirror refresh share
/// the caller's transaction.
pub(super) async fn apply_delta_in<C: ConnectionTrait>(
    db: &C,
    cmd: &ApplyDeltaCmd,
    now: DateTime<Utc>,
) -> ResultEngine<DeltaOutcome> {
    if cmd.delta_minor == 0 {
        return Err(EngineError::InvalidAmount(
            "delta_minor must not be 0".to_string(),
        ));
    }
    let reason = normalize_required_text(&cmd.reason, "reason")?;
    let idempotency_key = normalize_optional_text(cmd.idempotency_key.as_deref());

    if let Some(key) = idempotency_key.as_deref()
        && history_exists(db, key).await?
    {
        let wallet = require_wallet(db, &cmd.user_id).await?;
        return Ok(DeltaOutcome {
            balance_minor: wallet.balance_minor,
            applied: false,
        });
    }

    let mut update = wallets::Entity::update_many()
        .col_expr(
            wallets::Column::BalanceMinor,
            Expr::col(wallets::Column::BalanceMinor).add(cmd.delta_minor),
        )
        .col_expr(wallets::Column::UpdatedAt, Expr::value(now))
        .filter(wallets::Column::UserId.eq(cmd.user_id.as_str()));
    // Held funds belong to in-flight purchases and can't cover other debits.
    if cmd.delta_minor < 0 && !cmd.allow_negative {
        let debit = cmd
            .delta_minor
            .checked_neg()
            .ok_or_else(|| EngineError::InvalidAmount("delta_minor out of range".to_string()))?;
        update = update.filter(available_at_least(debit));
    }
    let updated = update.exec(db).await?;
    if updated.rows_affected == 0 {
        let wallet = require_wallet(db, &cmd.user_id).await?;
        return Err(EngineError::InsufficientFunds(format!(
            "available balance {} cannot cover {}",
            wallet.balance_minor - wallet.reserved_minor,
            cmd.delta_minor
        )));
    }

    let balance_minor = require_wallet(db, &cmd.user_id).await?.balance_minor;

    wallet_history::ActiveModel {
        id: ActiveValue::Set(Uuid::new_v4().to_string()),
        user_id: ActiveValue::Set(cmd.user_id.clone()),
        delta_minor: ActiveValue::Set(cmd.delta_minor),
        balance_after_minor: ActiveValue::Set(balance_minor),
        reason: ActiveValue::Set(reason),
        related_transaction_id: ActiveValue::Set(
            cmd.related_transaction_id.map(|id| id.to_string()),
        ),
        idempotency_key: ActiveValue::Set(idempotency_key),
        created_at: ActiveValue::Set(now),
    }
    .insert(db)
    .await?;

    sync_mirror(db, &cmd.user_id, balance_minor, now).await?;

    Ok(DeltaOutcome {
        balance_minor,
        applied: true,
    })
}

impl Engine {
    /// Opens a zero-balance wallet and its profile mirror.
    pub async fn open_wallet(
        &self,
        user_id: &str,
        display_name: Option<&str>,
    ) -> ResultEngine<WalletAccount> {
        let user_id = normalize_required_text(user_id, "user")?;
        let display_name = normalize_optional_text(display_name);
        let now = Utc::now();
        let wallet = WalletAccount {
            user_id: user_id.clone(),
            balance_minor: 0,
            reserved_minor: 0,
            tier: 1,
            kyc_status: KycStatus::default(),
            created_at: now,
            updated_at: now,
        };

        with_tx!(self, |db_tx| {
            if wallets::Entity::find_by_id(user_id.clone())
                .one(&db_tx)
                .await?
                .is_some()
            {
                return Err(EngineError::ExistingKey(user_id));
            }
            let model: wallets::ActiveModel = (&wallet).into();
            model.insert(&db_tx).await?;

            match profiles::Entity::find_by_id(user_id.clone()).one(&db_tx).await? {
                Some(_) => sync_mirror(&db_tx, &user_id, 0, now).await?,
                None => {
                    profiles::ActiveModel {
                        user_id: ActiveValue::Set(user_id.clone()),
                        display_name: ActiveValue::Set(display_name),
                        wallet_balance_minor: ActiveValue::Set(0),
                        wallet_synced_at: ActiveValue::Set(now),
                    }
                    .insert(&db_tx)
                    .await?;
                }
            }
            Ok(())
        })?;

        tracing::info!(user_id = %wallet.user_id, "wallet opened");
        Ok(wallet)
    }

    pub async fn wallet_account(&self, user_id: &str) -> ResultEngine<WalletAccount> {
        WalletAccount::try_from(require_wallet(&self.database, user_id).await?)
    }

    /// The authoritative balance.
    pub async fn wallet_balance(&self, user_id: &str) -> ResultEngine<i64> {
        Ok(require_wallet(&self.database, user_id).await?.balance_minor)
    }

    /// Applies a signed delta and returns the new balance.
    ///
    /// Debits fail with [`EngineError::InsufficientFunds`] when the balance
    /// left after the funds held for pending purchases can't cover them,
    /// unless `allow_negative` is set. A reused
    /// idempotency key leaves everything untouched and returns the current
    /// balance.
    pub async fn apply_delta(&self, cmd: ApplyDeltaCmd) -> ResultEngine<i64> {
        let now = Utc::now();
        let outcome = with_tx!(self, |db_tx| apply_delta_in(&db_tx, &cmd, now).await)?;
        if outcome.applied {
            tracing::info!(
                user_id = %cmd.user_id,
                delta_minor = cmd.delta_minor,
                balance_minor = outcome.balance_minor,
                "wallet balance changed"
            );
            self.notify(Notification::BalanceChanged {
                user_id: cmd.user_id.clone(),
                delta_minor: cmd.delta_minor,
                balance_minor: outcome.balance_minor,
                reason: cmd.reason.clone(),
            });
        }
        Ok(outcome.balance_minor)
    }

    /// Recomputes the balance from history and repairs the stored balance
    /// and the mirror when they disagree.
    ///
    /// A corrected balance raises a critical alert with the before and after
    /// values; a corrected mirror raises a warning.
    pub async fn reconcile_wallet(&self, user_id: &str) -> ResultEngine<i64> {
        let now = Utc::now();
        let (balance_minor, alerts) = with_tx!(self, |db_tx| {
            let wallet = require_wallet(&db_tx, user_id).await?;
            let replayed: Option<Option<i64>> = wallet_history::Entity::find()
                .select_only()
                .column_as(Expr::col(wallet_history::Column::DeltaMinor).sum(), "total")
                .filter(wallet_history::Column::UserId.eq(user_id))
                .into_tuple()
                .one(&db_tx)
                .await?;
            let replayed = replayed.flatten().unwrap_or(0);

            let mut alerts = Vec::new();
            if replayed != wallet.balance_minor {
                wallets::Entity::update_many()
                    .col_expr(wallets::Column::BalanceMinor, Expr::value(replayed))
                    .col_expr(wallets::Column::UpdatedAt, Expr::value(now))
                    .filter(wallets::Column::UserId.eq(user_id))
                    .exec(&db_tx)
                    .await?;
                alerts.push(SystemAlert::new(
                    AlertKind::BalanceDrift,
                    Severity::Critical,
                    user_id,
                    format!(
                        "wallet balance drift for {user_id}: stored {} but history sums to {replayed}",
                        wallet.balance_minor
                    ),
                    json!({
                        "before": wallet.balance_minor,
                        "after": replayed,
                        "difference": replayed - wallet.balance_minor,
                    }),
                ));
            }

            let mirrored = profiles::Entity::find_by_id(user_id.to_string())
                .one(&db_tx)
                .await?
                .map(|profile| profile.wallet_balance_minor);
            if mirrored != Some(replayed) {
                sync_mirror(&db_tx, user_id, replayed, now).await?;
                if replayed == wallet.balance_minor {
                    alerts.push(SystemAlert::new(
                        AlertKind::MirrorDrift,
                        Severity::Medium,
                        user_id,
                        format!("profile balance mirror drifted for {user_id}"),
                        json!({ "mirror": mirrored, "balance": replayed }),
                    ));
                }
            }

            Ok((replayed, alerts))
        })?;

        for alert in alerts {
            self.raise_alert(alert).await;
        }
        Ok(balance_minor)
    }

    /// Latest history lines first.
    pub async fn wallet_history(
        &self,
        user_id: &str,
        limit: u64,
    ) -> ResultEngine<Vec<WalletHistoryEntry>> {
        let rows = wallet_history::Entity::find()
            .filter(wallet_history::Column::UserId.eq(user_id))
            .order_by_desc(wallet_history::Column::CreatedAt)
            .order_by_desc(wallet_history::Column::Id)
            .limit(limit)
            .all(&self.database)
            .await?;
        rows.into_iter().map(WalletHistoryEntry::try_from).collect()
    }

    /// Admin tool: moves the balance to `target_minor` through a regular,
    /// negative-allowed delta so history keeps explaining the balance.
    pub async fn force_balance_correction(
        &self,
        user_id: &str,
        target_minor: i64,
        actor: &str,
        reason: &str,
    ) -> ResultEngine<i64> {
        let actor = normalize_required_text(actor, "actor")?;
        let reason = normalize_required_text(reason, "reason")?;
        let now = Utc::now();

        let (before, cmd, outcome) = with_tx!(self, |db_tx| {
            let wallet = require_wallet(&db_tx, user_id).await?;
            let delta_minor = target_minor
                .checked_sub(wallet.balance_minor)
                .ok_or_else(|| EngineError::InvalidAmount("target out of range".to_string()))?;
            if delta_minor == 0 {
                return Err(EngineError::InvalidAmount(
                    "balance already equals the target".to_string(),
                ));
            }
            let cmd = ApplyDeltaCmd::new(
                user_id,
                delta_minor,
                format!("admin correction: {reason}"),
            )
            .allow_negative();
            let outcome = apply_delta_in(&db_tx, &cmd, now).await?;
            record_admin_action(
                &db_tx,
                &AdminAction::new(
                    &actor,
                    AdminActionKind::ForceBalanceCorrection,
                    user_id,
                    Some(&reason),
                    json!({
                        "before": wallet.balance_minor,
                        "after": outcome.balance_minor,
                        "delta": delta_minor,
                    }),
                    now,
                ),
            )
            .await?;
            Ok((wallet.balance_minor, cmd, outcome))
        })?;

        tracing::warn!(
            user_id,
            before,
            after = outcome.balance_minor,
            actor = %actor,
            "wallet balance force-corrected"
        );
        self.notify(Notification::BalanceChanged {
            user_id: user_id.to_string(),
            delta_minor: cmd.delta_minor,
            balance_minor: outcome.balance_minor,
            reason: cmd.reason,
        });
        Ok(outcome.balance_minor)
    }

    /// Admin tool: updates tier and KYC status.
    pub async fn fix_kyc(
        &self,
        user_id: &str,
        tier: Option<i32>,
        kyc_status: Option<KycStatus>,
        actor: &str,
        reason: &str,
    ) -> ResultEngine<WalletAccount> {
        if tier.is_none() && kyc_status.is_none() {
            return Err(EngineError::InvalidName(
                "nothing to change: pass a tier or a kyc status".to_string(),
            ));
        }
        if tier.is_some_and(|t| t < 1) {
            return Err(EngineError::InvalidAmount("tier must be >= 1".to_string()));
        }
        let actor = normalize_required_text(actor, "actor")?;
        let reason = normalize_required_text(reason, "reason")?;
        let now = Utc::now();

        with_tx!(self, |db_tx| {
            let before = WalletAccount::try_from(require_wallet(&db_tx, user_id).await?)?;
            let mut after = before.clone();
            if let Some(tier) = tier {
                after.tier = tier;
            }
            if let Some(kyc_status) = kyc_status {
                after.kyc_status = kyc_status;
            }
            after.updated_at = now;

            wallets::Entity::update_many()
                .col_expr(wallets::Column::Tier, Expr::value(after.tier))
                .col_expr(
                    wallets::Column::KycStatus,
                    Expr::value(after.kyc_status.as_str()),
                )
                .col_expr(wallets::Column::UpdatedAt, Expr::value(now))
                .filter(wallets::Column::UserId.eq(user_id))
                .exec(&db_tx)
                .await?;

            record_admin_action(
                &db_tx,
                &AdminAction::new(
                    &actor,
                    AdminActionKind::FixKyc,
                    user_id,
                    Some(&reason),
                    json!({
                        "tier": { "before": before.tier, "after": after.tier },
                        "kyc_status": {
                            "before": before.kyc_status.as_str(),
                            "after": after.kyc_status.as_str(),
                        },
                    }),
                    now,
                ),
            )
            .await?;
            Ok(after)
        })
    }
}
