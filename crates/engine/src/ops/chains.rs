//! Integrity checks over supersession chains.

use chrono::Utc;
use sea_orm::{
    ConnectionTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
    prelude::*, sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    AdminAction, AdminActionKind, AlertKind, AuditAction, EngineError, LedgerEntry,
    LifecycleStatus, ResultEngine, Severity, SystemAlert, entries, entry_audit,
    entry_audit::NewAudit, util::normalize_required_text,
};

use super::{Engine, entries::attach_audit_logs, record_admin_action, with_tx};

/// Shape of one chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub original_entry_id: Uuid,
    pub owner_id: String,
    /// Ids of the active versions. More than one is an invariant violation.
    pub active: Vec<Uuid>,
    /// Stored versions, ascending.
    pub versions: Vec<i32>,
    /// The chain ends in a reversal.
    pub terminal: bool,
}

impl ChainReport {
    fn from_models(original_entry_id: Uuid, models: &[entries::Model]) -> Self {
        let active = models
            .iter()
            .filter(|m| m.lifecycle_status == LifecycleStatus::Active.as_str() && !m.is_deleted)
            .filter_map(|m| Uuid::parse_str(&m.id).ok())
            .collect();
        Self {
            original_entry_id,
            owner_id: models.first().map(|m| m.owner_id.clone()).unwrap_or_default(),
            active,
            versions: models.iter().map(|m| m.version).collect(),
            terminal: models
                .iter()
                .any(|m| m.lifecycle_status == LifecycleStatus::Reversal.as_str()),
        }
    }

    /// Versions run `1..=n` without gaps.
    pub fn is_contiguous(&self) -> bool {
        self.versions
            .iter()
            .enumerate()
            .all(|(i, v)| i64::from(*v) == i as i64 + 1)
    }

    /// No active version and no reversal: every version is superseded.
    pub fn is_orphaned(&self) -> bool {
        self.active.is_empty() && !self.terminal && !self.versions.is_empty()
    }

    pub fn is_healthy(&self) -> bool {
        self.active.len() <= 1 && !self.is_orphaned() && self.is_contiguous()
    }
}

async fn load_chain<C: ConnectionTrait>(
    db: &C,
    original_entry_id: Uuid,
) -> ResultEngine<Vec<entries::Model>> {
    let models = entries::Entity::find()
        .filter(entries::Column::OriginalEntryId.eq(original_entry_id.to_string()))
        .order_by_asc(entries::Column::Version)
        .order_by_asc(entries::Column::CreatedAt)
        .all(db)
        .await?;
    if models.is_empty() {
        return Err(EngineError::KeyNotFound("chain not exists".to_string()));
    }
    Ok(models)
}

/// Fails with [`EngineError::InvariantViolation`] when the chain has more
/// than one active version.
pub(super) async fn ensure_single_active<C: ConnectionTrait>(
    db: &C,
    original_entry_id: Uuid,
) -> ResultEngine<()> {
    let active = entries::Entity::find()
        .filter(entries::Column::OriginalEntryId.eq(original_entry_id.to_string()))
        .filter(entries::Column::LifecycleStatus.eq(LifecycleStatus::Active.as_str()))
        .filter(entries::Column::IsDeleted.eq(false))
        .count(db)
        .await?;
    if active > 1 {
        return Err(EngineError::InvariantViolation(format!(
            "chain {original_entry_id} has {active} active versions"
        )));
    }
    Ok(())
}

impl Engine {
    /// Inspects one chain. Two or more active versions raise a critical
    /// alert and fail with [`EngineError::InvariantViolation`].
    pub async fn check_chain(&self, original_entry_id: Uuid) -> ResultEngine<ChainReport> {
        let models = load_chain(&self.database, original_entry_id).await?;
        let report = ChainReport::from_models(original_entry_id, &models);
        if report.active.len() > 1 {
            let result = Err(EngineError::InvariantViolation(format!(
                "chain {original_entry_id} has {} active versions",
                report.active.len()
            )));
            return self
                .alert_on_violation(&original_entry_id.to_string(), result)
                .await;
        }
        Ok(report)
    }

    /// Inspects every chain of `owner_id`. Chains with several active
    /// versions are reported and alerted on, not returned as errors.
    pub async fn check_chains(&self, owner_id: &str) -> ResultEngine<Vec<ChainReport>> {
        let chain_ids: Vec<String> = entries::Entity::find()
            .select_only()
            .column(entries::Column::OriginalEntryId)
            .distinct()
            .filter(entries::Column::OwnerId.eq(owner_id))
            .order_by_asc(entries::Column::OriginalEntryId)
            .into_tuple()
            .all(&self.database)
            .await?;

        let mut reports = Vec::with_capacity(chain_ids.len());
        for chain_id in chain_ids {
            let Ok(original_entry_id) = Uuid::parse_str(&chain_id) else {
                tracing::warn!("skipping chain with malformed id {chain_id}");
                continue;
            };
            let models = load_chain(&self.database, original_entry_id).await?;
            let report = ChainReport::from_models(original_entry_id, &models);
            if report.active.len() > 1 {
                self.raise_alert(SystemAlert::new(
                    AlertKind::InvariantViolation,
                    Severity::Critical,
                    chain_id.clone(),
                    format!(
                        "chain {chain_id} has {} active versions",
                        report.active.len()
                    ),
                    json!({ "active": report.active, "versions": report.versions }),
                ))
                .await;
            }
            reports.push(report);
        }
        Ok(reports)
    }

    /// Reactivates the latest version of an orphaned chain.
    ///
    /// Older data could end up with every version superseded and none active.
    /// This is the one admin path allowed to flip a version back to active.
    pub async fn repair_chain(
        &self,
        original_entry_id: Uuid,
        actor: &str,
        reason: &str,
    ) -> ResultEngine<LedgerEntry> {
        let actor = normalize_required_text(actor, "actor")?;
        let reason = normalize_required_text(reason, "reason")?;

        let entry = with_tx!(self, |db_tx| {
            let models = load_chain(&db_tx, original_entry_id).await?;
            let report = ChainReport::from_models(original_entry_id, &models);
            if !report.is_orphaned() {
                return Err(EngineError::InvalidState(format!(
                    "chain {original_entry_id} is not orphaned"
                )));
            }
            let Some(latest) = models.last() else {
                return Err(EngineError::KeyNotFound("chain not exists".to_string()));
            };

            let reactivated = entries::Entity::update_many()
                .col_expr(
                    entries::Column::LifecycleStatus,
                    Expr::value(LifecycleStatus::Active.as_str()),
                )
                .col_expr(entries::Column::SupersededBy, Expr::value(Option::<String>::None))
                .filter(entries::Column::Id.eq(latest.id.clone()))
                .filter(entries::Column::LifecycleStatus.eq(LifecycleStatus::Superseded.as_str()))
                .exec(&db_tx)
                .await?;
            if reactivated.rows_affected != 1 {
                return Err(EngineError::Conflict(format!(
                    "chain {original_entry_id} was changed concurrently"
                )));
            }

            let now = Utc::now();
            let latest_id = Uuid::parse_str(&latest.id)
                .map_err(|_| EngineError::InvalidId("invalid entry id".to_string()))?;
            entry_audit::ActiveModel::from(NewAudit {
                entry_id: latest_id,
                original_entry_id,
                action: AuditAction::Reactivated,
                actor: &actor,
                version: latest.version,
                changes: &["lifecycle_status"],
                reason: Some(&reason),
                at: now,
            })
            .insert(&db_tx)
            .await?;

            record_admin_action(
                &db_tx,
                &AdminAction::new(
                    &actor,
                    AdminActionKind::RepairChain,
                    original_entry_id.to_string(),
                    Some(&reason),
                    json!({
                        "reactivated_entry_id": latest.id,
                        "version": latest.version,
                        "previous_superseded_by": latest.superseded_by,
                    }),
                    now,
                ),
            )
            .await?;

            let mut items = [LedgerEntry::try_from(
                entries::Entity::find_by_id(latest.id.clone())
                    .one(&db_tx)
                    .await?
                    .ok_or_else(|| EngineError::KeyNotFound("entry not exists".to_string()))?,
            )?];
            attach_audit_logs(&db_tx, &mut items).await?;
            let [entry] = items;
            Ok(entry)
        })?;

        tracing::warn!(
            %original_entry_id,
            entry_id = %entry.id,
            version = entry.version,
            "orphaned chain repaired"
        );
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(active: usize, versions: Vec<i32>, terminal: bool) -> ChainReport {
        ChainReport {
            original_entry_id: Uuid::nil(),
            owner_id: "ada".to_string(),
            active: (0..active).map(|_| Uuid::new_v4()).collect(),
            versions,
            terminal,
        }
    }

    #[test]
    fn superseded_only_chain_is_orphaned() {
        let chain = report(0, vec![1, 2, 3], false);
        assert!(chain.is_orphaned());
        assert!(!chain.is_healthy());
    }

    #[test]
    fn deleted_chain_is_terminal_not_orphaned() {
        let chain = report(0, vec![1, 2], true);
        assert!(!chain.is_orphaned());
        assert!(chain.is_healthy());
    }

    #[test]
    fn version_gaps_are_detected() {
        assert!(report(1, vec![1, 2, 3], false).is_contiguous());
        assert!(!report(1, vec![1, 3], false).is_contiguous());
        assert!(!report(2, vec![1, 2], false).is_healthy());
    }
}
