use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sea_orm::{
    ConnectionTrait, DatabaseTransaction, QueryFilter, QueryOrder, TransactionTrait, prelude::*,
    sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    AuditAction, AuditRecord, CreateEntryCmd, EngineError, LedgerEntry, LifecycleStatus,
    ResultEngine, UpdateEntryCmd, entries, entry_audit,
    entry_audit::NewAudit,
    util::{
        ensure_positive_amount, normalize_category_key, normalize_optional_text,
        normalize_required_text,
    },
};

use super::{Engine, chains::ensure_single_active, with_tx};

mod list;

pub use list::{EntryListFilter, EntryTotals};

/// Ids produced by [`Engine::delete_entry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedEntry {
    pub voided_id: Uuid,
    pub reversal_id: Uuid,
}

/// Loads one entry owned by `owner_id`. Foreign entries look missing.
async fn require_owned_entry<C: ConnectionTrait>(
    db: &C,
    entry_id: Uuid,
    owner_id: &str,
) -> ResultEngine<entries::Model> {
    entries::Entity::find_by_id(entry_id.to_string())
        .one(db)
        .await?
        .filter(|model| model.owner_id == owner_id)
        .ok_or_else(|| EngineError::KeyNotFound("entry not exists".to_string()))
}

/// Rejects anything but an active, non-deleted, non-reversal version.
fn ensure_mutable(model: &entries::Model) -> ResultEngine<()> {
    let status = LifecycleStatus::try_from(model.lifecycle_status.as_str())?;
    match status {
        LifecycleStatus::Reversal => Err(EngineError::InvalidState(
            "reversal entries cannot be changed".to_string(),
        )),
        LifecycleStatus::Active if !model.is_deleted => Ok(()),
        _ => Err(EngineError::Conflict(format!(
            "entry {} is no longer active ({})",
            model.id, model.lifecycle_status
        ))),
    }
}

/// Attaches each entry's audit trail, oldest record first.
pub(super) async fn attach_audit_logs<C: ConnectionTrait>(
    db: &C,
    items: &mut [LedgerEntry],
) -> ResultEngine<()> {
    if items.is_empty() {
        return Ok(());
    }
    let ids: Vec<String> = items.iter().map(|e| e.id.to_string()).collect();
    let rows = entry_audit::Entity::find()
        .filter(entry_audit::Column::EntryId.is_in(ids))
        .order_by_asc(entry_audit::Column::At)
        .order_by_asc(entry_audit::Column::Version)
        .all(db)
        .await?;

    let mut by_entry: HashMap<String, Vec<AuditRecord>> = HashMap::new();
    for row in rows {
        let entry_id = row.entry_id.clone();
        by_entry
            .entry(entry_id)
            .or_default()
            .push(AuditRecord::try_from(row)?);
    }
    for item in items.iter_mut() {
        item.audit_log = by_entry.remove(&item.id.to_string()).unwrap_or_default();
    }
    Ok(())
}

async fn load_entry<C: ConnectionTrait>(db: &C, entry_id: Uuid) -> ResultEngine<LedgerEntry> {
    let model = entries::Entity::find_by_id(entry_id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| EngineError::KeyNotFound("entry not exists".to_string()))?;
    let mut items = [LedgerEntry::try_from(model)?];
    attach_audit_logs(db, &mut items).await?;
    let [entry] = items;
    Ok(entry)
}

struct EntryPatch {
    amount_minor: Option<i64>,
    category: Option<String>,
    description: Option<String>,
    occurred_at: Option<DateTime<Utc>>,
}

/// Switches the active version to superseded and inserts its successor.
async fn supersede_entry(
    db_tx: &DatabaseTransaction,
    entry_id: Uuid,
    owner_id: &str,
    patch: &EntryPatch,
    actor: &str,
    reason: Option<&str>,
) -> ResultEngine<LedgerEntry> {
    let old = require_owned_entry(db_tx, entry_id, owner_id).await?;
    ensure_mutable(&old)?;
    let current = LedgerEntry::try_from(old.clone())?;

    let mut changes: Vec<&str> = Vec::new();
    let mut next = current.clone();
    if let Some(amount_minor) = patch.amount_minor
        && amount_minor != current.amount_minor
    {
        next.amount_minor = amount_minor;
        changes.push("amount_minor");
    }
    if let Some(category) = &patch.category
        && *category != current.category
    {
        next.category = category.clone();
        changes.push("category");
    }
    if let Some(description) = &patch.description
        && *description != current.description
    {
        next.description = description.clone();
        changes.push("description");
    }
    if let Some(occurred_at) = patch.occurred_at
        && occurred_at != current.occurred_at
    {
        next.occurred_at = occurred_at;
        changes.push("occurred_at");
    }

    let now = Utc::now();
    next.id = Uuid::new_v4();
    next.version = current.version + 1;
    next.lifecycle_status = LifecycleStatus::Active;
    next.is_deleted = false;
    next.superseded_by = None;
    next.reversal_entry_id = None;
    next.created_at = now;
    next.created_by = actor.to_string();
    next.audit_log = Vec::new();

    let switched = entries::Entity::update_many()
        .col_expr(
            entries::Column::LifecycleStatus,
            Expr::value(LifecycleStatus::Superseded.as_str()),
        )
        .col_expr(entries::Column::SupersededBy, Expr::value(next.id.to_string()))
        .filter(entries::Column::Id.eq(old.id.clone()))
        .filter(entries::Column::LifecycleStatus.eq(LifecycleStatus::Active.as_str()))
        .filter(entries::Column::IsDeleted.eq(false))
        .exec(db_tx)
        .await?;
    if switched.rows_affected != 1 {
        return Err(EngineError::Conflict(format!(
            "entry {} was changed concurrently",
            old.id
        )));
    }

    let category_norm = normalize_category_key(&next.category)?;
    entries::new_row(&next, category_norm).insert(db_tx).await?;

    entry_audit::ActiveModel::from(NewAudit {
        entry_id: current.id,
        original_entry_id: current.original_entry_id,
        action: AuditAction::Superseded,
        actor,
        version: current.version,
        changes: &[],
        reason,
        at: now,
    })
    .insert(db_tx)
    .await?;
    entry_audit::ActiveModel::from(NewAudit {
        entry_id: next.id,
        original_entry_id: next.original_entry_id,
        action: AuditAction::VersionCreated,
        actor,
        version: next.version,
        changes: &changes,
        reason,
        at: now,
    })
    .insert(db_tx)
    .await?;

    ensure_single_active(db_tx, next.original_entry_id).await?;
    load_entry(db_tx, next.id).await
}

/// Voids the active version and books its reversal.
async fn void_entry(
    db_tx: &DatabaseTransaction,
    entry_id: Uuid,
    owner_id: &str,
    actor: &str,
) -> ResultEngine<DeletedEntry> {
    let target = require_owned_entry(db_tx, entry_id, owner_id).await?;
    ensure_mutable(&target)?;
    let target = LedgerEntry::try_from(target)?;

    let now = Utc::now();
    let reversal = LedgerEntry {
        id: Uuid::new_v4(),
        owner_id: target.owner_id.clone(),
        kind: target.kind,
        amount_minor: -target.amount_minor,
        category: target.category.clone(),
        description: target.description.clone(),
        occurred_at: target.occurred_at,
        lifecycle_status: LifecycleStatus::Reversal,
        is_deleted: true,
        version: target.version + 1,
        original_entry_id: target.original_entry_id,
        superseded_by: None,
        reversal_entry_id: None,
        created_at: now,
        created_by: actor.to_string(),
        audit_log: Vec::new(),
    };

    let voided = entries::Entity::update_many()
        .col_expr(
            entries::Column::LifecycleStatus,
            Expr::value(LifecycleStatus::Voided.as_str()),
        )
        .col_expr(entries::Column::IsDeleted, Expr::value(true))
        .col_expr(
            entries::Column::ReversalEntryId,
            Expr::value(reversal.id.to_string()),
        )
        .filter(entries::Column::Id.eq(target.id.to_string()))
        .filter(entries::Column::LifecycleStatus.eq(LifecycleStatus::Active.as_str()))
        .filter(entries::Column::IsDeleted.eq(false))
        .exec(db_tx)
        .await?;
    if voided.rows_affected != 1 {
        return Err(EngineError::Conflict(format!(
            "entry {} was changed concurrently",
            target.id
        )));
    }

    let category_norm = normalize_category_key(&reversal.category)?;
    entries::new_row(&reversal, category_norm)
        .insert(db_tx)
        .await?;

    entry_audit::ActiveModel::from(NewAudit {
        entry_id: target.id,
        original_entry_id: target.original_entry_id,
        action: AuditAction::Voided,
        actor,
        version: target.version,
        changes: &[],
        reason: None,
        at: now,
    })
    .insert(db_tx)
    .await?;
    entry_audit::ActiveModel::from(NewAudit {
        entry_id: reversal.id,
        original_entry_id: reversal.original_entry_id,
        action: AuditAction::ReversalCreated,
        actor,
        version: reversal.version,
        changes: &[],
        reason: None,
        at: now,
    })
    .insert(db_tx)
    .await?;

    Ok(DeletedEntry {
        voided_id: target.id,
        reversal_id: reversal.id,
    })
}

impl Engine {
    /// Records version 1 of a new income or expense.
    pub async fn create_entry(&self, cmd: CreateEntryCmd) -> ResultEngine<LedgerEntry> {
        ensure_positive_amount(cmd.amount_minor)?;
        let owner_id = normalize_required_text(&cmd.owner_id, "owner")?;
        let category = normalize_required_text(&cmd.category, "category")?;
        let category_norm = normalize_category_key(&category)?;
        let description = normalize_required_text(&cmd.description, "description")?;
        let actor =
            normalize_optional_text(cmd.actor.as_deref()).unwrap_or_else(|| owner_id.clone());

        let now = Utc::now();
        let id = Uuid::new_v4();
        let entry = LedgerEntry {
            id,
            owner_id,
            kind: cmd.kind,
            amount_minor: cmd.amount_minor,
            category,
            description,
            occurred_at: cmd.occurred_at,
            lifecycle_status: LifecycleStatus::Active,
            is_deleted: false,
            version: 1,
            original_entry_id: id,
            superseded_by: None,
            reversal_entry_id: None,
            created_at: now,
            created_by: actor.clone(),
            audit_log: Vec::new(),
        };

        let entry = with_tx!(self, |db_tx| {
            entries::new_row(&entry, category_norm).insert(&db_tx).await?;
            entry_audit::ActiveModel::from(NewAudit {
                entry_id: id,
                original_entry_id: id,
                action: AuditAction::Created,
                actor: &actor,
                version: 1,
                changes: &[],
                reason: None,
                at: now,
            })
            .insert(&db_tx)
            .await?;
            load_entry(&db_tx, id).await
        })?;

        tracing::info!(
            entry_id = %entry.id,
            owner_id = %entry.owner_id,
            kind = entry.kind.as_str(),
            amount_minor = entry.amount_minor,
            "ledger entry created"
        );
        Ok(entry)
    }

    /// Supersedes an active entry with a patched copy and returns the new
    /// version.
    ///
    /// Exactly one of two concurrent updates of the same version wins; the
    /// other gets [`EngineError::Conflict`] and must retry against the new
    /// version.
    pub async fn update_entry(&self, cmd: UpdateEntryCmd) -> ResultEngine<LedgerEntry> {
        if cmd.is_empty() {
            return Err(EngineError::InvalidName(
                "update must change at least one field".to_string(),
            ));
        }
        if let Some(amount_minor) = cmd.amount_minor {
            ensure_positive_amount(amount_minor)?;
        }
        let category = cmd
            .category
            .as_deref()
            .map(|c| normalize_required_text(c, "category"))
            .transpose()?;
        let description = cmd
            .description
            .as_deref()
            .map(|d| normalize_required_text(d, "description"))
            .transpose()?;
        let actor = normalize_optional_text(cmd.actor.as_deref())
            .unwrap_or_else(|| cmd.owner_id.clone());
        let reason = normalize_optional_text(cmd.reason.as_deref());

        let patch = EntryPatch {
            amount_minor: cmd.amount_minor,
            category,
            description,
            occurred_at: cmd.occurred_at,
        };
        let result = with_tx!(self, |db_tx| {
            supersede_entry(
                &db_tx,
                cmd.entry_id,
                &cmd.owner_id,
                &patch,
                &actor,
                reason.as_deref(),
            )
            .await
        });

        let entry = self.alert_on_violation(&cmd.entry_id.to_string(), result).await?;
        tracing::info!(
            entry_id = %entry.id,
            original_entry_id = %entry.original_entry_id,
            version = entry.version,
            "ledger entry superseded"
        );
        Ok(entry)
    }

    /// Voids an active entry and books its exact negation as a reversal.
    pub async fn delete_entry(
        &self,
        entry_id: Uuid,
        owner_id: &str,
        actor: &str,
    ) -> ResultEngine<DeletedEntry> {
        let actor = normalize_optional_text(Some(actor)).unwrap_or_else(|| owner_id.to_string());

        let result = with_tx!(self, |db_tx| {
            void_entry(&db_tx, entry_id, owner_id, &actor).await
        });

        let deleted = self.alert_on_violation(&entry_id.to_string(), result).await?;
        tracing::info!(
            voided_id = %deleted.voided_id,
            reversal_id = %deleted.reversal_id,
            "ledger entry voided"
        );
        Ok(deleted)
    }

    /// Every version of the chain `entry_id` belongs to, plus its reversal,
    /// oldest first. Any id of the chain works.
    pub async fn entry_history(
        &self,
        entry_id: Uuid,
        owner_id: &str,
    ) -> ResultEngine<Vec<LedgerEntry>> {
        with_tx!(self, |db_tx| {
            let model = require_owned_entry(&db_tx, entry_id, owner_id).await?;
            let rows = entries::Entity::find()
                .filter(entries::Column::OriginalEntryId.eq(model.original_entry_id.clone()))
                .filter(entries::Column::OwnerId.eq(owner_id))
                .order_by_asc(entries::Column::Version)
                .order_by_asc(entries::Column::CreatedAt)
                .all(&db_tx)
                .await?;
            let mut out = rows
                .into_iter()
                .map(LedgerEntry::try_from)
                .collect::<ResultEngine<Vec<_>>>()?;
            attach_audit_logs(&db_tx, &mut out).await?;
            Ok(out)
        })
    }
}
