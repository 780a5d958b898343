//! Ledger entries.
//!
//! A [`LedgerEntry`] is one version of an income or expense fact. Entries are
//! never edited in place: an update inserts a new version and marks the old
//! one [`Superseded`](LifecycleStatus::Superseded), a delete inserts a
//! negative [`Reversal`](LifecycleStatus::Reversal) and marks the target
//! [`Voided`](LifecycleStatus::Voided).
//!
//! All versions of one logical entry share `original_entry_id` (the id of
//! version 1) and form a *chain*.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    EngineError,
    util::{parse_optional_uuid, parse_uuid},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Income,
    Expense,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }
}

impl TryFrom<&str> for EntryKind {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            other => Err(EngineError::InvalidName(format!(
                "invalid entry kind: {other}"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Active,
    Superseded,
    Voided,
    Reversal,
}

impl LifecycleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Superseded => "superseded",
            Self::Voided => "voided",
            Self::Reversal => "reversal",
        }
    }

    /// Terminal versions never change again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl TryFrom<&str> for LifecycleStatus {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "active" => Ok(Self::Active),
            "superseded" => Ok(Self::Superseded),
            "voided" => Ok(Self::Voided),
            "reversal" => Ok(Self::Reversal),
            other => Err(EngineError::InvalidName(format!(
                "invalid lifecycle status: {other}"
            ))),
        }
    }
}

/// What happened to an entry version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    VersionCreated,
    Superseded,
    Voided,
    ReversalCreated,
    Reactivated,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::VersionCreated => "version_created",
            Self::Superseded => "superseded",
            Self::Voided => "voided",
            Self::ReversalCreated => "reversal_created",
            Self::Reactivated => "reactivated",
        }
    }
}

impl TryFrom<&str> for AuditAction {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "created" => Ok(Self::Created),
            "version_created" => Ok(Self::VersionCreated),
            "superseded" => Ok(Self::Superseded),
            "voided" => Ok(Self::Voided),
            "reversal_created" => Ok(Self::ReversalCreated),
            "reactivated" => Ok(Self::Reactivated),
            other => Err(EngineError::InvalidName(format!(
                "invalid audit action: {other}"
            ))),
        }
    }
}

/// One state transition of an entry version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub actor: String,
    pub at: DateTime<Utc>,
    pub version: i32,
    /// Names of the fields a new version changed.
    pub changes: Vec<String>,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub owner_id: String,
    pub kind: EntryKind,
    /// Signed minor units; negative only on reversals.
    pub amount_minor: i64,
    pub category: String,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
    pub lifecycle_status: LifecycleStatus,
    pub is_deleted: bool,
    pub version: i32,
    pub original_entry_id: Uuid,
    pub superseded_by: Option<Uuid>,
    pub reversal_entry_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub audit_log: Vec<AuditRecord>,
}

impl LedgerEntry {
    /// Only active, non-deleted versions count towards balances and reports.
    pub fn is_active(&self) -> bool {
        self.lifecycle_status == LifecycleStatus::Active && !self.is_deleted
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "ledger_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub owner_id: String,
    pub kind: String,
    pub amount_minor: i64,
    pub category: String,
    pub category_norm: String,
    pub description: String,
    pub occurred_at: DateTimeUtc,
    pub lifecycle_status: String,
    pub is_deleted: bool,
    pub version: i32,
    pub original_entry_id: String,
    pub superseded_by: Option<String>,
    pub reversal_entry_id: Option<String>,
    pub created_at: DateTimeUtc,
    pub created_by: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::entry_audit::Entity")]
    Audit,
}

impl Related<super::entry_audit::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Audit.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for LedgerEntry {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "entry")?,
            owner_id: model.owner_id,
            kind: EntryKind::try_from(model.kind.as_str())?,
            amount_minor: model.amount_minor,
            category: model.category,
            description: model.description,
            occurred_at: model.occurred_at,
            lifecycle_status: LifecycleStatus::try_from(model.lifecycle_status.as_str())?,
            is_deleted: model.is_deleted,
            version: model.version,
            original_entry_id: parse_uuid(&model.original_entry_id, "original entry")?,
            superseded_by: parse_optional_uuid(model.superseded_by.as_deref()),
            reversal_entry_id: parse_optional_uuid(model.reversal_entry_id.as_deref()),
            created_at: model.created_at,
            created_by: model.created_by,
            audit_log: Vec::new(),
        })
    }
}

/// Builds the insert model for a brand-new version row.
pub(crate) fn new_row(entry: &LedgerEntry, category_norm: String) -> ActiveModel {
    ActiveModel {
        id: ActiveValue::Set(entry.id.to_string()),
        owner_id: ActiveValue::Set(entry.owner_id.clone()),
        kind: ActiveValue::Set(entry.kind.as_str().to_string()),
        amount_minor: ActiveValue::Set(entry.amount_minor),
        category: ActiveValue::Set(entry.category.clone()),
        category_norm: ActiveValue::Set(category_norm),
        description: ActiveValue::Set(entry.description.clone()),
        occurred_at: ActiveValue::Set(entry.occurred_at),
        lifecycle_status: ActiveValue::Set(entry.lifecycle_status.as_str().to_string()),
        is_deleted: ActiveValue::Set(entry.is_deleted),
        version: ActiveValue::Set(entry.version),
        original_entry_id: ActiveValue::Set(entry.original_entry_id.to_string()),
        superseded_by: ActiveValue::Set(entry.superseded_by.map(|id| id.to_string())),
        reversal_entry_id: ActiveValue::Set(entry.reversal_entry_id.map(|id| id.to_string())),
        created_at: ActiveValue::Set(entry.created_at),
        created_by: ActiveValue::Set(entry.created_by.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_round_trips_through_storage_strings() {
        for status in [
            LifecycleStatus::Active,
            LifecycleStatus::Superseded,
            LifecycleStatus::Voided,
            LifecycleStatus::Reversal,
        ] {
            assert_eq!(LifecycleStatus::try_from(status.as_str()).unwrap(), status);
        }
        assert!(LifecycleStatus::try_from("deleted").is_err());
    }

    #[test]
    fn only_active_is_non_terminal() {
        assert!(!LifecycleStatus::Active.is_terminal());
        assert!(LifecycleStatus::Superseded.is_terminal());
        assert!(LifecycleStatus::Voided.is_terminal());
        assert!(LifecycleStatus::Reversal.is_terminal());
    }
}
