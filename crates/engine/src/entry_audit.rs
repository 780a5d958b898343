//! Append-only audit rows for ledger entry versions.
//!
//! Each row records one transition of one version. Rows are inserted and never
//! updated, so an entry's persisted fields stay untouched while its audit log
//! grows.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use uuid::Uuid;

use crate::{
    EngineError,
    entries::{AuditAction, AuditRecord},
};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "ledger_entry_audit")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub entry_id: String,
    pub original_entry_id: String,
    pub action: String,
    pub actor: String,
    pub version: i32,
    /// JSON array of changed field names.
    pub changes: String,
    pub reason: Option<String>,
    pub at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::entries::Entity",
        from = "Column::EntryId",
        to = "super::entries::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Entry,
}

impl Related<super::entries::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Entry.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

pub(crate) struct NewAudit<'a> {
    pub entry_id: Uuid,
    pub original_entry_id: Uuid,
    pub action: AuditAction,
    pub actor: &'a str,
    pub version: i32,
    pub changes: &'a [&'a str],
    pub reason: Option<&'a str>,
    pub at: DateTime<Utc>,
}

impl From<NewAudit<'_>> for ActiveModel {
    fn from(value: NewAudit<'_>) -> Self {
        let changes = serde_json::to_string(value.changes).unwrap_or_else(|_| "[]".to_string());
        Self {
            id: ActiveValue::Set(Uuid::new_v4().to_string()),
            entry_id: ActiveValue::Set(value.entry_id.to_string()),
            original_entry_id: ActiveValue::Set(value.original_entry_id.to_string()),
            action: ActiveValue::Set(value.action.as_str().to_string()),
            actor: ActiveValue::Set(value.actor.to_string()),
            version: ActiveValue::Set(value.version),
            changes: ActiveValue::Set(changes),
            reason: ActiveValue::Set(value.reason.map(ToString::to_string)),
            at: ActiveValue::Set(value.at),
        }
    }
}

impl TryFrom<Model> for AuditRecord {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            action: AuditAction::try_from(model.action.as_str())?,
            actor: model.actor,
            at: model.at,
            version: model.version,
            changes: serde_json::from_str(&model.changes)?,
            reason: model.reason,
        })
    }
}
