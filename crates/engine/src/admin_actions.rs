//! Append-only record of every administrative operation.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, util::parse_uuid};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminActionKind {
    ResolveReconciliation,
    DismissReconciliation,
    RecoverReconciliation,
    MarkReconciliation,
    BulkResolveReconciliation,
    ForceBalanceCorrection,
    FixKyc,
    RepairChain,
}

impl AdminActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ResolveReconciliation => "resolve_reconciliation",
            Self::DismissReconciliation => "dismiss_reconciliation",
            Self::RecoverReconciliation => "recover_reconciliation",
            Self::MarkReconciliation => "mark_reconciliation",
            Self::BulkResolveReconciliation => "bulk_resolve_reconciliation",
            Self::ForceBalanceCorrection => "force_balance_correction",
            Self::FixKyc => "fix_kyc",
            Self::RepairChain => "repair_chain",
        }
    }
}

impl TryFrom<&str> for AdminActionKind {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "resolve_reconciliation" => Ok(Self::ResolveReconciliation),
            "dismiss_reconciliation" => Ok(Self::DismissReconciliation),
            "recover_reconciliation" => Ok(Self::RecoverReconciliation),
            "mark_reconciliation" => Ok(Self::MarkReconciliation),
            "bulk_resolve_reconciliation" => Ok(Self::BulkResolveReconciliation),
            "force_balance_correction" => Ok(Self::ForceBalanceCorrection),
            "fix_kyc" => Ok(Self::FixKyc),
            "repair_chain" => Ok(Self::RepairChain),
            other => Err(EngineError::InvalidName(format!(
                "invalid admin action: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdminAction {
    pub id: Uuid,
    pub actor_id: String,
    pub action: AdminActionKind,
    pub target_id: String,
    pub reason: Option<String>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AdminAction {
    pub(crate) fn new(
        actor_id: &str,
        action: AdminActionKind,
        target_id: impl Into<String>,
        reason: Option<&str>,
        details: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id: actor_id.to_string(),
            action,
            target_id: target_id.into(),
            reason: reason.map(ToString::to_string),
            details,
            created_at: at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "admin_actions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub actor_id: String,
    pub action: String,
    pub target_id: String,
    pub reason: Option<String>,
    pub details: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&AdminAction> for ActiveModel {
    fn from(value: &AdminAction) -> Self {
        Self {
            id: ActiveValue::Set(value.id.to_string()),
            actor_id: ActiveValue::Set(value.actor_id.clone()),
            action: ActiveValue::Set(value.action.as_str().to_string()),
            target_id: ActiveValue::Set(value.target_id.clone()),
            reason: ActiveValue::Set(value.reason.clone()),
            details: ActiveValue::Set(value.details.to_string()),
            created_at: ActiveValue::Set(value.created_at),
        }
    }
}

impl TryFrom<Model> for AdminAction {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "admin action")?,
            actor_id: model.actor_id,
            action: AdminActionKind::try_from(model.action.as_str())?,
            target_id: model.target_id,
            reason: model.reason,
            details: serde_json::from_str(&model.details)?,
            created_at: model.created_at,
        })
    }
}
