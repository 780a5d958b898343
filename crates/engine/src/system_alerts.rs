//! Append-only operational alerts.
//!
//! Alerts are raised when the engine finds state it should never have
//! reached: a wallet whose balance disagrees with its history, a profile
//! mirror that drifted, or a ledger chain with two active versions.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, Severity, util::parse_uuid};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    BalanceDrift,
    MirrorDrift,
    InvariantViolation,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BalanceDrift => "balance_drift",
            Self::MirrorDrift => "mirror_drift",
            Self::InvariantViolation => "invariant_violation",
        }
    }
}

impl TryFrom<&str> for AlertKind {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "balance_drift" => Ok(Self::BalanceDrift),
            "mirror_drift" => Ok(Self::MirrorDrift),
            "invariant_violation" => Ok(Self::InvariantViolation),
            other => Err(EngineError::InvalidName(format!(
                "invalid alert kind: {other}"
            ))),
        }
    }
}

fn severity_from_str(value: &str) -> Result<Severity, EngineError> {
    match value {
        "LOW" => Ok(Severity::Low),
        "MEDIUM" => Ok(Severity::Medium),
        "HIGH" => Ok(Severity::High),
        "CRITICAL" => Ok(Severity::Critical),
        other => Err(EngineError::InvalidName(format!(
            "invalid severity: {other}"
        ))),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemAlert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub severity: Severity,
    /// User id or chain id the alert is about.
    pub subject_id: String,
    pub message: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl SystemAlert {
    pub(crate) fn new(
        kind: AlertKind,
        severity: Severity,
        subject_id: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            subject_id: subject_id.into(),
            message: message.into(),
            details,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "system_alerts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub kind: String,
    pub severity: String,
    pub subject_id: String,
    pub message: String,
    pub details: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&SystemAlert> for ActiveModel {
    fn from(value: &SystemAlert) -> Self {
        Self {
            id: ActiveValue::Set(value.id.to_string()),
            kind: ActiveValue::Set(value.kind.as_str().to_string()),
            severity: ActiveValue::Set(value.severity.as_str().to_string()),
            subject_id: ActiveValue::Set(value.subject_id.clone()),
            message: ActiveValue::Set(value.message.clone()),
            details: ActiveValue::Set(value.details.to_string()),
            created_at: ActiveValue::Set(value.created_at),
        }
    }
}

impl TryFrom<Model> for SystemAlert {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "alert")?,
            kind: AlertKind::try_from(model.kind.as_str())?,
            severity: severity_from_str(&model.severity)?,
            subject_id: model.subject_id,
            message: model.message,
            details: serde_json::from_str(&model.details)?,
            created_at: model.created_at,
        })
    }
}
