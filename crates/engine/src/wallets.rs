//! The module contains `WalletAccount`, the authoritative balance of a user.
//!
//! `balance_minor` is the single source of truth. Nothing outside
//! [`Engine::apply_delta`](crate::Engine::apply_delta) and the reconcile path
//! writes it; both also refresh the profile mirror in the same database
//! transaction.

use chrono::{DateTime, Utc};
use sea_orm::entity::{ActiveValue, prelude::*};
use serde::{Deserialize, Serialize};

use crate::{EngineError, Money};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    #[default]
    Unverified,
    Pending,
    Verified,
    Rejected,
}

impl KycStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unverified => "unverified",
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }
}

impl TryFrom<&str> for KycStatus {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "unverified" => Ok(Self::Unverified),
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "rejected" => Ok(Self::Rejected),
            other => Err(EngineError::InvalidName(format!(
                "invalid kyc status: {other}"
            ))),
        }
    }
}

/// A user's VAS wallet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAccount {
    pub user_id: String,
    pub balance_minor: i64,
    /// Funds held for in-flight operations; not spendable.
    pub reserved_minor: i64,
    pub tier: i32,
    pub kyc_status: KycStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WalletAccount {
    pub fn balance(&self) -> Money {
        Money::new(self.balance_minor)
    }

    /// Spendable balance (`balance - reserved`).
    pub fn available_minor(&self) -> i64 {
        self.balance_minor - self.reserved_minor
    }

    pub fn available(&self) -> Money {
        Money::new(self.available_minor())
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "wallet_accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,
    pub balance_minor: i64,
    pub reserved_minor: i64,
    pub tier: i32,
    pub kyc_status: String,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::wallet_history::Entity")]
    History,
}

impl Related<super::wallet_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::History.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&WalletAccount> for ActiveModel {
    fn from(value: &WalletAccount) -> Self {
        Self {
            user_id: ActiveValue::Set(value.user_id.clone()),
            balance_minor: ActiveValue::Set(value.balance_minor),
            reserved_minor: ActiveValue::Set(value.reserved_minor),
            tier: ActiveValue::Set(value.tier),
            kyc_status: ActiveValue::Set(value.kyc_status.as_str().to_string()),
            created_at: ActiveValue::Set(value.created_at),
            updated_at: ActiveValue::Set(value.updated_at),
        }
    }
}

impl TryFrom<Model> for WalletAccount {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: model.user_id,
            balance_minor: model.balance_minor,
            reserved_minor: model.reserved_minor,
            tier: model.tier,
            kyc_status: KycStatus::try_from(model.kyc_status.as_str())?,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}
