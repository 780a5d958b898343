//! Wallet transaction history.
//!
//! Every authoritative balance change appends one line item here. The sum of
//! `delta_minor` for a user is the balance the wallet *should* have, which is
//! what [`Engine::reconcile_wallet`](crate::Engine::reconcile_wallet) checks.
//!
//! `idempotency_key` is unique: a debit tied to a VAS transaction carries
//! `vas-debit:<transaction id>`, so the same purchase can never be charged
//! twice.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, VasKind, util::parse_optional_uuid, util::parse_uuid};

/// Idempotency key of the single debit a VAS purchase may cause.
pub fn vas_debit_key(transaction_id: Uuid) -> String {
    format!("vas-debit:{transaction_id}")
}

/// Idempotency key of the one wallet movement a VAS transaction of `kind`
/// may cause.
pub fn vas_settlement_key(kind: VasKind, transaction_id: Uuid) -> String {
    if kind.debits_wallet() {
        vas_debit_key(transaction_id)
    } else {
        format!("vas-credit:{transaction_id}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletHistoryEntry {
    pub id: Uuid,
    pub user_id: String,
    pub delta_minor: i64,
    pub balance_after_minor: i64,
    pub reason: String,
    pub related_transaction_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "wallet_history")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: String,
    pub delta_minor: i64,
    pub balance_after_minor: i64,
    pub reason: String,
    pub related_transaction_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::wallets::Entity",
        from = "Column::UserId",
        to = "super::wallets::Column::UserId",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Wallet,
}

impl Related<super::wallets::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Wallet.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for WalletHistoryEntry {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "wallet history")?,
            user_id: model.user_id,
            delta_minor: model.delta_minor,
            balance_after_minor: model.balance_after_minor,
            reason: model.reason,
            related_transaction_id: parse_optional_uuid(model.related_transaction_id.as_deref()),
            idempotency_key: model.idempotency_key,
            created_at: model.created_at,
        })
    }
}
