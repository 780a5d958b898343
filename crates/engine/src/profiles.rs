//! User profiles carry a read-only mirror of the wallet balance.
//!
//! Profile screens and dashboards read `wallet_balance_minor` directly. The
//! mirror is written only by the wallet write path, never on its own.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "user_profiles")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,
    pub display_name: Option<String>,
    pub wallet_balance_minor: i64,
    pub wallet_synced_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
