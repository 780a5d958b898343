use sea_orm::{QueryFilter, QueryOrder, QuerySelect, prelude::*};

use crate::{AdminAction, ResultEngine, SystemAlert, admin_actions, system_alerts};

use super::Engine;

impl Engine {
    /// Admin actions, newest first. With `target_id` only the actions on
    /// that transaction, user or chain.
    pub async fn list_admin_actions(
        &self,
        target_id: Option<&str>,
        limit: u64,
    ) -> ResultEngine<Vec<AdminAction>> {
        let mut query = admin_actions::Entity::find();
        if let Some(target_id) = target_id {
            query = query.filter(admin_actions::Column::TargetId.eq(target_id));
        }
        let rows = query
            .order_by_desc(admin_actions::Column::CreatedAt)
            .order_by_desc(admin_actions::Column::Id)
            .limit(limit)
            .all(&self.database)
            .await?;
        rows.into_iter().map(AdminAction::try_from).collect()
    }

    pub async fn list_system_alerts(&self, limit: u64) -> ResultEngine<Vec<SystemAlert>> {
        let rows = system_alerts::Entity::find()
            .order_by_desc(system_alerts::Column::CreatedAt)
            .order_by_desc(system_alerts::Column::Id)
            .limit(limit)
            .all(&self.database)
            .await?;
        rows.into_iter().map(SystemAlert::try_from).collect()
    }
}
