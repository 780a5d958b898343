use std::{fmt, sync::Arc};

use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseConnection};

use crate::{
    AdminAction, AlertKind, EngineError, Notification, NotificationSink, ResultEngine, Severity,
    SystemAlert, TracingSink, admin_actions, system_alerts,
};

mod audit;
mod chains;
mod entries;
mod reconciliation;
mod vas;
mod wallets;

pub use chains::ChainReport;
pub use entries::{DeletedEntry, EntryListFilter, EntryTotals};
pub use reconciliation::{
    BulkResolveItem, BulkResolveReport, ReconciliationStats, ScanFinding, ScanPolicy, ScanReport,
};

/// Run a block inside a DB transaction, committing on success and rolling back on error.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.database.begin().await?;
        let result: $crate::ResultEngine<_> = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

pub(crate) use with_tx;

pub struct Engine {
    database: DatabaseConnection,
    notifier: Arc<dyn NotificationSink>,
    scan_policy: ScanPolicy,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("database", &self.database)
            .field("scan_policy", &self.scan_policy)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn scan_policy(&self) -> &ScanPolicy {
        &self.scan_policy
    }

    /// Hands a notification to the sink. Failures are logged, never returned.
    fn notify(&self, notification: Notification) {
        if let Err(err) = self.notifier.notify(&notification) {
            tracing::warn!("dropping notification {notification:?}: {err}");
        }
    }

    /// Persists an alert outside of any caller transaction, so it survives
    /// the rollback of the operation that raised it.
    async fn raise_alert(&self, alert: SystemAlert) {
        tracing::error!(
            target: "system_alert",
            kind = alert.kind.as_str(),
            severity = alert.severity.as_str(),
            subject_id = %alert.subject_id,
            details = %alert.details,
            "{}",
            alert.message
        );
        let model: system_alerts::ActiveModel = (&alert).into();
        if let Err(err) = model.insert(&self.database).await {
            tracing::error!("failed to persist system alert {}: {err}", alert.id);
        }
    }

    /// Passes `result` through, recording a critical alert about
    /// `subject_id` first when it is an [`EngineError::InvariantViolation`].
    async fn alert_on_violation<T>(
        &self,
        subject_id: &str,
        result: ResultEngine<T>,
    ) -> ResultEngine<T> {
        if let Err(EngineError::InvariantViolation(message)) = &result {
            self.raise_alert(SystemAlert::new(
                AlertKind::InvariantViolation,
                Severity::Critical,
                subject_id,
                message.clone(),
                serde_json::json!({ "error": message }),
            ))
            .await;
        }
        result
    }
}

async fn record_admin_action<C: ConnectionTrait>(
    db: &C,
    action: &AdminAction,
) -> ResultEngine<()> {
    let model: admin_actions::ActiveModel = action.into();
    model.insert(db).await?;
    tracing::info!(
        actor = %action.actor_id,
        action = action.action.as_str(),
        target = %action.target_id,
        "admin action recorded"
    );
    Ok(())
}

/// The builder for `Engine`
#[derive(Default)]
pub struct EngineBuilder {
    database: DatabaseConnection,
    notifier: Option<Arc<dyn NotificationSink>>,
    scan_policy: ScanPolicy,
}

impl EngineBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> EngineBuilder {
        self.database = db;
        self
    }

    /// Where balance and review notifications go. Defaults to [`TracingSink`].
    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> EngineBuilder {
        self.notifier = Some(notifier);
        self
    }

    pub fn scan_policy(mut self, policy: ScanPolicy) -> EngineBuilder {
        self.scan_policy = policy;
        self
    }

    /// Construct `Engine`
    pub async fn build(self) -> ResultEngine<Engine> {
        Ok(Engine {
            database: self.database,
            notifier: self.notifier.unwrap_or_else(|| Arc::new(TracingSink)),
            scan_policy: self.scan_policy,
        })
    }
}
