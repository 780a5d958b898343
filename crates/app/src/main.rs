use std::{sync::Arc, time::Duration};

use engine::{Engine, ScanPolicy, SchedulerConfig, start_scheduler};
use migration::{Migrator, MigratorTrait};
use settings::Database;

mod settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = settings::Settings::new()?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "ledger={level},engine={level},system_alert={level},notification={level}",
            level = settings.app.level
        ))
        .init();

    let db = parse_database(&settings.database).await?;
    let reconciliation = &settings.reconciliation;
    let policy = ScanPolicy {
        failed_grace: chrono::Duration::minutes(reconciliation.failed_grace_minutes),
        pending_grace: chrono::Duration::minutes(reconciliation.pending_grace_minutes),
        provider_null_window: chrono::Duration::hours(reconciliation.provider_null_window_hours),
        ..ScanPolicy::default()
    };
    let engine = Arc::new(
        Engine::builder()
            .database(db)
            .scan_policy(policy)
            .build()
            .await?,
    );

    let scheduler = if reconciliation.enabled {
        Some(start_scheduler(
            engine.clone(),
            SchedulerConfig {
                scan_interval: Duration::from_secs(reconciliation.interval_secs),
                expiry_interval: Duration::from_secs(reconciliation.expiry_interval_secs),
                dry_run: reconciliation.dry_run,
            },
        )?)
    } else {
        tracing::info!("reconciliation scheduler disabled");
        None
    };

    tracing::info!("ledger engine running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    if let Some(scheduler) = scheduler {
        scheduler.abort();
    }
    tracing::info!("shutting down");
    Ok(())
}

async fn parse_database(
    config: &settings::Database,
) -> Result<sea_orm::DatabaseConnection, Box<dyn std::error::Error + Send + Sync>> {
    let url = match config {
        Database::Memory => String::from("sqlite::memory:"),
        Database::Sqlite(path) => format!("sqlite:{}?mode=rwc", path),
    };

    let database = sea_orm::Database::connect(url).await?;
    Migrator::up(&database, None).await?;
    Ok(database)
}
