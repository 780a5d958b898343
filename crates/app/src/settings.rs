//! Handles settings for the application. Configuration is read from an
//! optional `settings.toml` and overridden by `LEDGER__*` environment
//! variables, e.g. `LEDGER__APP__LEVEL=debug` or
//! `LEDGER__RECONCILIATION__DRY_RUN=true`.
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct App {
    pub level: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    Memory,
    Sqlite(String),
}

#[derive(Debug, Deserialize)]
pub struct Reconciliation {
    pub enabled: bool,
    pub interval_secs: u64,
    pub expiry_interval_secs: u64,
    pub dry_run: bool,
    pub failed_grace_minutes: i64,
    pub pending_grace_minutes: i64,
    pub provider_null_window_hours: i64,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub app: App,
    pub database: Database,
    pub reconciliation: Reconciliation,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("app.level", "info")?
            .set_default("database", "memory")?
            .set_default("reconciliation.enabled", true)?
            .set_default("reconciliation.interval_secs", 15 * 60)?
            .set_default("reconciliation.expiry_interval_secs", 60)?
            .set_default("reconciliation.dry_run", false)?
            .set_default("reconciliation.failed_grace_minutes", 5)?
            .set_default("reconciliation.pending_grace_minutes", 10)?
            .set_default("reconciliation.provider_null_window_hours", 24)?
            .add_source(File::with_name("settings").required(false))
            .add_source(
                Environment::with_prefix("LEDGER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Self = settings.try_deserialize()?;
        let reconciliation = &settings.reconciliation;
        if reconciliation.interval_secs == 0 || reconciliation.expiry_interval_secs == 0 {
            return Err(ConfigError::Message(
                "reconciliation intervals must be at least one second".to_string(),
            ));
        }
        Ok(settings)
    }
}
