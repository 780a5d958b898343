//! Background reconciliation jobs.
//!
//! Two fixed-interval jobs run on their own tokio task, away from request
//! handling:
//!
//! - the reconciliation scan ([`Engine::scan_once`])
//! - the payment-window sweep ([`Engine::expire_lapsed`])
//!
//! Overlapping with a manual scan is harmless because flagging is
//! idempotent.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{task::JoinHandle, time::interval};
use tracing::{error, info};

use crate::{Engine, EngineError, ResultEngine};

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub scan_interval: Duration,
    pub expiry_interval: Duration,
    /// Report candidates without flagging them.
    pub dry_run: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(15 * 60),
            expiry_interval: Duration::from_secs(60),
            dry_run: false,
        }
    }
}

/// Spawns the scheduler. Abort the returned handle to stop it.
///
/// Both intervals must be non-zero.
pub fn start_scheduler(
    engine: Arc<Engine>,
    config: SchedulerConfig,
) -> ResultEngine<JoinHandle<()>> {
    if config.scan_interval.is_zero() || config.expiry_interval.is_zero() {
        return Err(EngineError::InvalidAmount(
            "scheduler intervals must be greater than zero".to_string(),
        ));
    }
    info!(
        scan_every_secs = config.scan_interval.as_secs(),
        expiry_every_secs = config.expiry_interval.as_secs(),
        dry_run = config.dry_run,
        "starting reconciliation scheduler"
    );

    Ok(tokio::spawn(async move {
        let mut scan_ticker = interval(config.scan_interval);
        let mut expiry_ticker = interval(config.expiry_interval);

        // Both tickers fire immediately; skip that so startup stays quiet.
        scan_ticker.tick().await;
        expiry_ticker.tick().await;

        loop {
            tokio::select! {
                _ = scan_ticker.tick() => {
                    match engine.scan_once(config.dry_run).await {
                        Ok(report) => info!(
                            flagged = report.flagged.len(),
                            candidates = report.candidates(),
                            dry_run = report.dry_run,
                            "scheduled reconciliation scan completed"
                        ),
                        Err(err) => error!("scheduled reconciliation scan failed: {err}"),
                    }
                }
                _ = expiry_ticker.tick() => {
                    match engine.expire_lapsed(Utc::now()).await {
                        Ok(expired) if !expired.is_empty() => {
                            info!(expired = expired.len(), "expired lapsed payment windows");
                        }
                        Ok(_) => {}
                        Err(err) => error!("payment window sweep failed: {err}"),
                    }
                }
            }
        }
    }))
}
