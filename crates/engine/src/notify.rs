//! Outbound notifications.
//!
//! The engine tells a [`NotificationSink`] about balance changes and new
//! review items after the corresponding write has committed. Delivery is best
//! effort: a failing sink is logged and never fails the operation.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::ReconciliationReason;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    BalanceChanged {
        user_id: String,
        delta_minor: i64,
        balance_minor: i64,
        reason: String,
    },
    NeedsReview {
        transaction_id: Uuid,
        user_id: String,
        reason: ReconciliationReason,
    },
}

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Default sink: writes every notification to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification {
            Notification::BalanceChanged {
                user_id,
                delta_minor,
                balance_minor,
                reason,
            } => tracing::info!(
                target: "notification",
                user_id,
                delta_minor,
                balance_minor,
                reason,
                "balance changed"
            ),
            Notification::NeedsReview {
                transaction_id,
                user_id,
                reason,
            } => tracing::info!(
                target: "notification",
                %transaction_id,
                user_id,
                reason = reason.as_str(),
                "transaction needs review"
            ),
        }
        Ok(())
    }
}
