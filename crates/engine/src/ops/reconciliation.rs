//! The reconciliation queue: flagging, scanning and admin resolution.

use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, QueryFilter, TransactionTrait, prelude::*, sea_query::Expr};
use uuid::Uuid;

use crate::{
    EngineError, MarkRequest, Notification, ReconciliationDetails, ResultEngine, VasEvent,
    VasTransaction, vas,
};

use super::{
    Engine,
    vas::{guarded_update, next_status, require_vas},
    with_tx,
};

mod resolve;
mod scan;

pub use resolve::{BulkResolveItem, BulkResolveReport, ReconciliationStats};
pub use scan::{ScanFinding, ScanPolicy, ScanReport};

/// Puts `model` into the review queue inside the caller's transaction.
///
/// Returns `Ok(None)` when the transaction already awaits review, so
/// flagging twice is harmless. A dismissed item can be flagged again; it
/// keeps the status it had before its first flag in the details.
pub(super) async fn flag_in<C: ConnectionTrait>(
    db: &C,
    model: &vas::Model,
    request: &MarkRequest,
    now: DateTime<Utc>,
) -> ResultEngine<Option<VasTransaction>> {
    let txn = VasTransaction::try_from(model.clone())?;
    if txn.awaits_review() {
        return Ok(None);
    }
    if txn.reconciliation.resolved {
        return Err(EngineError::InvalidState(format!(
            "transaction {} was already resolved",
            txn.id
        )));
    }

    let dismissed = txn.reconciliation.dismissed;
    let (from, to) = next_status(model, VasEvent::Flag { dismissed })?;

    let mut details = ReconciliationDetails::capture(&txn, request, now);
    if let Some(previous) = &txn.reconciliation.details {
        details.original_status = previous.original_status;
    }

    let mut update = guarded_update(model, from, to, now)
        .col_expr(vas::Column::NeedsReconciliation, Expr::value(true))
        .col_expr(
            vas::Column::ReconciliationReason,
            Expr::value(request.reason.as_str()),
        )
        .col_expr(
            vas::Column::ReconciliationDetails,
            Expr::value(serde_json::to_string(&details)?),
        )
        .col_expr(vas::Column::ReconciliationDismissed, Expr::value(false));
    if dismissed {
        update = update.filter(vas::Column::ReconciliationDismissed.eq(true));
    }

    let result = update.exec(db).await?;
    let current = VasTransaction::try_from(require_vas(db, txn.id).await?)?;
    if result.rows_affected != 1 {
        if current.awaits_review() {
            return Ok(None);
        }
        return Err(EngineError::Conflict(format!(
            "transaction {} was changed concurrently",
            txn.id
        )));
    }
    Ok(Some(current))
}

impl Engine {
    /// Flags a transaction for review.
    ///
    /// Returns `false` when it already awaits review. Flagging a dismissed
    /// item puts it back in the queue with fresh details.
    pub async fn mark_for_reconciliation(
        &self,
        transaction_id: Uuid,
        request: MarkRequest,
    ) -> ResultEngine<bool> {
        let now = Utc::now();
        let flagged = with_tx!(self, |db_tx| {
            let model = require_vas(&db_tx, transaction_id).await?;
            flag_in(&db_tx, &model, &request, now).await
        })?;

        let Some(txn) = flagged else {
            tracing::debug!(%transaction_id, "already awaiting review");
            return Ok(false);
        };
        tracing::info!(
            %transaction_id,
            reason = request.reason.as_str(),
            severity = request.reason.severity().as_str(),
            "transaction flagged for reconciliation"
        );
        self.notify(Notification::NeedsReview {
            transaction_id,
            user_id: txn.user_id,
            reason: request.reason,
        });
        Ok(true)
    }
}
