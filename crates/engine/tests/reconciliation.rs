use std::{sync::Arc, time::Duration};

use chrono::Utc;

use engine::{
    AdminActionKind, Engine, EngineError, Evidence, FailureReason, ManualFlagCmd, Notification,
    ReconciliationReason, Resolution, ResolveCmd, ScanPolicy, SchedulerConfig, VasStatus,
    start_scheduler, vas_debit_key,
};

mod common;

use common::{
    backdate_vas, engine_with_db, engine_with_sink, funded_wallet, migrated_db, movements_for,
    pending_purchase,
};

#[tokio::test]
async fn stuck_pending_is_flagged_once() {
    let (engine, db, sink) = engine_with_sink().await;
    funded_wallet(&engine, "ada", 1_000).await;
    let txn = pending_purchase(&engine, "ada", 500).await;
    backdate_vas(&db, txn.id, 15).await;

    let report = engine.scan_once(false).await.unwrap();
    assert_eq!(report.candidates(), 1);
    assert_eq!(report.flagged, vec![txn.id]);
    assert!(report.errors.is_empty());
    let finding = &report.findings[0];
    assert_eq!(finding.reason, ReconciliationReason::StuckPending);
    assert!(finding.age_minutes >= 15);

    let flagged = engine.vas_transaction(txn.id).await.unwrap();
    assert_eq!(flagged.status, VasStatus::NeedsReconciliation);
    assert_eq!(
        flagged.reconciliation.reason,
        Some(ReconciliationReason::StuckPending)
    );
    let details = flagged.reconciliation.details.unwrap();
    assert_eq!(details.original_status, VasStatus::Pending);
    assert!(details.auto_detected);
    assert!(matches!(
        details.evidence,
        Some(Evidence::StuckPending { stuck_minutes }) if stuck_minutes >= 15
    ));
    assert!(!details.verification_steps.is_empty());

    let again = engine.scan_once(false).await.unwrap();
    assert_eq!(again.candidates(), 0);
    assert!(again.flagged.is_empty());

    let reviews = sink
        .notifications()
        .into_iter()
        .filter(|n| matches!(n, Notification::NeedsReview { .. }))
        .count();
    assert_eq!(reviews, 1);
}

#[tokio::test]
async fn young_pending_is_left_alone() {
    let (engine, db) = engine_with_db().await;
    funded_wallet(&engine, "ada", 1_000).await;
    let txn = pending_purchase(&engine, "ada", 500).await;
    backdate_vas(&db, txn.id, 2).await;

    let report = engine.scan_once(false).await.unwrap();
    assert_eq!(report.candidates(), 0);
    assert_eq!(
        engine.vas_transaction(txn.id).await.unwrap().status,
        VasStatus::Pending
    );
}

#[tokio::test]
async fn resolving_as_success_debits_exactly_once() {
    let (engine, db, sink) = engine_with_sink().await;
    funded_wallet(&engine, "ada", 1_000).await;
    let txn = pending_purchase(&engine, "ada", 500).await;
    backdate_vas(&db, txn.id, 15).await;
    engine.scan_once(false).await.unwrap();

    let resolved = engine
        .resolve_reconciliation(
            ResolveCmd::new(txn.id, "admin-1", Resolution::Success)
                .notes("provider logs confirm delivery"),
        )
        .await
        .unwrap();
    assert_eq!(resolved.status, VasStatus::Success);
    assert!(resolved.reconciliation.resolved);
    assert_eq!(resolved.reconciliation.resolved_by.as_deref(), Some("admin-1"));
    assert_eq!(
        resolved.reconciliation.resolution_notes.as_deref(),
        Some("provider logs confirm delivery")
    );
    assert_eq!(engine.wallet_balance("ada").await.unwrap(), 500);

    let history = engine.wallet_history("ada", 10).await.unwrap();
    let debit = history
        .iter()
        .find(|line| line.related_transaction_id == Some(txn.id))
        .unwrap();
    assert_eq!(debit.delta_minor, -500);
    assert_eq!(debit.idempotency_key, Some(vas_debit_key(txn.id)));

    let err = engine
        .resolve_reconciliation(ResolveCmd::new(txn.id, "admin-2", Resolution::Success))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)), "{err:?}");
    assert_eq!(engine.wallet_balance("ada").await.unwrap(), 500);
    assert_eq!(movements_for(&db, txn.id).await, 1);

    let actions = engine
        .list_admin_actions(Some(&txn.id.to_string()), 10)
        .await
        .unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].action, AdminActionKind::ResolveReconciliation);
    assert_eq!(actions[0].details["resolution"], "success");

    assert!(sink.notifications().iter().any(|n| matches!(
        n,
        Notification::BalanceChanged { delta_minor: -500, balance_minor: 500, .. }
    )));

    // A resolved transaction never comes back.
    assert_eq!(engine.scan_once(false).await.unwrap().candidates(), 0);
    let err = engine
        .mark_manually(ManualFlagCmd::new(txn.id, "admin-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)), "{err:?}");
}

#[tokio::test]
async fn resolve_success_may_overdraw() {
    let (engine, db) = engine_with_db().await;
    funded_wallet(&engine, "ada", 500).await;
    let txn = pending_purchase(&engine, "ada", 500).await;
    backdate_vas(&db, txn.id, 15).await;
    engine.scan_once(false).await.unwrap();
    engine
        .force_balance_correction("ada", 100, "admin-1", "chargeback")
        .await
        .unwrap();

    engine
        .resolve_reconciliation(ResolveCmd::new(txn.id, "admin-1", Resolution::Success))
        .await
        .unwrap();
    let wallet = engine.wallet_account("ada").await.unwrap();
    assert_eq!(wallet.balance_minor, -400);
    assert_eq!(wallet.reserved_minor, 0);
}

#[tokio::test]
async fn resolving_as_failed_leaves_wallet_alone() {
    let (engine, db) = engine_with_db().await;
    funded_wallet(&engine, "ada", 1_000).await;
    let txn = pending_purchase(&engine, "ada", 500).await;
    backdate_vas(&db, txn.id, 15).await;
    engine.scan_once(false).await.unwrap();

    let resolved = engine
        .resolve_reconciliation(ResolveCmd::new(txn.id, "admin-1", Resolution::Failed))
        .await
        .unwrap();
    assert_eq!(resolved.status, VasStatus::Failed);
    assert_eq!(resolved.reserved_minor, 0);
    let wallet = engine.wallet_account("ada").await.unwrap();
    assert_eq!(wallet.balance_minor, 1_000);
    assert_eq!(wallet.reserved_minor, 0);
    assert_eq!(movements_for(&db, txn.id).await, 0);
}

#[tokio::test]
async fn dismissing_releases_the_hold() {
    let (engine, db) = engine_with_db().await;
    funded_wallet(&engine, "ada", 1_000).await;
    let txn = pending_purchase(&engine, "ada", 500).await;
    backdate_vas(&db, txn.id, 15).await;
    engine.scan_once(false).await.unwrap();
    assert_eq!(engine.wallet_account("ada").await.unwrap().reserved_minor, 500);

    let dismissed = engine
        .dismiss_reconciliation(txn.id, "admin-1", "provider confirmed failure", None)
        .await
        .unwrap();
    assert_eq!(dismissed.status, VasStatus::NeedsReconciliation);
    assert_eq!(dismissed.reserved_minor, 0);
    let wallet = engine.wallet_account("ada").await.unwrap();
    assert_eq!(wallet.reserved_minor, 0);
    assert_eq!(wallet.balance_minor, 1_000);
}

#[tokio::test]
async fn unflagged_transaction_cannot_be_resolved() {
    let (engine, _db) = engine_with_db().await;
    funded_wallet(&engine, "ada", 1_000).await;
    let txn = pending_purchase(&engine, "ada", 500).await;

    let err = engine
        .resolve_reconciliation(ResolveCmd::new(txn.id, "admin-1", Resolution::Success))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)), "{err:?}");
    assert_eq!(engine.wallet_balance("ada").await.unwrap(), 1_000);
    assert!(
        engine
            .list_admin_actions(Some(&txn.id.to_string()), 10)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn suspicious_failures_are_flagged_and_clear_ones_are_not() {
    let (engine, db) = engine_with_db().await;
    funded_wallet(&engine, "ada", 2_000).await;

    let suspicious = pending_purchase(&engine, "ada", 500).await;
    engine
        .record_provider_attempt(suspicious.id, "monnify")
        .await
        .unwrap();
    engine
        .complete_as_failure(
            suspicious.id,
            FailureReason::from_text("Price mismatch on requested bundle"),
        )
        .await
        .unwrap();
    backdate_vas(&db, suspicious.id, 10).await;

    let clear = engine
        .create_vas_transaction(engine::CreateVasCmd::new(
            "ada",
            engine::VasKind::Airtime,
            200,
            "08030000009",
        ))
        .await
        .unwrap();
    engine.record_provider_attempt(clear.id, "monnify").await.unwrap();
    engine
        .complete_as_failure(clear.id, FailureReason::from_text("Invalid phone number"))
        .await
        .unwrap();
    backdate_vas(&db, clear.id, 10).await;

    let report = engine.scan_once(false).await.unwrap();
    assert_eq!(report.flagged, vec![suspicious.id]);
    assert_eq!(report.findings[0].reason, ReconciliationReason::SuspiciousFailure);

    let flagged = engine.vas_transaction(suspicious.id).await.unwrap();
    assert_eq!(flagged.status, VasStatus::NeedsReconciliation);
    let details = flagged.reconciliation.details.unwrap();
    assert_eq!(details.original_status, VasStatus::Failed);
    assert_eq!(details.provider.as_deref(), Some("monnify"));
    assert_eq!(
        engine.vas_transaction(clear.id).await.unwrap().status,
        VasStatus::Failed
    );
}

#[tokio::test]
async fn attempt_without_provider_is_flagged() {
    let (engine, db) = engine_with_db().await;
    funded_wallet(&engine, "ada", 1_000).await;
    let txn = pending_purchase(&engine, "ada", 500).await;
    // Past the failure grace, not yet stuck.
    backdate_vas(&db, txn.id, 7).await;

    let report = engine.scan_once(false).await.unwrap();
    assert_eq!(report.flagged, vec![txn.id]);
    assert_eq!(report.findings[0].reason, ReconciliationReason::ProviderNone);
}

#[tokio::test]
async fn attempt_without_provider_is_only_checked_within_the_window() {
    let db = migrated_db().await;
    // Keep the stuck-pending detector out of the way.
    let engine = Engine::builder()
        .database(db.clone())
        .scan_policy(ScanPolicy {
            pending_grace: chrono::Duration::hours(48),
            ..ScanPolicy::default()
        })
        .build()
        .await
        .unwrap();
    funded_wallet(&engine, "ada", 1_000).await;
    let recent = pending_purchase(&engine, "ada", 500).await;
    backdate_vas(&db, recent.id, 2 * 60).await;
    let old = engine
        .create_vas_transaction(engine::CreateVasCmd::new(
            "ada",
            engine::VasKind::Airtime,
            200,
            "08030000010",
        ))
        .await
        .unwrap();
    backdate_vas(&db, old.id, 25 * 60).await;

    let report = engine.scan_once(true).await.unwrap();
    assert_eq!(report.candidates(), 1);
    assert_eq!(report.findings[0].transaction_id, recent.id);
    assert_eq!(report.findings[0].reason, ReconciliationReason::ProviderNone);
    assert!(report.findings.iter().all(|finding| finding.transaction_id != old.id));
}

#[tokio::test]
async fn dry_run_reports_without_writing() {
    let (engine, db) = engine_with_db().await;
    funded_wallet(&engine, "ada", 1_000).await;
    let txn = pending_purchase(&engine, "ada", 500).await;
    backdate_vas(&db, txn.id, 30).await;

    let report = engine.scan_once(true).await.unwrap();
    assert!(report.dry_run);
    assert_eq!(report.candidates(), 1);
    assert!(report.flagged.is_empty());
    assert_eq!(
        engine.vas_transaction(txn.id).await.unwrap().status,
        VasStatus::Pending
    );
    assert_eq!(engine.scan_once(true).await.unwrap().candidates(), 1);
}

#[tokio::test]
async fn dismissed_items_can_be_recovered_and_reflagged() {
    let (engine, db) = engine_with_db().await;
    funded_wallet(&engine, "ada", 1_000).await;
    let txn = pending_purchase(&engine, "ada", 500).await;
    backdate_vas(&db, txn.id, 15).await;
    engine.scan_once(false).await.unwrap();

    let dismissed = engine
        .dismiss_reconciliation(txn.id, "admin-1", "user confirmed nothing arrived", Some("called"))
        .await
        .unwrap();
    assert!(dismissed.reconciliation.dismissed);
    assert_eq!(dismissed.status, VasStatus::NeedsReconciliation);
    assert!(engine.list_pending_reconciliations(10).await.unwrap().is_empty());
    assert_eq!(
        engine.list_dismissed_reconciliations(10).await.unwrap().len(),
        1
    );

    let err = engine
        .dismiss_reconciliation(txn.id, "admin-1", "twice", None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)), "{err:?}");

    let recovered = engine
        .recover_reconciliation(txn.id, "admin-2", "dismissed by mistake")
        .await
        .unwrap();
    assert!(recovered.awaits_review());
    assert_eq!(recovered.reconciliation.recovered_by.as_deref(), Some("admin-2"));
    let err = engine
        .recover_reconciliation(txn.id, "admin-2", "again")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)), "{err:?}");

    engine
        .dismiss_reconciliation(txn.id, "admin-1", "checked twice", None)
        .await
        .unwrap();
    let reflagged = engine
        .mark_manually(
            ManualFlagCmd::new(txn.id, "admin-3").ghost_success("the data bundle arrived"),
        )
        .await
        .unwrap();
    assert!(reflagged);

    let txn = engine.vas_transaction(txn.id).await.unwrap();
    assert!(txn.awaits_review());
    assert_eq!(txn.reconciliation.reason, Some(ReconciliationReason::GhostSuccess));
    let details = txn.reconciliation.details.unwrap();
    assert_eq!(details.original_status, VasStatus::Pending);
    assert_eq!(details.marked_by.as_deref(), Some("admin-3"));
    assert!(!details.auto_detected);

    let kinds: Vec<AdminActionKind> = engine
        .list_admin_actions(Some(&txn.id.to_string()), 10)
        .await
        .unwrap()
        .into_iter()
        .map(|action| action.action)
        .collect();
    assert_eq!(kinds.len(), 4);
    assert!(kinds.contains(&AdminActionKind::MarkReconciliation));
    assert!(kinds.contains(&AdminActionKind::RecoverReconciliation));
}

#[tokio::test]
async fn user_report_flags_a_failed_purchase() {
    let (engine, _db, sink) = engine_with_sink().await;
    funded_wallet(&engine, "ada", 1_000).await;
    let txn = pending_purchase(&engine, "ada", 500).await;
    engine.record_provider_attempt(txn.id, "peyflex").await.unwrap();
    engine
        .complete_as_failure(txn.id, FailureReason::from_text("Network not active"))
        .await
        .unwrap();

    let cmd = ManualFlagCmd::new(txn.id, "admin-1")
        .ghost_success("I received the 1GB bundle")
        .notes("ticket 981");
    assert!(engine.mark_manually(cmd.clone()).await.unwrap());
    assert!(!engine.mark_manually(cmd).await.unwrap());

    let flagged = engine.vas_transaction(txn.id).await.unwrap();
    let details = flagged.reconciliation.details.unwrap();
    assert_eq!(details.original_status, VasStatus::Failed);
    assert_eq!(details.notes.as_deref(), Some("ticket 981"));
    assert_eq!(
        details.evidence,
        Some(Evidence::UserReport {
            report: "I received the 1GB bundle".to_string()
        })
    );

    let actions = engine
        .list_admin_actions(Some(&txn.id.to_string()), 10)
        .await
        .unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].action, AdminActionKind::MarkReconciliation);
    assert_eq!(actions[0].actor_id, "admin-1");

    assert!(sink.notifications().contains(&Notification::NeedsReview {
        transaction_id: txn.id,
        user_id: "ada".to_string(),
        reason: ReconciliationReason::GhostSuccess,
    }));

    let resolved = engine
        .resolve_reconciliation(ResolveCmd::new(txn.id, "admin-1", Resolution::Success))
        .await
        .unwrap();
    assert_eq!(resolved.status, VasStatus::Success);
    assert_eq!(engine.wallet_balance("ada").await.unwrap(), 500);
}

#[tokio::test]
async fn queue_listings_and_stats() {
    let (engine, db) = engine_with_db().await;
    funded_wallet(&engine, "ada", 1_000).await;
    funded_wallet(&engine, "grace", 1_000).await;

    let a = pending_purchase(&engine, "ada", 500).await;
    let b = engine
        .create_vas_transaction(engine::CreateVasCmd::new(
            "ada",
            engine::VasKind::Airtime,
            200,
            "08030000004",
        ))
        .await
        .unwrap();
    let c = pending_purchase(&engine, "grace", 300).await;
    let d = pending_purchase(&engine, "grace", 100).await;
    for id in [a.id, b.id, c.id, d.id] {
        backdate_vas(&db, id, 20).await;
    }
    assert_eq!(engine.scan_once(false).await.unwrap().flagged.len(), 4);

    engine
        .dismiss_reconciliation(d.id, "admin-1", "duplicate report", None)
        .await
        .unwrap();
    engine
        .resolve_reconciliation(ResolveCmd::new(b.id, "admin-1", Resolution::Failed))
        .await
        .unwrap();

    let pending = engine.list_pending_reconciliations(10).await.unwrap();
    let mut ids: Vec<_> = pending.iter().map(|t| t.id).collect();
    ids.sort();
    let mut expected = vec![a.id, c.id];
    expected.sort();
    assert_eq!(ids, expected);

    assert_eq!(engine.list_reconciliations_for_user("ada").await.unwrap().len(), 2);

    let stats = engine.reconciliation_stats(Utc::now()).await.unwrap();
    assert_eq!(stats.pending_count, 2);
    assert_eq!(stats.pending_amount_minor, 800);
    assert_eq!(stats.affected_users, 2);
    assert_eq!(stats.dismissed_count, 1);
    assert_eq!(stats.resolved_last_30_days, 1);
}

#[tokio::test]
async fn bulk_resolution_reports_each_item() {
    let (engine, db) = engine_with_db().await;
    funded_wallet(&engine, "ada", 2_000).await;
    let first = pending_purchase(&engine, "ada", 500).await;
    let second = engine
        .create_vas_transaction(engine::CreateVasCmd::new(
            "ada",
            engine::VasKind::Airtime,
            300,
            "08030000005",
        ))
        .await
        .unwrap();
    backdate_vas(&db, first.id, 20).await;
    backdate_vas(&db, second.id, 20).await;
    engine.scan_once(false).await.unwrap();
    let untouched = engine
        .create_vas_transaction(engine::CreateVasCmd::new(
            "ada",
            engine::VasKind::Airtime,
            100,
            "08030000006",
        ))
        .await
        .unwrap();

    let report = engine
        .bulk_resolve_reconciliations(
            &[first.id, second.id, untouched.id],
            "admin-1",
            Resolution::Success,
            Some("provider statement 2026-10"),
        )
        .await
        .unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    let failed = report.items.iter().find(|item| !item.ok).unwrap();
    assert_eq!(failed.transaction_id, untouched.id);
    assert!(failed.error.is_some());

    assert_eq!(engine.wallet_balance("ada").await.unwrap(), 1_200);
    assert_eq!(
        engine.vas_transaction(untouched.id).await.unwrap().status,
        VasStatus::Pending
    );

    let summary = engine.list_admin_actions(Some("bulk"), 10).await.unwrap();
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].action, AdminActionKind::BulkResolveReconciliation);
    assert_eq!(summary[0].details["succeeded"], 2);
}

#[tokio::test]
async fn scheduler_flags_and_expires_in_the_background() {
    let (engine, db) = engine_with_db().await;
    funded_wallet(&engine, "ada", 1_000).await;
    let stuck = pending_purchase(&engine, "ada", 500).await;
    backdate_vas(&db, stuck.id, 15).await;
    let lapsed = engine
        .create_vas_transaction(
            engine::CreateVasCmd::new("ada", engine::VasKind::Bills, 200, "meter-7")
                .expires_at(Utc::now()),
        )
        .await
        .unwrap();

    let engine = Arc::new(engine);
    let handle = start_scheduler(
        engine.clone(),
        SchedulerConfig {
            scan_interval: Duration::from_millis(20),
            expiry_interval: Duration::from_millis(20),
            dry_run: false,
        },
    )
    .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.abort();

    assert_eq!(
        engine.vas_transaction(stuck.id).await.unwrap().status,
        VasStatus::NeedsReconciliation
    );
    assert_eq!(
        engine.vas_transaction(lapsed.id).await.unwrap().status,
        VasStatus::Expired
    );
}

#[tokio::test]
async fn scheduler_refuses_a_zero_interval() {
    let (engine, _db) = engine_with_db().await;
    let err = start_scheduler(
        Arc::new(engine),
        SchedulerConfig {
            scan_interval: Duration::ZERO,
            ..SchedulerConfig::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)), "{err:?}");
}
