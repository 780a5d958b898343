use chrono::{Duration, TimeZone, Utc};
use sea_orm::Value;
use uuid::Uuid;

use engine::{
    AlertKind, AuditAction, CreateEntryCmd, EngineError, EntryKind, EntryListFilter,
    LifecycleStatus, UpdateEntryCmd,
};

mod common;

use common::{engine_with_db, execute};

fn income(owner: &str, amount_minor: i64) -> CreateEntryCmd {
    CreateEntryCmd::new(owner, EntryKind::Income, amount_minor, Utc::now())
        .category("Salary")
        .description("October salary")
}

fn expense(owner: &str, amount_minor: i64) -> CreateEntryCmd {
    CreateEntryCmd::new(owner, EntryKind::Expense, amount_minor, Utc::now())
        .category("Transport")
        .description("Bus fare")
}

#[tokio::test]
async fn update_supersedes_and_keeps_history() {
    let (engine, _db) = engine_with_db().await;
    let original = engine.create_entry(income("ada", 5000)).await.unwrap();
    assert_eq!(original.version, 1);
    assert_eq!(original.original_entry_id, original.id);

    let updated = engine
        .update_entry(
            UpdateEntryCmd::new(original.id, "ada")
                .amount_minor(3500)
                .description("edited"),
        )
        .await
        .unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.amount_minor, 3500);
    assert_eq!(updated.description, "edited");
    assert_eq!(updated.category, "Salary");
    assert_eq!(updated.lifecycle_status, LifecycleStatus::Active);
    assert_eq!(updated.original_entry_id, original.id);

    let active = engine
        .list_active_entries("ada", &EntryListFilter::default())
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, updated.id);

    let history = engine.entry_history(updated.id, "ada").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, original.id);
    assert_eq!(history[0].lifecycle_status, LifecycleStatus::Superseded);
    assert_eq!(history[0].superseded_by, Some(updated.id));
    assert_eq!(history[1].id, updated.id);

    let version_created = history[1]
        .audit_log
        .iter()
        .find(|record| record.action == AuditAction::VersionCreated)
        .unwrap();
    assert_eq!(
        version_created.changes,
        vec!["amount_minor".to_string(), "description".to_string()]
    );
}

#[tokio::test]
async fn delete_books_an_exact_reversal() {
    let (engine, _db) = engine_with_db().await;
    let entry = engine.create_entry(expense("ada", 2000)).await.unwrap();

    let deleted = engine.delete_entry(entry.id, "ada", "ada").await.unwrap();
    assert_eq!(deleted.voided_id, entry.id);

    let history = engine.entry_history(entry.id, "ada").await.unwrap();
    assert_eq!(history.len(), 2);
    let voided = &history[0];
    let reversal = &history[1];
    assert_eq!(voided.lifecycle_status, LifecycleStatus::Voided);
    assert!(voided.is_deleted);
    assert_eq!(voided.reversal_entry_id, Some(deleted.reversal_id));
    assert_eq!(reversal.id, deleted.reversal_id);
    assert_eq!(reversal.amount_minor, -2000);
    assert_eq!(reversal.kind, EntryKind::Expense);
    assert_eq!(reversal.lifecycle_status, LifecycleStatus::Reversal);
    assert_eq!(reversal.version, 2);
    assert_eq!(voided.amount_minor + reversal.amount_minor, 0);

    let active = engine
        .list_active_entries("ada", &EntryListFilter::default())
        .await
        .unwrap();
    assert!(active.is_empty());
}

#[tokio::test]
async fn versions_increase_by_one_through_updates_and_delete() {
    let (engine, _db) = engine_with_db().await;
    let mut current = engine.create_entry(income("ada", 1000)).await.unwrap();
    for amount in [1100, 1200, 1300] {
        current = engine
            .update_entry(UpdateEntryCmd::new(current.id, "ada").amount_minor(amount))
            .await
            .unwrap();
    }
    engine.delete_entry(current.id, "ada", "ada").await.unwrap();

    let versions: Vec<i32> = engine
        .entry_history(current.id, "ada")
        .await
        .unwrap()
        .iter()
        .map(|entry| entry.version)
        .collect();
    assert_eq!(versions, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn stale_version_conflicts_and_reversals_are_immutable() {
    let (engine, _db) = engine_with_db().await;
    let entry = engine.create_entry(income("ada", 1000)).await.unwrap();
    engine
        .update_entry(UpdateEntryCmd::new(entry.id, "ada").amount_minor(900))
        .await
        .unwrap();

    let err = engine
        .update_entry(UpdateEntryCmd::new(entry.id, "ada").amount_minor(800))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)), "{err:?}");

    let other = engine.create_entry(expense("ada", 300)).await.unwrap();
    let deleted = engine.delete_entry(other.id, "ada", "ada").await.unwrap();
    let err = engine
        .update_entry(UpdateEntryCmd::new(deleted.reversal_id, "ada").amount_minor(1))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)), "{err:?}");
    let err = engine
        .delete_entry(deleted.reversal_id, "ada", "ada")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)), "{err:?}");
}

#[tokio::test]
async fn foreign_or_missing_entries_are_not_found() {
    let (engine, _db) = engine_with_db().await;
    let entry = engine.create_entry(income("ada", 1000)).await.unwrap();

    let err = engine
        .update_entry(UpdateEntryCmd::new(entry.id, "grace").amount_minor(10))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::KeyNotFound(_)), "{err:?}");

    let err = engine
        .delete_entry(Uuid::new_v4(), "ada", "ada")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::KeyNotFound(_)), "{err:?}");
}

#[tokio::test]
async fn invalid_input_is_rejected_before_writing() {
    let (engine, _db) = engine_with_db().await;
    let err = engine.create_entry(income("ada", 0)).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)), "{err:?}");

    let err = engine
        .create_entry(CreateEntryCmd::new("ada", EntryKind::Income, 10, Utc::now()).category("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidName(_)), "{err:?}");

    let entry = engine.create_entry(income("ada", 1000)).await.unwrap();
    let err = engine
        .update_entry(UpdateEntryCmd::new(entry.id, "ada"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidName(_)), "{err:?}");
}

#[tokio::test]
async fn concurrent_updates_leave_one_active_version() {
    let (engine, _db) = engine_with_db().await;
    let entry = engine.create_entry(income("ada", 1000)).await.unwrap();

    let (first, second) = tokio::join!(
        engine.update_entry(UpdateEntryCmd::new(entry.id, "ada").amount_minor(1100)),
        engine.update_entry(UpdateEntryCmd::new(entry.id, "ada").amount_minor(1200)),
    );
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(EngineError::Conflict(_))))
    );

    let report = engine.check_chain(entry.id).await.unwrap();
    assert_eq!(report.active.len(), 1);
    assert!(report.is_healthy());
}

#[tokio::test]
async fn filters_and_totals_use_only_active_entries() {
    let (engine, _db) = engine_with_db().await;
    let january = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
    let february = Utc.with_ymd_and_hms(2026, 2, 15, 12, 0, 0).unwrap();

    engine
        .create_entry(
            CreateEntryCmd::new("ada", EntryKind::Income, 10_000, january)
                .category("Salary")
                .description("January salary"),
        )
        .await
        .unwrap();
    let groceries = engine
        .create_entry(
            CreateEntryCmd::new("ada", EntryKind::Expense, 2_500, january)
                .category("Café Groceries")
                .description("Market run"),
        )
        .await
        .unwrap();
    engine
        .create_entry(
            CreateEntryCmd::new("ada", EntryKind::Expense, 4_000, february)
                .category("Transport")
                .description("Fuel"),
        )
        .await
        .unwrap();
    engine
        .update_entry(UpdateEntryCmd::new(groceries.id, "ada").amount_minor(3_000))
        .await
        .unwrap();
    let voided = engine.create_entry(expense("ada", 999)).await.unwrap();
    engine.delete_entry(voided.id, "ada", "ada").await.unwrap();

    let filter = EntryListFilter::default().category("cafe groceries");
    let found = engine.list_active_entries("ada", &filter).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].amount_minor, 3_000);

    let january_only = EntryListFilter::default().range(january - Duration::days(1), february);
    let totals = engine.entry_totals("ada", &january_only).await.unwrap();
    assert_eq!(totals.income_minor, 10_000);
    assert_eq!(totals.expense_minor, 3_000);
    assert_eq!(totals.net_minor, 7_000);
    assert_eq!(totals.count, 2);

    let search = EntryListFilter::default().search("fuel");
    assert_eq!(
        engine.list_active_entries("ada", &search).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn pages_walk_every_active_entry_once() {
    let (engine, _db) = engine_with_db().await;
    for amount in 1..=5 {
        engine.create_entry(income("ada", amount * 100)).await.unwrap();
    }

    let filter = EntryListFilter::default();
    let (first, cursor) = engine
        .list_active_entries_page("ada", &filter, 2, None)
        .await
        .unwrap();
    assert_eq!(first.len(), 2);
    let cursor = cursor.unwrap();

    let (second, cursor) = engine
        .list_active_entries_page("ada", &filter, 2, Some(cursor.as_str()))
        .await
        .unwrap();
    assert_eq!(second.len(), 2);
    let (third, cursor) = engine
        .list_active_entries_page("ada", &filter, 2, cursor.as_deref())
        .await
        .unwrap();
    assert_eq!(third.len(), 1);
    assert!(cursor.is_none());

    let mut ids: Vec<Uuid> = first.iter().chain(&second).chain(&third).map(|e| e.id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5);

    let err = engine
        .list_active_entries_page("ada", &filter, 2, Some("not-a-cursor"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidCursor(_)), "{err:?}");
}

#[tokio::test]
async fn second_active_version_is_an_alerted_violation() {
    let (engine, db) = engine_with_db().await;
    let entry = engine.create_entry(income("ada", 1000)).await.unwrap();
    let v2 = engine
        .update_entry(UpdateEntryCmd::new(entry.id, "ada").amount_minor(900))
        .await
        .unwrap();

    // Simulate a lost compare-and-set: v1 flips back to active.
    execute(
        &db,
        "UPDATE ledger_entries SET lifecycle_status = 'active', superseded_by = NULL WHERE id = ?",
        vec![Value::from(entry.id.to_string())],
    )
    .await;

    let err = engine
        .update_entry(UpdateEntryCmd::new(v2.id, "ada").amount_minor(800))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvariantViolation(_)), "{err:?}");

    // The failing update rolled back: v2 is still the latest version.
    let history = engine.entry_history(entry.id, "ada").await.unwrap();
    assert_eq!(history.len(), 2);

    let alerts = engine.list_system_alerts(10).await.unwrap();
    assert!(
        alerts
            .iter()
            .any(|alert| alert.kind == AlertKind::InvariantViolation)
    );

    let err = engine.check_chain(entry.id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvariantViolation(_)), "{err:?}");
    let reports = engine.check_chains("ada").await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].active.len(), 2);
}

#[tokio::test]
async fn orphaned_chain_is_repaired_once() {
    let (engine, db) = engine_with_db().await;
    let entry = engine.create_entry(income("ada", 1000)).await.unwrap();
    let v2 = engine
        .update_entry(UpdateEntryCmd::new(entry.id, "ada").amount_minor(900))
        .await
        .unwrap();

    execute(
        &db,
        "UPDATE ledger_entries SET lifecycle_status = 'superseded' WHERE id = ?",
        vec![Value::from(v2.id.to_string())],
    )
    .await;
    assert!(engine.check_chain(entry.id).await.unwrap().is_orphaned());

    let repaired = engine
        .repair_chain(entry.id, "admin-1", "stable id migration left no active version")
        .await
        .unwrap();
    assert_eq!(repaired.id, v2.id);
    assert_eq!(repaired.lifecycle_status, LifecycleStatus::Active);
    assert!(
        repaired
            .audit_log
            .iter()
            .any(|record| record.action == AuditAction::Reactivated)
    );

    let err = engine
        .repair_chain(entry.id, "admin-1", "again")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)), "{err:?}");

    let actions = engine
        .list_admin_actions(Some(&entry.id.to_string()), 10)
        .await
        .unwrap();
    assert_eq!(actions.len(), 1);
}
