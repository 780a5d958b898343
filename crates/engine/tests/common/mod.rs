#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement, Value};

use engine::{
    ApplyDeltaCmd, CreateVasCmd, Engine, Notification, NotificationSink, NotifyError, VasKind,
    VasTransaction,
};
use migration::MigratorTrait;
use uuid::Uuid;

/// Keeps every notification so tests can assert on them.
#[derive(Debug, Default)]
pub struct RecordingSink {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.seen.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// A sink that is always down.
#[derive(Debug, Default)]
pub struct BrokenSink;

impl NotificationSink for BrokenSink {
    fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Err(NotifyError("push service unreachable".to_string()))
    }
}

pub async fn migrated_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    db
}

pub async fn engine_with_db() -> (Engine, DatabaseConnection) {
    let db = migrated_db().await;
    let engine = Engine::builder()
        .database(db.clone())
        .build()
        .await
        .unwrap();
    (engine, db)
}

pub async fn engine_with_sink() -> (Engine, DatabaseConnection, Arc<RecordingSink>) {
    let db = migrated_db().await;
    let sink = Arc::new(RecordingSink::default());
    let engine = Engine::builder()
        .database(db.clone())
        .notifier(sink.clone())
        .build()
        .await
        .unwrap();
    (engine, db, sink)
}

pub async fn execute(db: &DatabaseConnection, sql: &str, values: Vec<Value>) -> u64 {
    let backend = db.get_database_backend();
    db.execute(Statement::from_sql_and_values(backend, sql, values))
        .await
        .unwrap()
        .rows_affected()
}

/// Opens a wallet for `user_id` holding `balance_minor`.
pub async fn funded_wallet(engine: &Engine, user_id: &str, balance_minor: i64) {
    engine.open_wallet(user_id, Some(user_id)).await.unwrap();
    if balance_minor > 0 {
        engine
            .apply_delta(ApplyDeltaCmd::new(user_id, balance_minor, "funding"))
            .await
            .unwrap();
    }
}

pub async fn pending_purchase(engine: &Engine, user_id: &str, amount_minor: i64) -> VasTransaction {
    engine
        .create_vas_transaction(
            CreateVasCmd::new(user_id, VasKind::Data, amount_minor, "08030000000").plan("1GB-30D"),
        )
        .await
        .unwrap()
}

/// Moves the creation time of a transaction `minutes` into the past.
pub async fn backdate_vas(db: &DatabaseConnection, transaction_id: Uuid, minutes: i64) {
    let created_at = Utc::now() - Duration::minutes(minutes);
    let updated = execute(
        db,
        "UPDATE vas_transactions SET created_at = ?, updated_at = ? WHERE id = ?",
        vec![
            created_at.into(),
            created_at.into(),
            transaction_id.to_string().into(),
        ],
    )
    .await;
    assert_eq!(updated, 1);
}

/// Counts wallet movements booked for `transaction_id`.
pub async fn movements_for(db: &DatabaseConnection, transaction_id: Uuid) -> i64 {
    let backend = db.get_database_backend();
    let row = db
        .query_one(Statement::from_sql_and_values(
            backend,
            "SELECT COUNT(*) AS n FROM wallet_history WHERE related_transaction_id = ?",
            vec![transaction_id.to_string().into()],
        ))
        .await
        .unwrap()
        .unwrap();
    row.try_get::<i64>("", "n").unwrap()
}

/// The balance copy kept on the user profile.
pub async fn mirror_balance(db: &DatabaseConnection, user_id: &str) -> i64 {
    let backend = db.get_database_backend();
    let row = db
        .query_one(Statement::from_sql_and_values(
            backend,
            "SELECT wallet_balance_minor FROM user_profiles WHERE user_id = ?",
            vec![user_id.into()],
        ))
        .await
        .unwrap()
        .unwrap();
    row.try_get::<i64>("", "wallet_balance_minor").unwrap()
}
