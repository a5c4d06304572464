//! Integration tests for loadkeeper
//!
//! These exercise the Store against a real PostgreSQL instance and
//! drive a full execution through the Executor. They require
//! `LOADKEEPER_TEST_DATABASE_URL` to point at a throwaway database and
//! are skipped otherwise, matching how the teacher's own `sqlx`-backed
//! suites gate on a live connection rather than mocking the driver.

use std::sync::Arc;

use chrono::{Duration, Utc};
use loadkeeper::crypto::EncryptionKey;
use loadkeeper::domain::{DbType, ExecutionLock, LoadStatus, Loader, PurgeStrategy, SourceDatabase};
use loadkeeper::engine::Engine;
use loadkeeper::events::EventBus;
use loadkeeper::executor::Executor;
use loadkeeper::metrics::Metrics;
use loadkeeper::registry::SourceRegistry;
use loadkeeper::store::Store;
use sqlx::postgres::PgPoolOptions;

fn test_key() -> EncryptionKey {
    EncryptionKey::from_hex("00112233445566778899aabbccddeeff00112233445566778899aabbccddee").unwrap()
}

async fn test_store() -> Option<Store> {
    let url = std::env::var("LOADKEEPER_TEST_DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new().max_connections(4).connect(&url).await.ok()?;
    let store = Store::from_pool(pool);
    store.run_migrations().await.ok()?;
    Some(store)
}

fn base_loader(loader_code: &str, source_code: &str, key: &EncryptionKey, sql: &str) -> Loader {
    let (ciphertext, nonce) = key.encrypt(sql).unwrap();
    Loader {
        loader_code: loader_code.into(),
        loader_sql_ciphertext: ciphertext,
        loader_sql_nonce: nonce,
        source_code: source_code.into(),
        min_interval_seconds: 0,
        max_interval_seconds: 60,
        max_query_period_seconds: 86_400,
        max_parallel_executions: 1,
        source_timezone_offset_hours: 0,
        aggregation_period_seconds: 60,
        purge_strategy: PurgeStrategy::FailOnDuplicate,
        enabled: true,
        load_status: LoadStatus::Idle,
        last_load_timestamp: None,
        max_ingested_timestamp: None,
        last_execution_start: None,
        last_execution_end: None,
        failed_since: None,
        failed_reason: None,
        consecutive_zero_record_runs: 0,
        consecutive_source_failures: 0,
        consecutive_sink_failures: 0,
        force_next_run: false,
        backfill_target: None,
        backfill_purge_strategy_override: None,
        backfill_max_query_period_override: None,
    }
}

#[tokio::test]
async fn lock_acquisition_is_mutually_exclusive_across_holders() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: LOADKEEPER_TEST_DATABASE_URL not set");
        return;
    };
    let key = test_key();

    let source = SourceDatabase {
        source_code: "itest_src_lock".into(),
        host: "localhost".into(),
        port: 5432,
        database_name: "app".into(),
        db_type: DbType::Postgresql,
        username: "reader".into(),
        encrypted_password_ciphertext: key.encrypt("unused").unwrap().0,
        encrypted_password_nonce: key.encrypt("unused").unwrap().1,
    };
    store.upsert_source_database(&source).await.unwrap();

    let loader = base_loader("itest_loader_lock", &source.source_code, &key, "SELECT 1");
    store.insert_loader(&loader).await.unwrap();

    let now = Utc::now();
    let first = store.try_acquire("itest_loader_lock", 0, "replica-1", "corr-1", now).await.unwrap();
    assert!(matches!(first, loadkeeper::store::LoaderAcquireOutcome::Acquired { .. }));

    let second = store.try_acquire("itest_loader_lock", 0, "replica-2", "corr-2", now).await.unwrap();
    assert!(matches!(second, loadkeeper::store::LoaderAcquireOutcome::SlotTaken));

    store.release_idle("itest_loader_lock", 0).await.unwrap();
    let third = store.try_acquire("itest_loader_lock", 0, "replica-2", "corr-3", now).await.unwrap();
    assert!(matches!(third, loadkeeper::store::LoaderAcquireOutcome::Acquired { .. }));
}

#[tokio::test]
async fn paused_loader_is_not_acquirable() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: LOADKEEPER_TEST_DATABASE_URL not set");
        return;
    };
    let key = test_key();

    let source = SourceDatabase {
        source_code: "itest_src_paused".into(),
        host: "localhost".into(),
        port: 5432,
        database_name: "app".into(),
        db_type: DbType::Postgresql,
        username: "reader".into(),
        encrypted_password_ciphertext: vec![],
        encrypted_password_nonce: key.encrypt("x").unwrap().1,
    };
    store.upsert_source_database(&source).await.unwrap();

    let mut loader = base_loader("itest_loader_paused", &source.source_code, &key, "SELECT 1");
    loader.load_status = LoadStatus::Paused;
    store.insert_loader(&loader).await.unwrap();
    // insert_loader doesn't persist load_status beyond the default; pause explicitly.
    store.pause("itest_loader_paused").await.unwrap();

    let outcome = store.try_acquire("itest_loader_paused", 0, "replica-1", "corr-1", Utc::now()).await.unwrap();
    assert!(matches!(outcome, loadkeeper::store::LoaderAcquireOutcome::NotSchedulable));
}

#[tokio::test]
async fn stale_lock_is_reaped_and_loader_marked_failed() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: LOADKEEPER_TEST_DATABASE_URL not set");
        return;
    };
    let key = test_key();

    let source = SourceDatabase {
        source_code: "itest_src_stale".into(),
        host: "localhost".into(),
        port: 5432,
        database_name: "app".into(),
        db_type: DbType::Postgresql,
        username: "reader".into(),
        encrypted_password_ciphertext: vec![],
        encrypted_password_nonce: key.encrypt("x").unwrap().1,
    };
    store.upsert_source_database(&source).await.unwrap();

    let loader = base_loader("itest_loader_stale", &source.source_code, &key, "SELECT 1");
    store.insert_loader(&loader).await.unwrap();

    let long_ago = Utc::now() - Duration::seconds(600);
    store.try_acquire("itest_loader_stale", 0, "replica-dead", "corr-1", long_ago).await.unwrap();

    let locks = store.list_locks().await.unwrap();
    let lock = locks.iter().find(|l| l.loader_code == "itest_loader_stale").unwrap();
    assert!(lock.is_stale(Utc::now(), Duration::seconds(120)));

    store.reap_stale_lock(&lock.loader_code, lock.slot, "heartbeat timeout", Utc::now()).await.unwrap();

    let reloaded = store.get_loader("itest_loader_stale").await.unwrap().unwrap();
    assert_eq!(reloaded.load_status, LoadStatus::Failed);
    assert!(store.list_locks().await.unwrap().iter().all(|l| l.loader_code != "itest_loader_stale"));
}

#[tokio::test]
async fn backfill_request_rewinds_watermark_and_sets_overrides() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: LOADKEEPER_TEST_DATABASE_URL not set");
        return;
    };
    let key = test_key();

    let source = SourceDatabase {
        source_code: "itest_src_backfill".into(),
        host: "localhost".into(),
        port: 5432,
        database_name: "app".into(),
        db_type: DbType::Postgresql,
        username: "reader".into(),
        encrypted_password_ciphertext: vec![],
        encrypted_password_nonce: key.encrypt("x").unwrap().1,
    };
    store.upsert_source_database(&source).await.unwrap();

    let mut loader = base_loader("itest_loader_backfill", &source.source_code, &key, "SELECT 1");
    loader.last_load_timestamp = Some(Utc::now());
    store.insert_loader(&loader).await.unwrap();

    let from = Utc::now() - Duration::days(30);
    let to = Utc::now() - Duration::days(25);
    store.apply_backfill("itest_loader_backfill", from, to, PurgeStrategy::PurgeAndReload).await.unwrap();

    let reloaded = store.get_loader("itest_loader_backfill").await.unwrap().unwrap();
    assert_eq!(reloaded.last_load_timestamp.unwrap().timestamp(), from.timestamp());
    assert_eq!(reloaded.backfill_target.unwrap().timestamp(), to.timestamp());
    assert_eq!(reloaded.backfill_purge_strategy_override, Some(PurgeStrategy::PurgeAndReload));
    assert!(reloaded.is_backfilling());
}

/// Exercises the Executor against a source that doesn't exist, asserting
/// the failure path persists without panicking and never leaves a lock
/// behind (even when the run never reaches the Query Runner).
#[tokio::test]
async fn executor_fails_closed_when_source_is_missing() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: LOADKEEPER_TEST_DATABASE_URL not set");
        return;
    };
    let key = test_key();

    let loader = base_loader("itest_loader_missing_source", "itest_src_does_not_exist", &key, "SELECT 1");
    store.insert_loader(&loader).await.unwrap();

    let registry = Arc::new(SourceRegistry::new(store.clone(), key.clone(), 2));
    let metrics = Arc::new(Metrics::new().unwrap());
    let events = EventBus::default();
    let executor = Executor::new(store.clone(), registry, key, metrics, events, "itest-replica".into(), 86_400, 120);

    executor.execute("itest_loader_missing_source").await;

    let reloaded = store.get_loader("itest_loader_missing_source").await.unwrap().unwrap();
    assert_eq!(reloaded.consecutive_source_failures, 1);
    assert_eq!(reloaded.load_status, LoadStatus::Idle);
    assert!(store.list_locks().await.unwrap().iter().all(|l| l.loader_code != "itest_loader_missing_source"));
}

#[test]
fn execution_lock_construction_matches_domain_contract() {
    let lock = ExecutionLock::new("A", 0, "replica-1", "corr-1", Utc::now());
    assert_eq!(lock.loader_code, "A");
    assert_eq!(lock.slot, 0);
}

#[tokio::test]
async fn engine_bootstrap_connects_and_applies_schema() {
    let Ok(url) = std::env::var("LOADKEEPER_TEST_DATABASE_URL") else {
        eprintln!("skipping: LOADKEEPER_TEST_DATABASE_URL not set");
        return;
    };
    // SAFETY-FREE: tests run single-threaded per-process for env state here
    // is fine because this is the only test reading this particular env var
    // pair; set both directly rather than via a shared fixture.
    unsafe {
        std::env::set_var("LOADKEEPER_ENCRYPTION_KEY", "00112233445566778899aabbccddeeff00112233445566778899aabbccddee");
    }
    let mut config = loadkeeper::config::Config::default();
    config.database.control_plane_url = url;
    config.database.encryption_key_env = "LOADKEEPER_ENCRYPTION_KEY".into();

    let engine = Engine::bootstrap(&config, "itest-bootstrap".into()).await.unwrap();
    assert!(engine.store.get_loader("does_not_exist").await.unwrap().is_none());
}

/// `spec.md` §8 Scenario 6: a backfill rewinds `last_load_timestamp` but
/// must not erase the fact that the territory was already ingested —
/// that's what `max_ingested_timestamp` is for.
#[tokio::test]
async fn backfill_rewinds_watermark_without_losing_the_high_water_mark() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: LOADKEEPER_TEST_DATABASE_URL not set");
        return;
    };
    let key = test_key();

    let source = SourceDatabase {
        source_code: "itest_src_hwm".into(),
        host: "localhost".into(),
        port: 5432,
        database_name: "app".into(),
        db_type: DbType::Postgresql,
        username: "reader".into(),
        encrypted_password_ciphertext: vec![],
        encrypted_password_nonce: key.encrypt("x").unwrap().1,
    };
    store.upsert_source_database(&source).await.unwrap();

    let loader = base_loader("itest_loader_hwm", &source.source_code, &key, "SELECT 1");
    store.insert_loader(&loader).await.unwrap();

    let acquired = store.try_acquire("itest_loader_hwm", 0, "replica-1", "corr-hwm-1", Utc::now()).await.unwrap();
    assert!(matches!(acquired, loadkeeper::store::LoaderAcquireOutcome::Acquired { .. }));

    let first_run_to = Utc::now();
    let committed = store
        .commit_success("itest_loader_hwm", 0, "corr-hwm-1", first_run_to, 5, Utc::now())
        .await
        .unwrap();
    assert!(committed);

    let after_first_run = store.get_loader("itest_loader_hwm").await.unwrap().unwrap();
    assert_eq!(after_first_run.last_load_timestamp.unwrap().timestamp(), first_run_to.timestamp());
    assert_eq!(after_first_run.max_ingested_timestamp.unwrap().timestamp(), first_run_to.timestamp());

    let backfill_from = first_run_to - Duration::days(10);
    let backfill_to = first_run_to - Duration::days(5);
    store
        .apply_backfill("itest_loader_hwm", backfill_from, backfill_to, PurgeStrategy::PurgeAndReload)
        .await
        .unwrap();

    let after_backfill = store.get_loader("itest_loader_hwm").await.unwrap().unwrap();
    assert_eq!(after_backfill.last_load_timestamp.unwrap().timestamp(), backfill_from.timestamp());
    // The high-water mark must survive the rewind untouched.
    assert_eq!(after_backfill.max_ingested_timestamp.unwrap().timestamp(), first_run_to.timestamp());

    let backfill_window = loadkeeper::domain::Window::new(backfill_from, backfill_to).unwrap();
    assert!(backfill_window.overlaps_ingested(after_backfill.max_ingested_timestamp.unwrap()));
}

/// `spec.md` §7 `STATE_LOST`: if the Sweeper reaps the lock while a
/// stale holder is still mid-run, that holder's eventual `commit_success`
/// must not resurrect the loader or advance the watermark out from under
/// the Sweeper's `FAILED` transition.
#[tokio::test]
async fn commit_success_reports_false_once_the_sweeper_has_reaped_the_lock() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: LOADKEEPER_TEST_DATABASE_URL not set");
        return;
    };
    let key = test_key();

    let source = SourceDatabase {
        source_code: "itest_src_state_lost".into(),
        host: "localhost".into(),
        port: 5432,
        database_name: "app".into(),
        db_type: DbType::Postgresql,
        username: "reader".into(),
        encrypted_password_ciphertext: vec![],
        encrypted_password_nonce: key.encrypt("x").unwrap().1,
    };
    store.upsert_source_database(&source).await.unwrap();

    let loader = base_loader("itest_loader_state_lost", &source.source_code, &key, "SELECT 1");
    store.insert_loader(&loader).await.unwrap();

    let long_ago = Utc::now() - Duration::seconds(600);
    store.try_acquire("itest_loader_state_lost", 0, "replica-stale", "corr-stale-1", long_ago).await.unwrap();

    // Sweeper reaps the stale lock and fails the loader, same as
    // `stale_lock_is_reaped_and_loader_marked_failed`.
    store.reap_stale_lock("itest_loader_state_lost", 0, "heartbeat timeout", Utc::now()).await.unwrap();

    let failed = store.get_loader("itest_loader_state_lost").await.unwrap().unwrap();
    assert_eq!(failed.load_status, LoadStatus::Failed);

    // The stale holder, unaware its lock is gone, finally tries to commit.
    let committed = store
        .commit_success("itest_loader_state_lost", 0, "corr-stale-1", Utc::now(), 3, Utc::now())
        .await
        .unwrap();
    assert!(!committed, "commit_success must refuse once its lock row is gone");

    let still_failed = store.get_loader("itest_loader_state_lost").await.unwrap().unwrap();
    assert_eq!(still_failed.load_status, LoadStatus::Failed, "the Sweeper's FAILED transition must survive");
    assert!(still_failed.last_load_timestamp.is_none(), "watermark must not advance for a lock the holder no longer owns");

    // commit_failure is guarded the same way.
    let update = loadkeeper::store::FailureUpdate {
        new_status: LoadStatus::Idle,
        failed_since: None,
        failed_reason: None,
        consecutive_source_failures: 0,
        consecutive_sink_failures: 0,
    };
    let committed_failure = store.commit_failure("itest_loader_state_lost", 0, "corr-stale-1", Utc::now(), update).await.unwrap();
    assert!(!committed_failure, "commit_failure must refuse once its lock row is gone");

    let final_state = store.get_loader("itest_loader_state_lost").await.unwrap().unwrap();
    assert_eq!(final_state.load_status, LoadStatus::Failed);
}

/// `spec.md` §4.2: an unrecognized `db_type` yields the mandated
/// privilege violation instead of a generic connection failure, and
/// never attempts to build a pool.
#[tokio::test]
async fn registry_refuses_unknown_db_type_without_attempting_a_connection() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: LOADKEEPER_TEST_DATABASE_URL not set");
        return;
    };
    let key = test_key();

    let source = SourceDatabase {
        source_code: "itest_src_unknown_dialect".into(),
        host: "nonexistent.invalid".into(),
        port: 1,
        database_name: "app".into(),
        db_type: DbType::Unknown,
        username: "reader".into(),
        encrypted_password_ciphertext: key.encrypt("unused").unwrap().0,
        encrypted_password_nonce: key.encrypt("unused").unwrap().1,
    };
    store.upsert_source_database(&source).await.unwrap();

    let registry = SourceRegistry::new(store.clone(), key, 2);
    let err = registry.get_connection("itest_src_unknown_dialect").await.unwrap_err();
    assert_eq!(err.kind(), "PRIVILEGE_VIOLATION");
    assert!(err.to_string().contains("Unknown DB type"));
}
