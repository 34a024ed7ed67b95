//! Integration tests for the PostgreSQL job store.
//!
//! These tests need a real database and are ignored by default. Run with:
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/crash_monitor_test cargo test --test store_postgres -- --ignored
//! ```
//!
//! The database is reset at the start of each test; never point these at
//! production data.

use chrono::{Duration, Utc};

use crash_monitor::store::{
    JobPriority, JobStore, MigrationRunner, PgJobStore, StoreError,
};

async fn fresh_store() -> PgJobStore {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for postgres integration tests");
    let store = PgJobStore::connect(&url).await.expect("connect failed");

    let runner = MigrationRunner::new(store.pool().clone());
    runner.reset_database().await.expect("reset failed");
    runner.run_migrations().await.expect("migrations failed");
    store
}

#[tokio::test]
#[ignore] // Requires a PostgreSQL database
async fn test_migrations_are_idempotent() {
    let store = fresh_store().await;
    MigrationRunner::new(store.pool().clone())
        .run_migrations()
        .await
        .expect("second run failed");
}

#[tokio::test]
#[ignore] // Requires a PostgreSQL database
async fn test_job_lifecycle() {
    let store = fresh_store().await;
    store.register_processor(1).await.unwrap();

    store.insert_job("a", 1, JobPriority::Normal).await.unwrap();
    assert_eq!(store.job_owner("a").await.unwrap(), Some(1));
    assert_eq!(store.job_owner("missing").await.unwrap(), None);

    // full row read-back, including the priority column
    store.insert_job("e", 1, JobPriority::Elevated).await.unwrap();
    let row = store.job("e").await.unwrap().expect("row exists");
    assert_eq!(row.owner, 1);
    assert_eq!(row.priority, JobPriority::Elevated);
    assert!(row.started_at.is_none());
    assert!(row.outcome.is_none());
    assert!(store.job("missing").await.unwrap().is_none());

    // duplicate uuid is rejected
    let dup = store.insert_job("a", 1, JobPriority::Normal).await;
    assert!(matches!(dup, Err(StoreError::Duplicate(_))));
}

#[tokio::test]
#[ignore] // Requires a PostgreSQL database
async fn test_liveness_partition_and_loads() {
    let store = fresh_store().await;
    store.register_processor(1).await.unwrap();
    store.register_processor(2).await.unwrap();
    store.insert_job("a", 1, JobPriority::Normal).await.unwrap();
    store.insert_job("b", 1, JobPriority::Normal).await.unwrap();

    let threshold = Utc::now() - Duration::minutes(10);
    let mut live = store.live_processors(threshold).await.unwrap();
    live.sort_unstable();
    assert_eq!(live, vec![1, 2]);
    assert!(store.dead_processors(threshold).await.unwrap().is_empty());

    let mut loads = store.processor_loads(threshold).await.unwrap();
    loads.sort_by_key(|l| l.id);
    assert_eq!(loads[0].open_jobs, 2);
    assert_eq!(loads[1].open_jobs, 0);

    // a future threshold makes everyone dead
    let future = Utc::now() + Duration::minutes(10);
    assert!(store.live_processors(future).await.unwrap().is_empty());
    assert_eq!(store.dead_processors(future).await.unwrap().len(), 2);
}

#[tokio::test]
#[ignore] // Requires a PostgreSQL database
async fn test_reassignment_is_inclusive_of_range_ends() {
    let store = fresh_store().await;
    store.register_processor(1).await.unwrap();
    store.register_processor(2).await.unwrap();
    store.insert_job("a", 1, JobPriority::Normal).await.unwrap();
    store.insert_job("b", 1, JobPriority::Normal).await.unwrap();

    let (lo, hi) = store
        .queued_range(&[1])
        .await
        .unwrap()
        .expect("jobs were queued");
    let moved = store.reassign_jobs_in_range(&[1], lo, hi, 2).await.unwrap();
    assert_eq!(moved, 2);
    assert_eq!(store.job_owner("a").await.unwrap(), Some(2));
    assert_eq!(store.job_owner("b").await.unwrap(), Some(2));
    assert_eq!(store.queued_range(&[1]).await.unwrap(), None);
}

#[tokio::test]
#[ignore] // Requires a PostgreSQL database
async fn test_priority_claims_follow_registration() {
    let store = fresh_store().await;
    store.register_processor(1).await.unwrap();

    assert!(store.add_priority_claim(1, "a").await.unwrap());
    // claiming twice is fine
    assert!(store.add_priority_claim(1, "a").await.unwrap());
    // unknown owner is reported, not an error
    assert!(!store.add_priority_claim(99, "a").await.unwrap());

    let requeued = store.requeue_priority_claims(1).await.unwrap();
    assert_eq!(requeued, 1);
    assert_eq!(
        store.pending_priority_requests().await.unwrap(),
        vec!["a".to_string()]
    );

    store.delete_priority_request("a").await.unwrap();
    assert!(store.pending_priority_requests().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore] // Requires a PostgreSQL database
async fn test_heartbeat_unknown_processor() {
    let store = fresh_store().await;
    assert!(matches!(
        store.heartbeat(42).await,
        Err(StoreError::NotFound(_))
    ));

    store.register_processor(42).await.unwrap();
    store.heartbeat(42).await.unwrap();
}
