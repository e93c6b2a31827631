//! Integration tests for per-conversation locks
//!
//! Timing-sensitive tests run on a paused tokio clock; warnings are counted
//! with a scoped tracing subscriber.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use recall::concurrency::LockManager;
use recall::config::LockConfig;
use recall::testing::WarnCounter;
use recall::{RecallError, Scope};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

// =============================================================================
// Test Fixtures and Helpers
// =============================================================================

fn manager() -> Arc<LockManager> {
    Arc::new(LockManager::new(LockConfig::default()))
}

// =============================================================================
// Stale Holders
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_stale_holder_released_with_exactly_one_warning() {
    let counter = WarnCounter::new();
    let _subscriber = tracing_subscriber::registry()
        .with(counter.clone())
        .set_default();

    let manager = manager();
    let key = Scope::channel("g", "c").conversation_key();
    let stuck = manager.acquire(&key, "stuck").await.unwrap();

    // Several waiters queue up behind the stuck holder
    let waiters = (0..3).map(|i| {
        let manager = manager.clone();
        let key = key.clone();
        tokio::spawn(async move {
            manager
                .acquire_timeout(&key, &format!("waiter-{i}"), Duration::from_secs(900))
                .await
                .map(|guard| guard.release())
        })
    });
    let results = join_all(waiters).await;

    for result in results {
        assert!(result.unwrap().unwrap());
    }
    assert!(!stuck.is_valid());
    assert_eq!(counter.count(), 1);

    // The monitor finds nothing left to release
    assert_eq!(manager.sweep().released, 0);
    assert_eq!(counter.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_releases_abandoned_lock() {
    let counter = WarnCounter::new();
    let _subscriber = tracing_subscriber::registry()
        .with(counter.clone())
        .set_default();

    let manager = manager();
    let key = Scope::user("u1").conversation_key();
    let abandoned = manager.acquire(&key, "crashed task").await.unwrap();
    let monitor = manager.spawn_monitor();

    tokio::time::sleep(Duration::from_secs(700)).await;

    assert!(!abandoned.is_valid());
    assert!(manager.holder(&key).is_none());
    assert_eq!(counter.count(), 1);

    // Dropping the revoked guard leaves no trace
    drop(abandoned);
    assert_eq!(counter.count(), 1);
    monitor.abort();
}

#[tokio::test(start_paused = true)]
async fn test_slow_holder_is_not_revoked_before_limit() {
    let manager = manager();
    let key = Scope::guild("g").conversation_key();
    let slow = manager.acquire(&key, "slow").await.unwrap();

    tokio::time::advance(Duration::from_secs(300)).await;
    let err = manager
        .acquire_timeout(&key, "impatient", Duration::from_secs(1))
        .await
        .unwrap_err();

    assert!(matches!(err, RecallError::LockTimeout { .. }));
    assert!(err.is_retryable());
    assert!(slow.is_valid());
}

// =============================================================================
// Creation Races
// =============================================================================

#[tokio::test]
async fn test_racing_first_acquires_share_one_lock() {
    let manager = manager();
    let key = Scope::channel("g", "new").conversation_key();

    let tasks = (0..32).map(|i| {
        let manager = manager.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let guard = manager
                .acquire_timeout(&key, &format!("task-{i}"), Duration::from_secs(10))
                .await
                .unwrap();
            // Only one holder at a time
            let holder = manager.holder(&key).unwrap();
            assert_eq!(holder.owner, format!("task-{i}"));
            tokio::task::yield_now().await;
            assert!(guard.is_valid());
        })
    });

    for result in join_all(tasks).await {
        result.unwrap();
    }
    assert_eq!(manager.len(), 1);
}
