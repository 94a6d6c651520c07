// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for pool admission under concurrency.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use perfkit::config::PoolConfig;
use perfkit::pool::ConnectionPool;
use recoverable::{Recovery, RecoveryKind};
use tick::ClockControl;

#[tokio::test]
async fn active_count_never_exceeds_ceiling() {
    const MAX: usize = 3;
    const WORKERS: usize = 16;

    let clock = ClockControl::new().auto_advance_timers(true).to_clock();
    let pool = ConnectionPool::new(MAX, clock).unwrap();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let pool = pool.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let completed = Arc::clone(&completed);

            tokio::spawn(async move {
                let _permit = pool.acquire_unbounded().await;
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                assert!(pool.active() <= MAX);

                for _ in 0..3 {
                    tokio::task::yield_now().await;
                }

                running.fetch_sub(1, Ordering::SeqCst);
                completed.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(completed.load(Ordering::SeqCst), WORKERS);
    assert!(peak.load(Ordering::SeqCst) <= MAX);
    assert_eq!(pool.active(), 0);
}

#[tokio::test]
async fn waiter_is_admitted_once_a_slot_frees() {
    let control = ClockControl::new();
    let pool = ConnectionPool::new(1, control.to_clock()).unwrap();
    let held = pool.try_acquire().unwrap();

    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire().await.map(|_| ()) }
    });

    tokio::task::yield_now().await;
    control.advance(Duration::from_millis(150));
    assert!(!waiter.is_finished());

    drop(held);
    control.advance(Duration::from_millis(100));

    waiter.await.unwrap().unwrap();
    assert_eq!(pool.active(), 0);
}

#[tokio::test]
async fn deadline_reports_retryable_timeout() {
    let clock = ClockControl::new().auto_advance_timers(true).to_clock();
    let mut config = PoolConfig::default();
    config.max_connections = 1;
    config.connection_timeout = Some(Duration::from_secs(2));
    let pool = ConnectionPool::from_config(&config, clock).unwrap();
    let _held = pool.try_acquire().unwrap();

    let started = AtomicUsize::new(0);
    let error = pool
        .run(async { started.fetch_add(1, Ordering::SeqCst) })
        .await
        .unwrap_err();

    assert!(error.waited >= Duration::from_secs(2));
    assert_eq!(error.max_connections, 1);
    assert_eq!(error.recovery().kind(), RecoveryKind::Retry);
    assert_eq!(started.load(Ordering::SeqCst), 0);
    assert_eq!(pool.active(), 1);
}
