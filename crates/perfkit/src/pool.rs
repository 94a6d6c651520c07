// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Admission control for externally bound work.
//!
//! [`ConnectionPool`] caps the number of callers that may hold a slot at the same time.
//! Callers that find the pool saturated wait cooperatively: they re-check the counter every
//! poll interval and suspend in between, never holding the lock while suspended.
//!
//! Admission is not first-come first-served. When a slot frees, whichever waiter polls next
//! takes it, so a waiter can be overtaken by callers that arrived later.
//!
//! Slots are represented by [`PoolPermit`] guards that release on drop. Work guarded by
//! a permit therefore releases its slot on every exit path, including errors, panics and
//! cancellation of the awaiting task.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tick::Clock;

use crate::config::PoolConfig;
use crate::error::{ConfigurationError, PoolTimeoutError};

/// A bounded pool of logical connection slots.
///
/// Clones share the same counter.
///
/// # Examples
///
/// ```
/// use perfkit::pool::ConnectionPool;
/// use tick::Clock;
///
/// # async fn example(clock: Clock) -> Result<(), Box<dyn std::error::Error>> {
/// let pool = ConnectionPool::new(2, clock)?;
///
/// let rows = pool.run(async { 42 }).await?;
///
/// assert_eq!(rows, 42);
/// assert_eq!(pool.active(), 0);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    active: Mutex<usize>,
    max_connections: usize,
    connection_timeout: Option<Duration>,
    poll_interval: Duration,
    clock: Clock,
}

impl PoolInner {
    fn try_increment(&self) -> bool {
        let mut active = self.active.lock();
        if *active < self.max_connections {
            *active += 1;
            true
        } else {
            false
        }
    }

    fn decrement(&self) {
        let mut active = self.active.lock();
        if *active == 0 {
            tracing::debug!("pool release without an active connection ignored");
        } else {
            *active -= 1;
        }
    }
}

impl ConnectionPool {
    /// Creates a pool of `max_connections` slots with default timing.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] when `max_connections` is zero.
    pub fn new(max_connections: usize, clock: Clock) -> Result<Self, ConfigurationError> {
        let config = PoolConfig {
            max_connections,
            ..PoolConfig::default()
        };
        Self::from_config(&config, clock)
    }

    /// Creates a pool from its configuration section.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] when `max_connections` or `poll_interval` is zero.
    pub fn from_config(config: &PoolConfig, clock: Clock) -> Result<Self, ConfigurationError> {
        if config.max_connections == 0 {
            return Err(ConfigurationError::must_be_positive("pool.max_connections"));
        }

        if config.poll_interval.is_zero() {
            return Err(ConfigurationError::must_be_positive("pool.poll_interval"));
        }

        Ok(Self {
            inner: Arc::new(PoolInner {
                active: Mutex::new(0),
                max_connections: config.max_connections,
                connection_timeout: config.connection_timeout,
                poll_interval: config.poll_interval,
                clock,
            }),
        })
    }

    /// Takes a slot if one is free, without waiting.
    #[must_use]
    pub fn try_acquire(&self) -> Option<PoolPermit> {
        self.inner.try_increment().then(|| PoolPermit {
            pool: Some(Arc::clone(&self.inner)),
        })
    }

    /// Waits for a slot, up to the configured connection timeout.
    ///
    /// Waits indefinitely when no connection timeout is configured.
    ///
    /// # Errors
    ///
    /// Returns a [`PoolTimeoutError`] when no slot frees within the connection timeout.
    pub async fn acquire(&self) -> Result<PoolPermit, PoolTimeoutError> {
        self.admit(self.inner.connection_timeout).await
    }

    /// Waits for a slot, up to `timeout`.
    ///
    /// A zero `timeout` makes a single attempt.
    ///
    /// # Errors
    ///
    /// Returns a [`PoolTimeoutError`] when no slot frees within `timeout`.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<PoolPermit, PoolTimeoutError> {
        self.admit(Some(timeout)).await
    }

    /// Waits for a slot for as long as it takes.
    pub async fn acquire_unbounded(&self) -> PoolPermit {
        loop {
            if let Some(permit) = self.try_acquire() {
                return permit;
            }

            self.inner.clock.delay(self.inner.poll_interval).await;
        }
    }

    /// Runs `work` while holding a slot.
    ///
    /// The slot is released when `work` completes, or when the returned future is dropped.
    ///
    /// # Errors
    ///
    /// Returns a [`PoolTimeoutError`] when no slot frees within the configured connection
    /// timeout. `work` is not started in that case.
    pub async fn run<F>(&self, work: F) -> Result<F::Output, PoolTimeoutError>
    where
        F: Future,
    {
        let _permit = self.acquire().await?;
        Ok(work.await)
    }

    /// Releases one slot that was detached with [`PoolPermit::forget`].
    ///
    /// Releasing with no active slots does nothing.
    pub fn release(&self) {
        self.inner.decrement();
    }

    /// Number of slots currently held.
    #[must_use]
    pub fn active(&self) -> usize {
        *self.inner.active.lock()
    }

    /// Number of slots currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.max_connections.saturating_sub(self.active())
    }

    /// The slot ceiling.
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.inner.max_connections
    }

    #[cfg_attr(test, mutants::skip)] // some mutations never finish
    async fn admit(&self, timeout: Option<Duration>) -> Result<PoolPermit, PoolTimeoutError> {
        let Some(timeout) = timeout else {
            return Ok(self.acquire_unbounded().await);
        };

        let stopwatch = self.inner.clock.stopwatch();
        let mut waiting = false;

        loop {
            if let Some(permit) = self.try_acquire() {
                if waiting {
                    tracing::debug!(waited = ?stopwatch.elapsed(), "pool slot acquired after waiting");
                }
                return Ok(permit);
            }

            let waited = stopwatch.elapsed();
            if waited >= timeout {
                tracing::warn!(
                    waited = ?waited,
                    max_connections = self.inner.max_connections,
                    "timed out waiting for a pool slot"
                );
                return Err(PoolTimeoutError::new(waited, self.inner.max_connections, self.inner.poll_interval));
            }

            if !waiting {
                tracing::debug!(max_connections = self.inner.max_connections, "pool saturated, waiting for a slot");
                waiting = true;
            }

            let pause = self.inner.poll_interval.min(timeout - waited);
            self.inner.clock.delay(pause).await;
        }
    }
}

/// A held pool slot. Dropping the permit frees the slot.
#[derive(Debug)]
#[must_use = "dropping the permit releases the slot immediately"]
pub struct PoolPermit {
    pool: Option<Arc<PoolInner>>,
}

impl PoolPermit {
    /// Detaches the slot from this permit.
    ///
    /// The slot stays held until [`ConnectionPool::release`] is called.
    pub fn forget(mut self) {
        self.pool = None;
    }
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.decrement();
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use recoverable::{Recovery, RecoveryKind};
    use tick::ClockControl;

    use super::*;

    fn auto_clock() -> Clock {
        ClockControl::new().auto_advance_timers(true).to_clock()
    }

    #[test]
    fn zero_connections_is_rejected() {
        let error = ConnectionPool::new(0, Clock::new_frozen()).unwrap_err();
        assert_eq!(error.setting, "pool.max_connections");
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let config = PoolConfig {
            poll_interval: Duration::ZERO,
            ..PoolConfig::default()
        };

        let error = ConnectionPool::from_config(&config, Clock::new_frozen()).unwrap_err();
        assert_eq!(error.setting, "pool.poll_interval");
    }

    #[test]
    fn try_acquire_respects_ceiling() {
        let pool = ConnectionPool::new(2, Clock::new_frozen()).unwrap();

        let first = pool.try_acquire().unwrap();
        let second = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.active(), 2);
        assert_eq!(pool.available(), 0);

        drop(first);
        assert_eq!(pool.active(), 1);
        drop(second);
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn release_is_floored_at_zero() {
        let pool = ConnectionPool::new(1, Clock::new_frozen()).unwrap();

        pool.release();
        pool.release();

        assert_eq!(pool.active(), 0);
        assert!(pool.try_acquire().is_some());
    }

    #[test]
    fn forgotten_permit_needs_manual_release() {
        let pool = ConnectionPool::new(1, Clock::new_frozen()).unwrap();

        pool.try_acquire().unwrap().forget();
        assert_eq!(pool.active(), 1);

        pool.release();
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn timeout_when_saturated() {
        let pool = ConnectionPool::new(1, auto_clock()).unwrap();
        let _held = pool.try_acquire().unwrap();

        let error = block_on(pool.acquire_timeout(Duration::from_secs(2))).unwrap_err();

        assert!(error.waited >= Duration::from_secs(2), "waited {:?}", error.waited);
        assert_eq!(error.max_connections, 1);
        assert_eq!(error.recovery().kind(), RecoveryKind::Retry);
        assert_eq!(error.recovery().get_delay(), Some(Duration::from_millis(100)));
        assert_eq!(pool.active(), 1);
    }

    #[test]
    fn zero_timeout_makes_single_attempt() {
        let pool = ConnectionPool::new(1, Clock::new_frozen()).unwrap();
        let _held = pool.try_acquire().unwrap();

        let error = block_on(pool.acquire_timeout(Duration::ZERO)).unwrap_err();
        assert_eq!(error.waited, Duration::ZERO);
    }

    #[test]
    fn run_releases_after_work() {
        let pool = ConnectionPool::new(1, Clock::new_frozen()).unwrap();

        let observed = block_on(pool.run(async { pool.active() })).unwrap();

        assert_eq!(observed, 1);
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn run_releases_after_failed_work() {
        let pool = ConnectionPool::new(1, Clock::new_frozen()).unwrap();

        let result: Result<Result<(), &str>, _> = block_on(pool.run(async { Err("boom") }));

        assert_eq!(result.unwrap(), Err("boom"));
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn run_times_out_without_starting_work() {
        let config = PoolConfig {
            max_connections: 1,
            connection_timeout: Some(Duration::from_millis(300)),
            ..PoolConfig::default()
        };
        let pool = ConnectionPool::from_config(&config, auto_clock()).unwrap();
        let _held = pool.try_acquire().unwrap();
        let mut started = false;

        let result = block_on(pool.run(async { started = true }));

        assert!(result.is_err());
        assert!(!started);
    }

    #[tokio::test]
    async fn waiter_is_admitted_after_release() {
        let clock = auto_clock();
        let pool = ConnectionPool::new(1, clock.clone()).unwrap();
        let held = pool.try_acquire().unwrap();

        let waiter = tokio::spawn({
            let pool = pool.clone();
            async move {
                let _permit = pool.acquire_unbounded().await;
                pool.active()
            }
        });

        clock.delay(Duration::from_secs(1)).await;
        assert_eq!(pool.active(), 1);
        drop(held);

        assert_eq!(waiter.await.unwrap(), 1);
        assert_eq!(pool.active(), 0);
    }

    #[tokio::test]
    async fn cancelled_holder_releases_slot() {
        let pool = ConnectionPool::new(1, auto_clock()).unwrap();

        let task = tokio::spawn({
            let pool = pool.clone();
            async move {
                pool.run(futures::future::pending::<()>()).await
            }
        });

        while pool.active() == 0 {
            tokio::task::yield_now().await;
        }

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(pool.active(), 0);
    }
}
