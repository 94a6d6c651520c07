// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The process-wide set of performance primitives.
//!
//! [`PerfCore`] is constructed once at startup and passed to the code that needs it; there
//! is no global instance. Handles obtained from it (caches, pool, recorder) are cheap clones
//! that share state with the core.

use serde_json::Value;
use tick::Clock;

use crate::cache::{CacheSize, RecencyCache};
use crate::config::PerfConfig;
use crate::error::ConfigurationError;
use crate::memo::{MemoKey, Memoize};
use crate::metrics::MetricsRecorder;
use crate::pool::ConnectionPool;
use crate::stats::PerformanceStats;
use crate::stream::BatchEmitter;

const API_CACHE: &str = "api_cache";
const STATUS_CACHE: &str = "status_cache";

/// Caches, pool, recorder and emitters built from one [`PerfConfig`].
///
/// # Examples
///
/// ```
/// use std::convert::Infallible;
///
/// use perfkit::config::PerfConfig;
/// use perfkit::core::PerfCore;
/// use serde_json::json;
/// use tick::Clock;
///
/// # async fn example(clock: Clock) -> Result<(), Box<dyn std::error::Error>> {
/// let core = PerfCore::init(PerfConfig::default(), clock)?;
///
/// let status = core.memoize_status("status").wrap(|(): ()| Ok::<_, Infallible>(json!({ "up": true })));
/// let value = core.pool().run(async { status.call(()) }).await??;
///
/// assert_eq!(value["up"], true);
/// core.shutdown();
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PerfCore {
    config: PerfConfig,
    api_cache: RecencyCache<MemoKey, Value>,
    status_cache: RecencyCache<MemoKey, Value>,
    pool: ConnectionPool,
    recorder: MetricsRecorder,
    log_emitter: BatchEmitter,
    command_emitter: BatchEmitter,
}

impl PerfCore {
    /// Validates `config` and builds every component.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] when `config` fails validation.
    pub fn init(config: PerfConfig, clock: Clock) -> Result<Self, ConfigurationError> {
        let recorder = MetricsRecorder::builder(clock.clone()).monitoring(&config.monitoring).build();
        Self::init_with_recorder(config, clock, recorder)
    }

    /// Like [`init`](Self::init), with a recorder built by the caller.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] when `config` fails validation.
    pub fn init_with_recorder(config: PerfConfig, clock: Clock, recorder: MetricsRecorder) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let core = Self {
            api_cache: RecencyCache::new(API_CACHE, config.cache.api_cache_size, clock.clone())?,
            status_cache: RecencyCache::new(STATUS_CACHE, config.cache.status_cache_size, clock.clone())?,
            pool: ConnectionPool::from_config(&config.pool, clock.clone())?,
            log_emitter: BatchEmitter::for_logs(&config.streaming, clock.clone())?,
            command_emitter: BatchEmitter::for_commands(&config.streaming, clock)?,
            recorder,
            config,
        };

        tracing::info!(
            api_cache_size = core.config.cache.api_cache_size,
            status_cache_size = core.config.cache.status_cache_size,
            max_connections = core.config.pool.max_connections,
            "performance core initialized"
        );

        Ok(core)
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &PerfConfig {
        &self.config
    }

    /// The general purpose result cache. Entries expire only by recency.
    #[must_use]
    pub fn api_cache(&self) -> &RecencyCache<MemoKey, Value> {
        &self.api_cache
    }

    /// The status snapshot cache.
    #[must_use]
    pub fn status_cache(&self) -> &RecencyCache<MemoKey, Value> {
        &self.status_cache
    }

    /// A memoizer for `name` backed by the api cache.
    #[must_use]
    pub fn memoize_api(&self, name: impl Into<String>) -> Memoize<Value> {
        Memoize::new(name, self.api_cache.clone())
    }

    /// A memoizer for `name` backed by the status cache, honoring the status time-to-live.
    #[must_use]
    pub fn memoize_status(&self, name: impl Into<String>) -> Memoize<Value> {
        Memoize::new(name, self.status_cache.clone()).ttl(self.config.cache.status_cache_ttl)
    }

    /// The admission pool.
    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// The metrics recorder.
    #[must_use]
    pub fn recorder(&self) -> &MetricsRecorder {
        &self.recorder
    }

    /// Emitter configured for log tails.
    #[must_use]
    pub fn log_emitter(&self) -> &BatchEmitter {
        &self.log_emitter
    }

    /// Emitter configured for command output.
    #[must_use]
    pub fn command_emitter(&self) -> &BatchEmitter {
        &self.command_emitter
    }

    /// Reads every component into a [`PerformanceStats`].
    #[must_use]
    pub fn stats(&self) -> PerformanceStats {
        let caches: [&dyn CacheSize; 2] = [&self.api_cache, &self.status_cache];
        PerformanceStats::collect(&self.recorder, &caches, &self.pool)
    }

    /// Logs a final summary of every timer and empties the caches.
    pub fn shutdown(self) {
        for (name, stats) in self.recorder.all_stats() {
            tracing::info!(
                operation = %name,
                count = stats.count,
                avg_secs = stats.avg.as_secs_f64(),
                min_secs = stats.min.as_secs_f64(),
                max_secs = stats.max.as_secs_f64(),
                "timer summary"
            );
        }

        self.api_cache.clear();
        self.status_cache.clear();

        tracing::info!(active_connections = self.pool.active(), "performance core shut down");
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;
    use tick::ClockControl;

    use super::*;
    use crate::testing::{FixedProbe, LogCapture};

    fn core(config: PerfConfig, clock: Clock) -> PerfCore {
        let recorder = MetricsRecorder::builder(clock.clone()).probe(FixedProbe::default()).build();
        PerfCore::init_with_recorder(config, clock, recorder).unwrap()
    }

    #[test]
    fn invalid_config_fails_init() {
        let mut config = PerfConfig::default();
        config.cache.api_cache_size = 0;

        let error = PerfCore::init(config, Clock::new_frozen()).unwrap_err();

        assert_eq!(error.setting, "cache.api_cache_size");
    }

    #[test]
    fn components_follow_configuration() {
        let mut config = PerfConfig::default();
        config.cache.api_cache_size = 7;
        config.pool.max_connections = 3;
        config.streaming.log_batch_size = 4;

        let core = core(config, Clock::new_frozen());

        assert_eq!(core.api_cache().capacity(), 7);
        assert_eq!(core.status_cache().capacity(), 50);
        assert_eq!(core.pool().max_connections(), 3);
        assert_eq!(core.log_emitter().options().batch_size(), 4);
        assert_eq!(core.command_emitter().options().batch_size(), 5);
    }

    #[test]
    fn status_memo_honors_ttl() {
        let control = ClockControl::new();
        let core = core(PerfConfig::default(), control.to_clock());
        let calls = AtomicUsize::new(0);
        let status = core.memoize_status("status").wrap(|(): ()| {
            Ok::<_, Infallible>(json!({ "call": calls.fetch_add(1, Ordering::Relaxed) }))
        });

        assert_eq!(status.call(()).unwrap()["call"], 0);
        control.advance(Duration::from_secs(10));
        assert_eq!(status.call(()).unwrap()["call"], 0);
        control.advance(Duration::from_secs(25));
        assert_eq!(status.call(()).unwrap()["call"], 1);
    }

    #[test]
    fn stats_report_cache_sizes_and_connections() {
        let core = core(PerfConfig::default(), Clock::new_frozen());
        let lookup = core.memoize_api("lookup").wrap(|id: u32| Ok::<_, Infallible>(json!(id)));
        lookup.call(1).unwrap();
        lookup.call(2).unwrap();
        let _permit = core.pool().try_acquire().unwrap();
        core.recorder().record("lookup", Duration::from_millis(5));

        let stats = core.stats();

        assert_eq!(stats.cache_sizes["api_cache"], 2);
        assert_eq!(stats.cache_sizes["status_cache"], 0);
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.metrics["lookup"].count, 1);
    }

    #[test]
    fn shutdown_logs_summary_and_clears_caches() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());
        let core = core(PerfConfig::default(), Clock::new_frozen());
        let api_cache = core.api_cache().clone();
        core.memoize_api("echo").wrap(|v: u8| Ok::<_, Infallible>(json!(v))).call(1).unwrap();
        core.recorder().record("echo", Duration::from_millis(3));

        core.shutdown();

        assert!(api_cache.is_empty());
        capture.assert_contains("timer summary");
        capture.assert_contains("operation=echo");
        capture.assert_contains("performance core shut down");
    }
}
