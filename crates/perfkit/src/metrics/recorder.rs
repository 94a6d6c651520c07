// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tick::{Clock, Stopwatch};

use super::system::{SysinfoProbe, SystemProbe, SystemStats};
use crate::config::MonitoringConfig;

/// Aggregate of the samples recorded under one name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimerStats {
    /// Number of samples.
    pub count: usize,
    /// Arithmetic mean of the samples.
    #[serde(rename = "avg_time", serialize_with = "crate::config::seconds::serialize")]
    pub avg: Duration,
    /// Shortest sample.
    #[serde(rename = "min_time", serialize_with = "crate::config::seconds::serialize")]
    pub min: Duration,
    /// Longest sample.
    #[serde(rename = "max_time", serialize_with = "crate::config::seconds::serialize")]
    pub max: Duration,
}

impl TimerStats {
    fn from_samples(samples: &[Duration]) -> Option<Self> {
        let min = samples.iter().min().copied()?;
        let max = samples.iter().max().copied()?;
        let total: u128 = samples.iter().map(Duration::as_nanos).sum();
        let avg_nanos = total / samples.len() as u128;

        Some(Self {
            count: samples.len(),
            avg: Duration::from_nanos(u64::try_from(avg_nanos).unwrap_or(u64::MAX)),
            min,
            max,
        })
    }
}

/// Point-in-time view of every timer plus host utilization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Per-name aggregates, ordered by name.
    pub metrics: BTreeMap<String, TimerStats>,
    /// Host utilization at the time of the snapshot.
    pub system: SystemStats,
}

/// Records named durations and aggregates them.
///
/// Samples are kept for the lifetime of the recorder; call [`reset`](Self::reset) to drop
/// them. Clones share the same samples.
///
/// Durations can be supplied in three ways:
///
/// - [`start`](Self::start) and [`stop`](Self::stop) by name. Only one pending start exists per
///   name: a second `start` before `stop` replaces the first, so overlapping timers under
///   one name are not supported.
/// - [`time`](Self::time), [`time_async`](Self::time_async) and the [`timed`](Self::timed)
///   wrappers, which measure with their own stopwatch and record even when the operation
///   fails, panics or is cancelled. These may overlap freely.
/// - [`record`](Self::record) for externally measured durations.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use perfkit::metrics::MetricsRecorder;
/// use tick::Clock;
///
/// # fn example(clock: Clock) {
/// let recorder = MetricsRecorder::new(clock);
///
/// recorder.record("query", Duration::from_millis(100));
/// recorder.record("query", Duration::from_millis(300));
///
/// assert_eq!(recorder.average("query"), Some(Duration::from_millis(200)));
/// # }
/// ```
#[derive(Clone)]
pub struct MetricsRecorder {
    inner: Arc<RecorderInner>,
}

struct RecorderInner {
    clock: Clock,
    monitoring: MonitoringConfig,
    probe: Box<dyn SystemProbe>,
    samples: Mutex<HashMap<String, Vec<Duration>>>,
    pending: Mutex<HashMap<String, Instant>>,
    #[cfg(any(feature = "metrics", test))]
    operation_duration: Option<opentelemetry::metrics::Histogram<f64>>,
}

/// Builder for [`MetricsRecorder`].
pub struct MetricsRecorderBuilder {
    clock: Clock,
    monitoring: MonitoringConfig,
    probe: Option<Box<dyn SystemProbe>>,
    #[cfg(any(feature = "metrics", test))]
    meter: Option<opentelemetry::metrics::Meter>,
}

impl MetricsRecorderBuilder {
    /// Sets the slow operation reporting policy.
    #[must_use]
    pub fn monitoring(mut self, monitoring: &MonitoringConfig) -> Self {
        self.monitoring = monitoring.clone();
        self
    }

    /// Replaces the host utilization probe. Defaults to [`SysinfoProbe`].
    #[must_use]
    pub fn probe(mut self, probe: impl SystemProbe + 'static) -> Self {
        self.probe = Some(Box::new(probe));
        self
    }

    /// Also records every sample into the `perfkit.operation.duration` histogram.
    #[cfg(any(feature = "metrics", test))]
    #[must_use]
    pub fn meter_provider(mut self, meter_provider: &dyn opentelemetry::metrics::MeterProvider) -> Self {
        self.meter = Some(super::telemetry::create_meter(meter_provider));
        self
    }

    /// Creates the recorder.
    #[must_use]
    pub fn build(self) -> MetricsRecorder {
        MetricsRecorder {
            inner: Arc::new(RecorderInner {
                clock: self.clock,
                monitoring: self.monitoring,
                probe: self.probe.unwrap_or_else(|| Box::new(SysinfoProbe::new())),
                samples: Mutex::default(),
                pending: Mutex::default(),
                #[cfg(any(feature = "metrics", test))]
                operation_duration: self.meter.as_ref().map(super::telemetry::create_operation_duration_histogram),
            }),
        }
    }
}

impl Debug for MetricsRecorderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsRecorderBuilder")
            .field("monitoring", &self.monitoring)
            .field("probe", &self.probe)
            .finish_non_exhaustive()
    }
}

impl MetricsRecorder {
    /// Creates a recorder with default monitoring and the `sysinfo` probe.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self::builder(clock).build()
    }

    /// Starts building a recorder.
    #[must_use]
    pub fn builder(clock: Clock) -> MetricsRecorderBuilder {
        MetricsRecorderBuilder {
            clock,
            monitoring: MonitoringConfig::default(),
            probe: None,
            #[cfg(any(feature = "metrics", test))]
            meter: None,
        }
    }

    /// Marks the start of an operation named `name`, replacing any pending start.
    pub fn start(&self, name: impl Into<String>) {
        let now = self.inner.clock.instant();
        self.inner.pending.lock().insert(name.into(), now);
    }

    /// Records the time since the pending start of `name`.
    ///
    /// Does nothing when `name` has no pending start.
    pub fn stop(&self, name: &str) {
        let Some(started) = self.inner.pending.lock().remove(name) else {
            tracing::trace!(operation = name, "stop without start ignored");
            return;
        };

        let elapsed = self.inner.clock.instant().saturating_duration_since(started);
        self.record(name, elapsed);
    }

    /// Records one sample for `name`.
    pub fn record(&self, name: &str, duration: Duration) {
        {
            let mut samples = self.inner.samples.lock();
            match samples.get_mut(name) {
                Some(list) => list.push(duration),
                None => {
                    samples.insert(name.to_owned(), vec![duration]);
                }
            }
        }

        let secs = duration.as_secs_f64();
        tracing::debug!(operation = name, duration_secs = secs, "{name} took {secs:.3}s");

        let monitoring = &self.inner.monitoring;
        if monitoring.log_slow_operations && duration > monitoring.slow_operation_threshold {
            tracing::warn!(
                operation = name,
                duration_secs = secs,
                threshold_secs = monitoring.slow_operation_threshold.as_secs_f64(),
                "slow operation: {name} took {secs:.3}s"
            );
        }

        #[cfg(any(feature = "metrics", test))]
        if let Some(histogram) = &self.inner.operation_duration {
            histogram.record(secs, &super::telemetry::operation_attributes(name));
        }
    }

    /// Mean of the samples recorded for `name`, or `None` without samples.
    #[must_use]
    pub fn average(&self, name: &str) -> Option<Duration> {
        self.stats(name).map(|stats| stats.avg)
    }

    /// Aggregate of the samples recorded for `name`, or `None` without samples.
    #[must_use]
    pub fn stats(&self, name: &str) -> Option<TimerStats> {
        self.inner.samples.lock().get(name).and_then(|samples| TimerStats::from_samples(samples))
    }

    /// Aggregates of every name with samples.
    #[must_use]
    pub fn all_stats(&self) -> BTreeMap<String, TimerStats> {
        self.inner
            .samples
            .lock()
            .iter()
            .filter_map(|(name, samples)| Some((name.clone(), TimerStats::from_samples(samples)?)))
            .collect()
    }

    /// Current host utilization.
    #[must_use]
    pub fn system(&self) -> SystemStats {
        self.inner.probe.sample()
    }

    /// Aggregates of every name plus host utilization.
    ///
    /// Samples recorded while the snapshot is taken may or may not be included.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            metrics: self.all_stats(),
            system: self.system(),
        }
    }

    /// Drops all samples and pending starts.
    pub fn reset(&self) {
        self.inner.samples.lock().clear();
        self.inner.pending.lock().clear();
    }

    /// Runs `f`, recording its duration under `name`.
    pub fn time<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        let _timer = TimerGuard::new(self, name);
        f()
    }

    /// Awaits `future`, recording its duration under `name`.
    ///
    /// If the returned future is dropped after it started, the time until the drop is
    /// recorded.
    pub async fn time_async<F: Future>(&self, name: &str, future: F) -> F::Output {
        let _timer = TimerGuard::new(self, name);
        future.await
    }

    /// Wraps a function so every call is timed under `name`.
    #[must_use]
    pub fn timed<F>(&self, name: impl Into<String>, f: F) -> TimedFn<F> {
        TimedFn {
            recorder: self.clone(),
            name: name.into(),
            f,
        }
    }

    /// Wraps a function returning a future so every call is timed under `name`.
    #[must_use]
    pub fn timed_async<F>(&self, name: impl Into<String>, f: F) -> TimedAsyncFn<F> {
        TimedAsyncFn {
            recorder: self.clone(),
            name: name.into(),
            f,
        }
    }
}

impl Debug for MetricsRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsRecorder")
            .field("names", &self.inner.samples.lock().len())
            .field("monitoring", &self.inner.monitoring)
            .field("probe", &self.inner.probe)
            .finish_non_exhaustive()
    }
}

struct TimerGuard<'a> {
    recorder: &'a MetricsRecorder,
    name: &'a str,
    stopwatch: Stopwatch,
}

impl<'a> TimerGuard<'a> {
    fn new(recorder: &'a MetricsRecorder, name: &'a str) -> Self {
        Self {
            recorder,
            name,
            stopwatch: recorder.inner.clock.stopwatch(),
        }
    }
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.recorder.record(self.name, self.stopwatch.elapsed());
    }
}

/// A function timed on every call.
///
/// Created by [`MetricsRecorder::timed`].
#[derive(Debug)]
pub struct TimedFn<F> {
    recorder: MetricsRecorder,
    name: String,
    f: F,
}

impl<F> TimedFn<F> {
    /// Calls the wrapped function.
    pub fn call<A, R>(&self, args: A) -> R
    where
        F: Fn(A) -> R,
    {
        self.recorder.time(&self.name, || (self.f)(args))
    }
}

/// A function returning a future, timed on every call.
///
/// Created by [`MetricsRecorder::timed_async`].
#[derive(Debug)]
pub struct TimedAsyncFn<F> {
    recorder: MetricsRecorder,
    name: String,
    f: F,
}

impl<F> TimedAsyncFn<F> {
    /// Calls the wrapped function and awaits its future.
    pub async fn call<A, Fut>(&self, args: A) -> Fut::Output
    where
        F: Fn(A) -> Fut,
        Fut: Future,
    {
        self.recorder.time_async(&self.name, (self.f)(args)).await
    }
}
