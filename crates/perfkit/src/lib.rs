// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! In-process performance primitives for long-running services.
//!
//! - [`RecencyCache`]: a bounded cache with least-recently-used eviction and optional
//!   per-read maximum age.
//! - [`Memoize`]: wraps synchronous or asynchronous functions so that repeated calls with
//!   identical arguments are served from a [`RecencyCache`].
//! - [`ConnectionPool`]: caps the number of concurrent holders of a logical resource, with
//!   RAII permits and optional admission deadlines.
//! - [`BatchEmitter`]: relays log tails, command output or any line stream in fixed-size,
//!   paced batches.
//! - [`MetricsRecorder`]: named timers aggregated into count, mean, minimum and maximum,
//!   plus host utilization.
//!
//! [`PerfCore`] builds one instance of each from a [`PerfConfig`] and reports them together
//! as [`PerformanceStats`](stats::PerformanceStats).
//!
//! Time is read through an injected [`tick::Clock`], so every component can be driven
//! deterministically in tests with `tick::ClockControl`.
//!
//! # Examples
//!
//! ```
//! use std::convert::Infallible;
//!
//! use perfkit::{Memoize, RecencyCache};
//! use tick::Clock;
//!
//! # fn example(clock: Clock) -> Result<(), perfkit::ConfigurationError> {
//! let cache = RecencyCache::new("api_cache", 200, clock)?;
//! let lookup = Memoize::new("lookup", cache).wrap(|id: u32| Ok::<_, Infallible>(format!("user-{id}")));
//!
//! assert_eq!(lookup.call(7), Ok("user-7".to_string()));
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - `metrics`: export timer samples to an OpenTelemetry histogram.
//! - `test-util`: test doubles in [`testing`] and `tick`'s clock control.

pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod memo;
pub mod metrics;
pub mod pool;
pub mod stats;
pub mod stream;
#[cfg(any(feature = "test-util", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod testing;

pub use cache::RecencyCache;
pub use config::PerfConfig;
pub use crate::core::PerfCore;
pub use error::{ConfigurationError, PoolTimeoutError, SourceUnavailableError};
pub use memo::Memoize;
pub use metrics::MetricsRecorder;
pub use pool::ConnectionPool;
pub use stream::BatchEmitter;
