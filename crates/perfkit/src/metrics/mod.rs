// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Operation timing and host utilization.
//!
//! [`MetricsRecorder`] collects named duration samples and reports per-name
//! [`TimerStats`]. Samples above the configured slow operation threshold are logged as
//! warnings. With the `metrics` feature, samples are also exported to an OpenTelemetry
//! histogram named `perfkit.operation.duration` (unit `s`) carrying an `operation.name`
//! attribute.
//!
//! Host utilization is read through a [`SystemProbe`]. [`SysinfoProbe`] is used unless
//! another probe is supplied.

mod recorder;
mod system;
#[cfg(any(feature = "metrics", test))]
mod telemetry;

pub use recorder::{MetricsRecorder, MetricsRecorderBuilder, MetricsSnapshot, TimedAsyncFn, TimedFn, TimerStats};
pub use system::{SysinfoProbe, SystemProbe, SystemStats};
