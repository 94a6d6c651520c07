// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for the performance primitives.
//!
//! Three error types cover the crate:
//!
//! - [`ConfigurationError`] - an invalid capacity or limit was supplied at construction time.
//!   These are fatal and are expected to surface at process start.
//! - [`PoolTimeoutError`] - pool admission was not granted before the caller's deadline.
//!   This is a transient condition and is classified as retryable.
//! - [`SourceUnavailableError`] - a streaming source could not be opened or read. The
//!   emitter converts it into a single inline error unit instead of returning it.
//!
//! Failures raised by operations wrapped in a memoizer or a timer are never converted and
//! propagate to the caller unchanged.

use std::time::Duration;

use recoverable::{Recovery, RecoveryInfo};

/// An invalid capacity, limit or configuration document.
///
/// # Examples
///
/// ```
/// use perfkit::cache::RecencyCache;
/// use tick::Clock;
///
/// # fn example(clock: Clock) {
/// let error = RecencyCache::<String, u32>::new("api_cache", 0, clock).unwrap_err();
/// assert_eq!(error.setting, "api_cache.capacity");
/// # }
/// ```
#[ohno::error]
#[display("invalid configuration for '{setting}': {reason}")]
pub struct ConfigurationError {
    /// The setting that failed validation, for example `pool.max_connections`.
    pub setting: String,
    /// Human readable description of the constraint that was violated.
    pub reason: String,
}

impl ConfigurationError {
    pub(crate) fn must_be_positive(setting: impl Into<String>) -> Self {
        Self::new(setting, "must be greater than zero")
    }
}

impl Recovery for ConfigurationError {
    fn recovery(&self) -> RecoveryInfo {
        RecoveryInfo::never()
    }
}

/// Pool admission was not granted within the caller-supplied deadline.
#[ohno::error]
#[display("no pool slot became available within {waited:?} (max_connections = {max_connections})")]
pub struct PoolTimeoutError {
    /// How long the caller waited before giving up.
    pub waited: Duration,
    /// The ceiling of the pool that rejected the caller.
    pub max_connections: usize,
    /// Suggested back-off before retrying, equal to the pool's poll interval.
    pub retry_after: Duration,
}

impl Recovery for PoolTimeoutError {
    fn recovery(&self) -> RecoveryInfo {
        RecoveryInfo::retry().delay(self.retry_after)
    }
}

/// A streaming source (log file, subprocess) could not be opened or read.
///
/// The short message (see [`ohno::ErrorExt::message`]) is a single line suitable for
/// sending to a client as the final unit of a stream.
#[ohno::error]
#[display("{message}")]
pub struct SourceUnavailableError {
    /// Short description of the source, such as a file path or a program name.
    pub source_name: String,
    /// The descriptive, single-line message.
    pub message: String,
}

impl SourceUnavailableError {
    pub(crate) fn log_not_found(path: impl Into<String>) -> Self {
        let path = path.into();
        let message = format!("log file not found: {path}");
        Self::new(path, message)
    }

    pub(crate) fn read_failed(source_name: impl Into<String>, cause: &dyn std::error::Error) -> Self {
        let source_name = source_name.into();
        let message = format!("failed to read {source_name}: {cause}");
        Self::new(source_name, message)
    }

    pub(crate) fn command_failed(program: impl Into<String>, cause: &dyn std::error::Error) -> Self {
        let program = program.into();
        Self::new(program, format!("command failed: {cause}"))
    }
}
