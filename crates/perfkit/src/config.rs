// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Configuration for the performance primitives.
//!
//! [`PerfConfig`] groups the tunables of every component. Each section can be omitted
//! from a JSON document, in which case its defaults apply. Durations are expressed in
//! fractional seconds.
//!
//! ```
//! use std::time::Duration;
//!
//! use perfkit::config::PerfConfig;
//!
//! let config = PerfConfig::from_json_str(r#"{ "pool": { "max_connections": 4 } }"#)?;
//!
//! assert_eq!(config.pool.max_connections, 4);
//! assert_eq!(config.streaming.streaming_delay, Duration::from_millis(10));
//! # Ok::<(), perfkit::error::ConfigurationError>(())
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Complete configuration, one section per component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct PerfConfig {
    /// Cache capacities and the status snapshot time-to-live.
    pub cache: CacheConfig,
    /// Batch sizes and pacing for streamed responses.
    pub streaming: StreamingConfig,
    /// Admission pool limits.
    pub pool: PoolConfig,
    /// Slow operation reporting.
    pub monitoring: MonitoringConfig,
}

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct CacheConfig {
    /// Capacity of the general purpose API result cache.
    pub api_cache_size: usize,
    /// Capacity of the status snapshot cache.
    pub status_cache_size: usize,
    /// Maximum age of a status snapshot before it is recomputed.
    #[serde(with = "seconds")]
    pub status_cache_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            api_cache_size: 200,
            status_cache_size: 50,
            status_cache_ttl: Duration::from_secs(30),
        }
    }
}

/// Streaming emitter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct StreamingConfig {
    /// Lines per batch when tailing log files.
    pub log_batch_size: usize,
    /// Lines per batch when relaying command output.
    pub command_batch_size: usize,
    /// Pause between consecutive batches.
    #[serde(with = "seconds")]
    pub streaming_delay: Duration,
    /// Ceiling on the total duration of a single stream.
    #[serde(with = "seconds")]
    pub max_streaming_time: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            log_batch_size: 10,
            command_batch_size: 5,
            streaming_delay: Duration::from_millis(10),
            max_streaming_time: Duration::from_secs(300),
        }
    }
}

/// Admission pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of concurrently admitted holders.
    pub max_connections: usize,
    /// Default admission deadline. `None` waits until a slot frees.
    #[serde(with = "optional_seconds")]
    pub connection_timeout: Option<Duration>,
    /// Interval between admission attempts while the pool is saturated.
    #[serde(with = "seconds")]
    pub poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            connection_timeout: Some(Duration::from_secs(30)),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Slow operation reporting settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct MonitoringConfig {
    /// Emit a warning for every timed sample above `slow_operation_threshold`.
    pub log_slow_operations: bool,
    /// Samples strictly longer than this are reported as slow.
    #[serde(with = "seconds")]
    pub slow_operation_threshold: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_slow_operations: true,
            slow_operation_threshold: Duration::from_secs(1),
        }
    }
}

impl PerfConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] when the document is malformed or a limit is invalid.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigurationError::caused_by("config", "malformed JSON document", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] when the file cannot be read, is malformed, or
    /// contains an invalid limit.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::caused_by("config", format!("cannot read {}", path.display()), e))?;
        Self::from_json_str(&json)
    }

    /// Checks that every size and limit is usable.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let positive_counts = [
            ("cache.api_cache_size", self.cache.api_cache_size),
            ("cache.status_cache_size", self.cache.status_cache_size),
            ("streaming.log_batch_size", self.streaming.log_batch_size),
            ("streaming.command_batch_size", self.streaming.command_batch_size),
            ("pool.max_connections", self.pool.max_connections),
        ];

        if let Some((setting, _)) = positive_counts.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigurationError::must_be_positive(*setting));
        }

        let positive_durations = [
            ("cache.status_cache_ttl", self.cache.status_cache_ttl),
            ("streaming.max_streaming_time", self.streaming.max_streaming_time),
            ("pool.poll_interval", self.pool.poll_interval),
        ];

        if let Some((setting, _)) = positive_durations.iter().find(|(_, value)| value.is_zero()) {
            return Err(ConfigurationError::must_be_positive(*setting));
        }

        Ok(())
    }
}

pub(crate) mod seconds {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|e| D::Error::custom(format!("invalid duration of {secs} seconds: {e}")))
    }
}

mod optional_seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[expect(clippy::ref_option, reason = "signature is dictated by serde's `with` attribute")]
    pub(super) fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => super::seconds::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        #[derive(Deserialize)]
        struct Secs(#[serde(with = "super::seconds")] Duration);

        Ok(Option::<Secs>::deserialize(deserializer)?.map(|Secs(duration)| duration))
    }
}
