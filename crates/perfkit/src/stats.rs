// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The structured result of a performance stats query.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::cache::CacheSize;
use crate::metrics::{MetricsRecorder, SystemStats, TimerStats};
use crate::pool::ConnectionPool;

/// Host utilization, cache sizes, pool usage and timer aggregates in one serializable view.
///
/// Serialized with `serde`, the shape is:
///
/// ```json
/// {
///   "system": { "cpu_percent": 3.5, "memory_percent": 41.0, "disk_percent": 67.2 },
///   "cache_sizes": { "api_cache": 12, "status_cache": 1 },
///   "active_connections": 2,
///   "metrics": { "get_status": { "count": 4, "avg_time": 0.012, "min_time": 0.009, "max_time": 0.02 } }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceStats {
    /// Host utilization.
    pub system: SystemStats,
    /// Number of entries per cache name.
    pub cache_sizes: BTreeMap<String, usize>,
    /// Pool slots currently held.
    pub active_connections: usize,
    /// Timer aggregates per operation name.
    pub metrics: BTreeMap<String, TimerStats>,
}

impl PerformanceStats {
    /// Reads every component once.
    ///
    /// The components are read one after another, so the result is not a transactional
    /// snapshot.
    #[must_use]
    pub fn collect(recorder: &MetricsRecorder, caches: &[&dyn CacheSize], pool: &ConnectionPool) -> Self {
        let snapshot = recorder.snapshot();

        Self {
            system: snapshot.system,
            cache_sizes: caches.iter().map(|cache| (cache.name().to_owned(), cache.len())).collect(),
            active_connections: pool.active(),
            metrics: snapshot.metrics,
        }
    }
}
