// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::path::Path;

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Disks, System};

/// Host resource utilization, each value a percentage in `0.0..=100.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SystemStats {
    /// CPU utilization across all cores.
    pub cpu_percent: f64,
    /// Share of physical memory in use.
    pub memory_percent: f64,
    /// Share of disk space in use.
    pub disk_percent: f64,
}

/// Source of [`SystemStats`] samples.
pub trait SystemProbe: Send + Sync + Debug {
    /// Takes a sample. Never fails; unavailable readings are reported as zero.
    fn sample(&self) -> SystemStats;
}

/// A [`SystemProbe`] reading the host through `sysinfo`.
///
/// CPU utilization is measured between consecutive samples, so the first sample of a new
/// probe reports zero CPU.
///
/// Disk utilization covers the disk mounted at `/` when there is one, otherwise all disks
/// combined.
#[derive(Debug)]
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl SysinfoProbe {
    /// Creates a probe.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe for SysinfoProbe {
    fn sample(&self) -> SystemStats {
        let (cpu_percent, memory_percent) = {
            let mut system = self.system.lock();
            system.refresh_cpu_usage();
            system.refresh_memory();
            (
                f64::from(system.global_cpu_usage()).clamp(0.0, 100.0),
                percent(system.used_memory(), system.total_memory()),
            )
        };

        SystemStats {
            cpu_percent,
            memory_percent,
            disk_percent: disk_percent(&Disks::new_with_refreshed_list()),
        }
    }
}

fn disk_percent(disks: &Disks) -> f64 {
    let root = disks.list().iter().find(|disk| disk.mount_point() == Path::new("/"));

    let (total, available) = match root {
        Some(disk) => (disk.total_space(), disk.available_space()),
        None => disks
            .list()
            .iter()
            .fold((0_u64, 0_u64), |(total, available), disk| {
                (total.saturating_add(disk.total_space()), available.saturating_add(disk.available_space()))
            }),
    };

    percent(total.saturating_sub(available), total)
}

#[expect(clippy::cast_precision_loss, reason = "percentages do not need full u64 precision")]
fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64) * 100.0
}
