// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Process Resource Monitor
//!
//! Samples CPU and memory of the current process using the `sysinfo` crate.
//! The `System` handle is kept alive between samples because CPU usage is
//! computed from the delta between two refreshes.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Point-in-time process resource usage
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ResourceUsageSnapshot {
    pub cpu_percent: f32,
    pub memory_mb: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Peaks {
    cpu_percent: f32,
    memory_mb: f64,
    last_sample: Option<DateTime<Utc>>,
}

pub struct ResourceMonitor {
    system: Mutex<System>,
    pid: Option<Pid>,
    peaks: Mutex<Peaks>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(error = %e, "Current process is not observable; resource metrics disabled");
                None
            }
        };
        let monitor = Self {
            system: Mutex::new(System::new()),
            pid,
            peaks: Mutex::new(Peaks::default()),
        };
        // Prime the CPU delta so the first real sample is meaningful.
        monitor.refresh();
        monitor
    }

    /// Whether this platform can report the current process at all.
    pub fn is_available(&self) -> bool {
        self.pid.is_some()
    }

    fn refresh(&self) -> Option<(f32, u64)> {
        let pid = self.pid?;
        let mut sys = self.system.lock();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]));
        sys.process(pid)
            .map(|process| (process.cpu_usage(), process.memory()))
    }

    /// Sample the process now and fold the sample into the peak record.
    pub fn get_current_metrics(&self) -> Option<ResourceUsageSnapshot> {
        let (cpu_percent, memory_bytes) = self.refresh()?;
        let snapshot = ResourceUsageSnapshot {
            cpu_percent,
            memory_mb: memory_bytes as f64 / BYTES_PER_MB,
            timestamp: Utc::now(),
        };

        let mut peaks = self.peaks.lock();
        peaks.cpu_percent = peaks.cpu_percent.max(snapshot.cpu_percent);
        peaks.memory_mb = peaks.memory_mb.max(snapshot.memory_mb);
        peaks.last_sample = Some(snapshot.timestamp);

        Some(snapshot)
    }

    /// Highest CPU and memory observed since start. `None` until the first
    /// successful sample.
    pub fn get_peak_metrics(&self) -> Option<ResourceUsageSnapshot> {
        let peaks = *self.peaks.lock();
        peaks.last_sample.map(|timestamp| ResourceUsageSnapshot {
            cpu_percent: peaks.cpu_percent,
            memory_mb: peaks.memory_mb,
            timestamp,
        })
    }

    /// Spawn a background task that samples every `interval` until `cancel`
    /// fires. Must be called from within a tokio runtime.
    pub fn start_sampling(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Resource sampling stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if monitor.get_current_metrics().is_none() {
                            tracing::trace!("Resource sample unavailable");
                        }
                    }
                }
            }
        })
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}
