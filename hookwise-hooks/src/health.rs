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

//! Health checks, telemetry snapshots and tuning recommendations.
//!
//! Every check is a pure function over a snapshot of engine state, so the
//! overall status is simply the worst status among the checks.

use crate::config::HealthThresholds;
use crate::events::HookEvent;
use crate::metadata::{HookMetadata, HookPriority};
use chrono::{DateTime, Utc};
use hookwise_core::{
    CacheStats, CircuitBreakerStatus, CircuitState, LatencyStats, PoolStats, ResourceUsageSnapshot,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
}

impl HealthCheck {
    fn new(name: &str, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
    pub checked_at: DateTime<Utc>,
}

impl SystemHealth {
    pub fn from_checks(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|check| check.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self {
            status,
            checks,
            checked_at: Utc::now(),
        }
    }
}

/// Open breakers warn; half or more of all hooks open is degraded.
pub fn check_circuit_breakers(
    statuses: &BTreeMap<String, CircuitBreakerStatus>,
    hook_count: usize,
) -> HealthCheck {
    let open: Vec<&str> = statuses
        .iter()
        .filter(|(_, status)| status.state == CircuitState::Open)
        .map(|(id, _)| id.as_str())
        .collect();

    if open.is_empty() {
        return HealthCheck::new("circuit_breakers", HealthStatus::Healthy, "All circuits closed");
    }
    let status = if hook_count > 0 && open.len() * 2 >= hook_count {
        HealthStatus::Degraded
    } else {
        HealthStatus::Warning
    };
    HealthCheck::new(
        "circuit_breakers",
        status,
        format!("{} open: {}", open.len(), open.join(", ")),
    )
}

pub fn check_cache(stats: &CacheStats) -> HealthCheck {
    let message = format!(
        "{}/{} entries, hit rate {:.1}%",
        stats.size,
        stats.max_size,
        stats.hit_rate * 100.0
    );
    let status = if stats.utilization >= 0.95 {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    };
    HealthCheck::new("cache", status, message)
}

/// A pool with every connection checked out is applying back-pressure.
pub fn check_connection_pools(pools: &BTreeMap<String, PoolStats>) -> HealthCheck {
    let saturated: Vec<&str> = pools
        .iter()
        .filter(|(_, stats)| stats.max > 0 && stats.active >= stats.max)
        .map(|(name, _)| name.as_str())
        .collect();
    if saturated.is_empty() {
        HealthCheck::new(
            "connection_pools",
            HealthStatus::Healthy,
            format!("{} pools with capacity", pools.len()),
        )
    } else {
        HealthCheck::new(
            "connection_pools",
            HealthStatus::Warning,
            format!("Saturated: {}", saturated.join(", ")),
        )
    }
}

pub fn check_resources(
    current: Option<&ResourceUsageSnapshot>,
    thresholds: &HealthThresholds,
) -> HealthCheck {
    let Some(current) = current else {
        return HealthCheck::new("resources", HealthStatus::Healthy, "CPU N/A, memory N/A");
    };
    let message = format!(
        "CPU {:.1}%, memory {:.1} MB",
        current.cpu_percent, current.memory_mb
    );
    let over_cpu = current.cpu_percent > thresholds.cpu_warning_percent;
    let over_memory = current.memory_mb > thresholds.memory_warning_mb;
    let status = match (over_cpu, over_memory) {
        (true, true) => HealthStatus::Degraded,
        (true, false) | (false, true) => HealthStatus::Warning,
        (false, false) => HealthStatus::Healthy,
    };
    HealthCheck::new("resources", status, message)
}

/// Hooks that have run and fallen below the reliability threshold.
pub fn check_reliability<'a>(
    hooks: impl IntoIterator<Item = (&'a str, &'a HookMetadata)>,
    thresholds: &HealthThresholds,
) -> HealthCheck {
    let unreliable: Vec<&str> = hooks
        .into_iter()
        .filter(|(_, meta)| meta.execution_count > 0 && meta.success_rate < thresholds.min_success_rate)
        .map(|(id, _)| id)
        .collect();
    if unreliable.is_empty() {
        HealthCheck::new("hook_reliability", HealthStatus::Healthy, "All hooks reliable")
    } else {
        HealthCheck::new(
            "hook_reliability",
            HealthStatus::Warning,
            format!("Below {:.0}% success: {}", thresholds.min_success_rate * 100.0, unreliable.join(", ")),
        )
    }
}

/// Engine-wide execution counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionTotals {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cached: u64,
    pub circuit_open: u64,
    pub timeouts: u64,
    pub average_execution_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HookPerformance {
    pub event: HookEvent,
    pub priority: HookPriority,
    pub executions: u64,
    pub success_rate: f64,
    pub estimated_time_ms: f64,
    pub latency: Option<LatencyStats>,
    pub anomalies: u64,
    pub circuit_state: CircuitState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceMetrics {
    pub current: Option<ResourceUsageSnapshot>,
    pub peak: Option<ResourceUsageSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceMetrics {
    pub registered_hooks: usize,
    pub executions: ExecutionTotals,
    pub anomalies: u64,
    pub cache: CacheStats,
    pub resources: ResourceMetrics,
    pub hooks: BTreeMap<String, HookPerformance>,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    Slow,
    Unreliable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HookRecommendation {
    pub hook_id: String,
    pub kind: RecommendationKind,
    pub message: String,
    pub estimated_time_ms: f64,
    pub success_rate: f64,
}

/// Hooks estimated slower than the slow threshold, or less reliable than the
/// reliability threshold. A hook can appear once per kind.
pub fn recommendations<'a>(
    hooks: impl IntoIterator<Item = (&'a str, &'a HookMetadata)>,
    thresholds: &HealthThresholds,
) -> Vec<HookRecommendation> {
    let mut out = Vec::new();
    for (id, meta) in hooks {
        if meta.estimated_time_ms > thresholds.slow_hook_ms {
            out.push(HookRecommendation {
                hook_id: id.to_string(),
                kind: RecommendationKind::Slow,
                message: format!(
                    "Averages {:.0}ms (threshold {:.0}ms); consider caching its output or moving it off the critical path",
                    meta.estimated_time_ms, thresholds.slow_hook_ms
                ),
                estimated_time_ms: meta.estimated_time_ms,
                success_rate: meta.success_rate,
            });
        }
        if meta.success_rate < thresholds.min_success_rate {
            out.push(HookRecommendation {
                hook_id: id.to_string(),
                kind: RecommendationKind::Unreliable,
                message: format!(
                    "Success rate {:.0}% is below {:.0}%; check its error output",
                    meta.success_rate * 100.0,
                    thresholds.min_success_rate * 100.0
                ),
                estimated_time_ms: meta.estimated_time_ms,
                success_rate: meta.success_rate,
            });
        }
    }
    out
}
