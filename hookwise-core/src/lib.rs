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

//! Hookwise Core
//!
//! Leaf primitives shared by the hook execution engine. None of these
//! modules know anything about hooks; they are keyed by plain strings.
//!
//! - [`resilience`]: retry policy with exponential backoff and a per-key
//!   circuit breaker
//! - [`cache`]: bounded LRU result cache with per-entry TTL
//! - [`pool`]: bounded connection pools keyed by pool name
//! - [`monitor`]: process CPU / memory sampling
//! - [`anomaly`]: rolling latency history with deviation checks

pub mod anomaly;
pub mod cache;
pub mod monitor;
pub mod pool;
pub mod resilience;

pub use anomaly::{AnomalyConfig, AnomalyDetector, AnomalyVerdict, LatencyStats};
pub use cache::{CacheConfig, CacheStats, ResultCache};
pub use monitor::{ResourceMonitor, ResourceUsageSnapshot};
pub use pool::{ConnectionPool, PoolConfig, PoolError, PoolStats};
pub use resilience::{
    CircuitBreaker, CircuitBreakerRegistry, CircuitBreakerStatus, CircuitConfig, CircuitError,
    CircuitState, RetryPolicy,
};
