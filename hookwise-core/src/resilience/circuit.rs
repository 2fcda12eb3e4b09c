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

//! Per-key circuit breaker.
//!
//! ```text
//!   CLOSED ──(failure_threshold consecutive failures)──► OPEN
//!     ▲                                                   │
//!     │                                       (open timeout elapsed)
//!     │                                                   ▼
//!     └──(success_threshold trial successes)──────── HALF_OPEN
//!                                                         │
//!                          any trial failure ─────────────┘──► OPEN
//! ```

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    /// Trial successes needed in HALF_OPEN before closing again.
    pub success_threshold: u32,
    pub open_timeout_ms: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout_ms: 60_000,
        }
    }
}

impl CircuitConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Error)]
pub enum CircuitError<E: std::error::Error> {
    #[error("Circuit open, retry after {retry_after:?}")]
    Open { retry_after: Duration },
    #[error("Operation failed: {0}")]
    Inner(E),
}

/// Serializable view of one breaker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

impl BreakerInner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_failure_at: None,
            trial_in_flight: false,
        }
    }

    fn open_remaining(&self, timeout: Duration) -> Duration {
        let elapsed = self.last_failure.map(|t| t.elapsed()).unwrap_or(timeout);
        timeout.saturating_sub(elapsed)
    }
}

pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    config: CircuitConfig,
}

/// Admission ticket for one call. A trial permit that is dropped without an
/// outcome (the call future was cancelled) frees the trial slot again.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        if success {
            self.breaker.record_success();
        } else {
            self.breaker.record_failure();
        }
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.inner.lock().trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            inner: Mutex::new(BreakerInner::closed()),
            config,
        }
    }

    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error,
    {
        self.call_if(operation, |_| true).await
    }

    /// Like [`call`](Self::call), but an error for which `counts_as_failure`
    /// returns false leaves the failure count untouched and only releases the
    /// admission (a half-open trial slot becomes available again).
    pub async fn call_if<F, Fut, T, E, P>(
        &self,
        operation: F,
        counts_as_failure: P,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error,
        P: FnOnce(&E) -> bool,
    {
        let permit = self
            .try_acquire()
            .map_err(|retry_after| CircuitError::Open { retry_after })?;

        let result = operation().await;
        match &result {
            Ok(_) => permit.settle(true),
            Err(e) if counts_as_failure(e) => permit.settle(false),
            Err(_) => drop(permit),
        }
        result.map_err(CircuitError::Inner)
    }

    /// Non-consuming admission check: `Err(retry_after)` while the breaker
    /// would reject a call right now.
    pub fn check(&self) -> Result<(), Duration> {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let remaining = inner.open_remaining(self.config.open_timeout());
                if remaining.is_zero() {
                    Ok(())
                } else {
                    Err(remaining)
                }
            }
            CircuitState::HalfOpen if inner.trial_in_flight => Err(Duration::ZERO),
            CircuitState::HalfOpen => Ok(()),
        }
    }

    fn try_acquire(&self) -> Result<CallPermit<'_>, Duration> {
        let mut inner = self.inner.lock();
        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let remaining = inner.open_remaining(self.config.open_timeout());
                if !remaining.is_zero() {
                    return Err(remaining);
                }
                inner.state = CircuitState::HalfOpen;
                inner.success_count = 0;
                inner.trial_in_flight = true;
                tracing::info!("Circuit half-open, permitting trial call");
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(Duration::ZERO);
                }
                inner.trial_in_flight = true;
                true
            }
        };

        Ok(CallPermit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
            inner.success_count += 1;
            if inner.success_count >= self.config.success_threshold {
                inner.state = CircuitState::Closed;
                inner.success_count = 0;
                tracing::info!("Circuit closed after successful trials");
            }
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());
        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    tracing::warn!(
                        failures = inner.failure_count,
                        open_timeout_ms = self.config.open_timeout_ms,
                        "Circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                inner.trial_in_flight = false;
                tracing::warn!("Trial call failed, circuit re-opened");
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn status(&self) -> CircuitBreakerStatus {
        let inner = self.inner.lock();
        CircuitBreakerStatus {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_at: inner.last_failure_at,
        }
    }

    /// Force the breaker back to CLOSED with cleared counters.
    pub fn reset(&self) {
        *self.inner.lock() = BreakerInner::closed();
    }

    /// Force the breaker OPEN as if the failure threshold had just been hit.
    pub fn trip(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Open;
        inner.failure_count = inner.failure_count.max(self.config.failure_threshold);
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());
        inner.trial_in_flight = false;
    }
}

/// One breaker per key, created lazily with a shared configuration.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    pub fn get_or_create(&self, key: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(key) {
            return breaker.clone();
        }
        self.breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.clone())))
            .clone()
    }

    pub fn get(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(key).map(|b| b.clone())
    }

    pub fn statuses(&self) -> BTreeMap<String, CircuitBreakerStatus> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().status()))
            .collect()
    }

    /// Reset one breaker, or every breaker when `key` is `None`.
    /// Returns how many breakers were reset.
    pub fn reset(&self, key: Option<&str>) -> usize {
        match key {
            Some(key) => match self.breakers.get(key) {
                Some(breaker) => {
                    breaker.reset();
                    1
                }
                None => 0,
            },
            None => {
                for entry in self.breakers.iter() {
                    entry.value().reset();
                }
                self.breakers.len()
            }
        }
    }

    pub fn count_in_state(&self, state: CircuitState) -> usize {
        self.breakers
            .iter()
            .filter(|entry| entry.value().state() == state)
            .count()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
