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

//! Resilience primitives (retry policy + circuit breaker).

mod circuit;

pub use circuit::{
    CircuitBreaker, CircuitBreakerRegistry, CircuitBreakerStatus, CircuitConfig, CircuitError,
    CircuitState,
};

use rand::random;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Exponential backoff retry policy.
///
/// The delay before retry `n` (zero based) is
/// `min(base_delay * backoff_factor^n, max_delay)`, optionally jittered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    /// Relative jitter in `[0, 1]`; 0 disables it.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    pub fn exponential() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            backoff_factor: 2.0,
            jitter: 0.0,
        }
    }

    /// A policy that runs the operation exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::exponential()
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64 * self.backoff_factor.powi(attempt as i32);
        let jittered = if self.jitter > 0.0 {
            base * (1.0 + (random::<f64>() - 0.5) * 2.0 * self.jitter)
        } else {
            base
        };
        let clamped = jittered.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_secs_f64(clamped / 1000.0)
    }

    /// Run `operation`, retrying every failure until it succeeds or the
    /// retry budget is spent. The last error is returned unchanged.
    pub async fn execute_with_retry<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_retry_if(operation, |_| true).await
    }

    /// Like [`execute_with_retry`](Self::execute_with_retry), but errors for
    /// which `should_retry` returns false are returned immediately.
    pub async fn execute_with_retry_if<F, Fut, T, E, P>(
        &self,
        mut operation: F,
        should_retry: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= self.max_retries || !should_retry(&e) {
                        return Err(e);
                    }
                    let delay = self.delay_for_attempt(attempt);
                    tracing::debug!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
