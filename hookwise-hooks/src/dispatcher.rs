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

//! Single-hook dispatch: the resilience pipeline every scheduled hook runs
//! through.
//!
//! Order per hook:
//! 1. circuit breaker admission (fail fast, no attempt)
//! 2. result cache lookup
//! 3. retry loop; each attempt borrows a pooled connection for the hook's
//!    category and runs the handler under the breaker with a timeout
//! 4. bookkeeping: anomaly detection, metadata learning, caching, counters

use crate::config::EngineConfig;
use crate::error::HookError;
use crate::events::{cache_key, HookContext, HookEvent};
use crate::execution::{HookExecutionResult, ResourceDelta};
use crate::handlers::{HookInvocation, HookOutput};
use crate::health::ExecutionTotals;
use crate::registry::{HookRegistry, RegisteredHook};
use crate::scheduler::HookRunner;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hookwise_core::{
    AnomalyDetector, CircuitBreakerRegistry, CircuitError, ConnectionPool, PoolError,
    ResourceMonitor, ResultCache,
};
use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Logical connection slot handed to a hook attempt.
#[derive(Debug, Clone)]
pub struct HookConnection {
    pub id: u64,
    pub pool: &'static str,
    pub created_at: DateTime<Utc>,
}

/// Returns its connection to the pool when dropped, so a cancelled or
/// panicking attempt cannot leak a slot.
struct PooledConnection<'a> {
    pool: &'a ConnectionPool<HookConnection>,
    conn: Option<HookConnection>,
}

impl PooledConnection<'_> {
    fn id(&self) -> Option<u64> {
        self.conn.as_ref().map(|conn| conn.id)
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.return_connection(conn.pool, conn);
        }
    }
}

#[derive(Debug, Default)]
struct ExecutionCounters {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cached: AtomicU64,
    circuit_open: AtomicU64,
    timeouts: AtomicU64,
    total_time_us: AtomicU64,
}

impl ExecutionCounters {
    fn record(&self, result: &HookExecutionResult) {
        use crate::execution::ExecutionOutcome::*;

        self.total.fetch_add(1, Ordering::Relaxed);
        let counter = match result.outcome {
            Succeeded => &self.succeeded,
            Failed => &self.failed,
            Cached => &self.cached,
            CircuitOpen => &self.circuit_open,
            Timeout => &self.timeouts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.total_time_us
            .fetch_add((result.execution_time_ms * 1000.0) as u64, Ordering::Relaxed);
    }

    fn totals(&self) -> ExecutionTotals {
        let total = self.total.load(Ordering::Relaxed);
        let total_time_us = self.total_time_us.load(Ordering::Relaxed);
        ExecutionTotals {
            total,
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cached: self.cached.load(Ordering::Relaxed),
            circuit_open: self.circuit_open.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            average_execution_ms: if total == 0 {
                0.0
            } else {
                total_time_us as f64 / total as f64 / 1000.0
            },
        }
    }
}

/// Shared engine state behind every hook execution.
///
/// # Concurrency Model
///
/// All components are internally synchronized (DashMap or parking_lot
/// guarded), so one dispatcher is shared by every scheduler worker through an
/// `Arc`. No lock is held across an `.await`.
pub struct HookDispatcher {
    registry: HookRegistry,
    breakers: CircuitBreakerRegistry,
    cache: ResultCache<HookExecutionResult>,
    pools: ConnectionPool<HookConnection>,
    monitor: Arc<ResourceMonitor>,
    anomalies: AnomalyDetector,
    config: EngineConfig,
    counters: ExecutionCounters,
    next_connection_id: AtomicU64,
    exclusions: DashMap<HookEvent, Arc<RwLock<()>>>,
}

impl HookDispatcher {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            registry: HookRegistry::new(),
            breakers: CircuitBreakerRegistry::new(config.circuit_breaker.clone()),
            cache: ResultCache::new(config.cache.cache_config()),
            pools: ConnectionPool::new(config.pool.clone()),
            monitor: Arc::new(ResourceMonitor::new()),
            anomalies: AnomalyDetector::new(config.anomaly.clone()),
            counters: ExecutionCounters::default(),
            next_connection_id: AtomicU64::new(1),
            exclusions: DashMap::new(),
            config,
        }
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn cache(&self) -> &ResultCache<HookExecutionResult> {
        &self.cache
    }

    pub fn pools(&self) -> &ConnectionPool<HookConnection> {
        &self.pools
    }

    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        &self.monitor
    }

    pub fn anomalies(&self) -> &AnomalyDetector {
        &self.anomalies
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn totals(&self) -> ExecutionTotals {
        self.counters.totals()
    }

    /// Exclusion lock shared by every invocation of `event`.
    pub fn event_exclusion(&self, event: HookEvent) -> Arc<RwLock<()>> {
        self.exclusions
            .entry(event)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    fn open_connection(&self, pool: &'static str) -> HookConnection {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(pool, connection_id = id, "Opening pooled connection");
        HookConnection {
            id,
            pool,
            created_at: Utc::now(),
        }
    }

    async fn checkout(&self, pool: &'static str) -> Result<PooledConnection<'_>, HookError> {
        let conn = self
            .pools
            .get_connection(pool, || {
                std::future::ready(Ok::<_, Infallible>(self.open_connection(pool)))
            })
            .await
            .map_err(|e| match e {
                PoolError::PoolFull { pool, .. } => HookError::PoolExhausted(pool),
                PoolError::Factory { source, .. } => match source {},
            })?;
        Ok(PooledConnection {
            pool: &self.pools,
            conn: Some(conn),
        })
    }

    /// One handler invocation bounded by the hook's timeout and the batch
    /// cancellation token.
    async fn invoke(
        &self,
        hook: &RegisteredHook,
        invocation: &HookInvocation,
        timeout: Duration,
    ) -> Result<HookOutput, HookError> {
        tokio::select! {
            result = tokio::time::timeout(timeout, hook.handler.execute(invocation)) => {
                result.unwrap_or(Err(HookError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }))
            }
            _ = invocation.cancel.cancelled() => Err(HookError::Cancelled),
        }
    }

    async fn dispatch(
        &self,
        hook: &RegisteredHook,
        context: Arc<HookContext>,
        cancel: CancellationToken,
    ) -> HookExecutionResult {
        let hook_id = hook.id.as_str();
        let breaker = self.breakers.get_or_create(hook_id);
        if let Err(retry_after) = breaker.check() {
            tracing::debug!(
                hook_id = %hook_id,
                retry_after_ms = retry_after.as_millis() as u64,
                "Circuit open, skipping hook"
            );
            return HookExecutionResult::circuit_open(hook_id, retry_after);
        }

        let lookup = Instant::now();
        let key = cache_key(hook_id, &context);
        if let Some(stored) = self.cache.get(&key) {
            tracing::debug!(hook_id = %hook_id, "Serving hook result from cache");
            return stored.to_cached(lookup.elapsed());
        }

        let timeout = self.config.timeout_for(hook_id);
        let pool = hook.metadata.category.pool_name();
        let attempts = AtomicU32::new(0);
        let before = self.monitor.get_current_metrics();
        let started = Instant::now();

        let outcome = {
            let attempts = &attempts;
            let breaker = &*breaker;
            let context = &context;
            self.config
                .retry
                .execute_with_retry_if(
                    move || {
                        let cancel = cancel.clone();
                        async move {
                            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                            if cancel.is_cancelled() {
                                return Err(CircuitError::Inner(HookError::Cancelled));
                            }
                            let conn = self.checkout(pool).await.map_err(CircuitError::Inner)?;
                            let invocation = HookInvocation {
                                attempt,
                                connection_id: conn.id(),
                                cancel,
                                ..HookInvocation::new(hook_id, hook.metadata.event, Arc::clone(context))
                            };
                            // Batch cancellation is not the hook's fault.
                            breaker
                                .call_if(
                                    || self.invoke(hook, &invocation, timeout),
                                    |e| !matches!(e, HookError::Cancelled),
                                )
                                .await
                        }
                    },
                    |e| matches!(e, CircuitError::Inner(inner) if inner.is_retryable()),
                )
                .await
        };

        let elapsed = started.elapsed();
        let attempts = attempts.load(Ordering::Relaxed);
        let cancelled = matches!(outcome, Err(CircuitError::Inner(HookError::Cancelled)));
        let usage = before
            .zip(self.monitor.get_current_metrics())
            .map(|(before, after)| ResourceDelta::between(&before, &after));

        let mut result = match outcome {
            Ok(output) => HookExecutionResult::succeeded(hook_id, output.data, elapsed)
                .with_token_usage(output.token_usage)
                .with_attempts(attempts),
            Err(CircuitError::Open { retry_after }) if attempts <= 1 => {
                return HookExecutionResult::circuit_open(hook_id, retry_after);
            }
            Err(CircuitError::Open { retry_after }) => HookExecutionResult::failed(
                hook_id,
                format!(
                    "Circuit opened after {} attempts, retry after {}ms",
                    attempts - 1,
                    retry_after.as_millis()
                ),
                elapsed,
            )
            .with_attempts(attempts - 1),
            Err(CircuitError::Inner(e @ (HookError::Timeout { .. } | HookError::Cancelled))) => {
                HookExecutionResult::timed_out(hook_id, e.to_string(), elapsed)
                    .with_attempts(attempts)
            }
            Err(CircuitError::Inner(e)) => {
                HookExecutionResult::failed(hook_id, e.to_string(), elapsed).with_attempts(attempts)
            }
        }
        .with_resource_usage(usage);

        // Batch cancellation is not the hook's fault, so it must not skew
        // learned metadata or latency history.
        if cancelled {
            return result;
        }

        let time_ms = result.execution_time_ms;
        if let Some(verdict) = self.anomalies.detect_anomaly(hook_id, time_ms) {
            if verdict.is_anomalous() {
                tracing::warn!(
                    hook_id = %hook_id,
                    execution_time_ms = time_ms,
                    ?verdict,
                    "Anomalous hook execution time"
                );
                result.anomalous = true;
            }
        }

        self.registry
            .update_metadata(hook_id, |meta| meta.record_execution(result.success, time_ms));

        if result.success {
            let ttl = self.config.cache.ttl_for(&hook.metadata);
            self.cache.put(key, result.clone(), Some(ttl));
        }

        tracing::debug!(
            hook_id = %hook_id,
            outcome = ?result.outcome,
            attempts = result.attempts,
            execution_time_ms = time_ms,
            "Hook executed"
        );
        result
    }
}

#[async_trait]
impl HookRunner for HookDispatcher {
    async fn run_hook(
        &self,
        hook: &RegisteredHook,
        context: Arc<HookContext>,
        cancel: CancellationToken,
    ) -> HookExecutionResult {
        let result = self.dispatch(hook, context, cancel).await;
        self.counters.record(&result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::HookEvent;
    use crate::execution::ExecutionOutcome;
    use crate::handlers::{AsyncHookHandler, FnHandler};
    use crate::metadata::{HookCategory, HookMetadata};
    use hookwise_core::RetryPolicy;
    use std::sync::atomic::AtomicUsize;

    fn config() -> EngineConfig {
        EngineConfig {
            retry: RetryPolicy {
                max_retries: 2,
                base_delay_ms: 1,
                max_delay_ms: 5,
                ..RetryPolicy::default()
            },
            ..EngineConfig::default()
        }
    }

    fn register(dispatcher: &HookDispatcher, id: &str, handler: AsyncHookHandler) -> RegisteredHook {
        dispatcher
            .registry()
            .register(id, HookMetadata::new(HookEvent::PreToolUse), handler)
            .unwrap();
        dispatcher.registry().get(id).unwrap()
    }

    fn flaky(failures: usize, calls: Arc<AtomicUsize>) -> AsyncHookHandler {
        Arc::new(FnHandler::new("flaky", move |_inv: HookInvocation| {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < failures {
                    Err(HookError::ExecutionFailed("transient".into()))
                } else {
                    Ok(HookOutput::with_data(serde_json::json!({"ok": true})))
                }
            }
        }))
    }

    fn ctx() -> Arc<HookContext> {
        let mut context = HookContext::new();
        context.insert("tool".into(), serde_json::json!("Read"));
        Arc::new(context)
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let dispatcher = HookDispatcher::new(config());
        let calls = Arc::new(AtomicUsize::new(0));
        let hook = register(&dispatcher, "flaky.sh", flaky(2, Arc::clone(&calls)));

        let result = dispatcher.run_hook(&hook, ctx(), CancellationToken::new()).await;
        assert!(result.success);
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let meta = dispatcher.registry().metadata("flaky.sh").unwrap();
        assert_eq!(meta.execution_count, 1);
    }

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let dispatcher = HookDispatcher::new(config());
        let calls = Arc::new(AtomicUsize::new(0));
        let hook = register(&dispatcher, "lint.sh", flaky(0, Arc::clone(&calls)));

        let first = dispatcher.run_hook(&hook, ctx(), CancellationToken::new()).await;
        let second = dispatcher.run_hook(&hook, ctx(), CancellationToken::new()).await;
        assert_eq!(first.outcome, ExecutionOutcome::Succeeded);
        assert_eq!(second.outcome, ExecutionOutcome::Cached);
        assert_eq!(second.output, first.output);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.totals().cached, 1);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_handler() {
        let dispatcher = HookDispatcher::new(config());
        let calls = Arc::new(AtomicUsize::new(0));
        let hook = register(&dispatcher, "audit.sh", flaky(0, Arc::clone(&calls)));
        dispatcher.breakers().get_or_create("audit.sh").trip();

        let result = dispatcher.run_hook(&hook, ctx(), CancellationToken::new()).await;
        assert_eq!(result.outcome, ExecutionOutcome::CircuitOpen);
        assert_eq!(result.attempts, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.registry().metadata("audit.sh").unwrap().execution_count, 0);
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let mut config = config();
        config.default_timeout_ms = 20;
        config.retry = RetryPolicy::no_retry();
        let dispatcher = HookDispatcher::new(config);
        let handler: AsyncHookHandler = Arc::new(FnHandler::new("sleepy", |_inv: HookInvocation| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(HookOutput::empty())
        }));
        let hook = register(&dispatcher, "sleepy.sh", handler);

        let result = dispatcher.run_hook(&hook, ctx(), CancellationToken::new()).await;
        assert_eq!(result.outcome, ExecutionOutcome::Timeout);
        assert!(result.error.unwrap().contains("20ms"));
        assert_eq!(dispatcher.totals().timeouts, 1);
    }

    #[tokio::test]
    async fn test_cancellation_does_not_trip_breaker() {
        let mut config = config();
        config.retry = RetryPolicy::no_retry();
        config.circuit_breaker.failure_threshold = 2;
        let dispatcher = HookDispatcher::new(config);
        let handler: AsyncHookHandler = Arc::new(FnHandler::new("slow", |_inv: HookInvocation| async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(HookOutput::empty())
        }));
        let hook = register(&dispatcher, "slow.sh", handler);

        for _ in 0..2 {
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                trigger.cancel();
            });
            let result = dispatcher.run_hook(&hook, ctx(), cancel).await;
            assert_eq!(result.outcome, ExecutionOutcome::Timeout);
        }

        let status = dispatcher.breakers().get("slow.sh").unwrap().status();
        assert_eq!(status.state, hookwise_core::CircuitState::Closed);
        assert_eq!(status.failure_count, 0);

        let result = dispatcher.run_hook(&hook, ctx(), CancellationToken::new()).await;
        assert_eq!(result.outcome, ExecutionOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_connection_returned_to_category_pool() {
        let dispatcher = HookDispatcher::new(config());
        let handler: AsyncHookHandler = Arc::new(FnHandler::new("conn", |inv: HookInvocation| async move {
            assert!(inv.connection_id.is_some());
            Ok(HookOutput::empty())
        }));
        dispatcher
            .registry()
            .register(
                "fetch.sh",
                HookMetadata::new(HookEvent::Stop).with_category(HookCategory::Network),
                handler,
            )
            .unwrap();
        let hook = dispatcher.registry().get("fetch.sh").unwrap();

        dispatcher.run_hook(&hook, ctx(), CancellationToken::new()).await;
        let stats = dispatcher.pools().get_pool_stats();
        let network = &stats[HookCategory::Network.pool_name()];
        assert_eq!(network.active, 0);
        assert_eq!(network.idle, 1);
    }
}
