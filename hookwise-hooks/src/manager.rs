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

//! Public entry point of the engine.

use crate::command::CommandHandler;
use crate::config::EngineConfig;
use crate::discovery::discover_hooks;
use crate::dispatcher::HookDispatcher;
use crate::error::{EngineError, EngineResult};
use crate::events::{HookContext, HookEvent};
use crate::execution::HookExecutionResult;
use crate::handlers::AsyncHookHandler;
use crate::health::{
    self, HookPerformance, HookRecommendation, PerformanceMetrics, ResourceMetrics, SystemHealth,
};
use crate::metadata::{FilenameInference, HookMetadata, MetadataInference};
use crate::registry::RegisteredHook;
use crate::scheduler::{prioritize, Scheduler};
use crate::state::HookStateStore;
use chrono::{DateTime, Utc};
use hookwise_core::{
    CacheStats, CircuitBreakerRegistry, CircuitBreakerStatus, CircuitState, PoolStats,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What a discovery pass did.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySummary {
    /// Newly registered hook identities, in discovery order.
    pub registered: Vec<String>,
    /// Identities already known from an earlier pass.
    pub already_registered: Vec<String>,
    /// Identities disabled by configuration.
    pub disabled: Vec<String>,
    /// Files that matched no event.
    pub skipped: Vec<String>,
}

/// Listing entry for a registered hook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HookSummary {
    pub id: String,
    pub handler: String,
    pub metadata: HookMetadata,
}

impl From<&RegisteredHook> for HookSummary {
    fn from(hook: &RegisteredHook) -> Self {
        Self {
            id: hook.id.clone(),
            handler: hook.handler.name().to_string(),
            metadata: hook.metadata.clone(),
        }
    }
}

/// Discovers, schedules and supervises hooks.
///
/// # Example
///
/// ```rust,ignore
/// use hookwise_hooks::{EngineConfig, HookManager, HookContext};
///
/// let config = EngineConfig::load(None)?;
/// let manager = HookManager::new(config)?;
/// manager.discover()?;
///
/// let mut context = HookContext::new();
/// context.insert("tool_name".into(), "Read".into());
/// let results = manager.execute_hooks("pre_tool_use", context).await?;
/// ```
pub struct HookManager {
    dispatcher: Arc<HookDispatcher>,
    scheduler: Scheduler,
    inference: Box<dyn MetadataInference>,
    sampling: CancellationToken,
    started_at: DateTime<Utc>,
}

impl HookManager {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        Self::with_inference(config, Box::new(FilenameInference))
    }

    /// Create a manager that infers discovered hook metadata with `inference`.
    pub fn with_inference(
        config: EngineConfig,
        inference: Box<dyn MetadataInference>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let scheduler = Scheduler::new(config.max_concurrent_hooks);
        Ok(Self {
            dispatcher: Arc::new(HookDispatcher::new(config)),
            scheduler,
            inference,
            sampling: CancellationToken::new(),
            started_at: Utc::now(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        self.dispatcher.config()
    }

    /// Scan the configured hooks directory and register what it finds.
    pub fn discover(&self) -> EngineResult<DiscoverySummary> {
        let root = self
            .config()
            .hooks_dir
            .clone()
            .ok_or(EngineError::NoHooksDir)?;
        self.discover_in(&root)
    }

    /// Scan `root` and register every hook file not registered yet. Safe to
    /// call repeatedly.
    pub fn discover_in(&self, root: &Path) -> EngineResult<DiscoverySummary> {
        let report = discover_hooks(root, self.inference.as_ref())?;
        let registry = self.dispatcher.registry();
        let mut summary = DiscoverySummary {
            skipped: report.skipped,
            ..DiscoverySummary::default()
        };

        for found in report.hooks {
            if registry.contains(&found.identity) {
                summary.already_registered.push(found.identity);
                continue;
            }
            let mut metadata = found.metadata;
            if let Some(rule) = self.config().hook_override(&found.identity) {
                if !rule.enabled {
                    tracing::debug!(hook_id = %found.identity, "Hook disabled by config");
                    summary.disabled.push(found.identity);
                    continue;
                }
                rule.apply(&mut metadata);
            }
            let handler: AsyncHookHandler =
                Arc::new(CommandHandler::new(found.identity.clone(), found.path));
            registry.register(found.identity.clone(), metadata, handler)?;
            summary.registered.push(found.identity);
        }

        tracing::info!(
            root = %root.display(),
            registered = summary.registered.len(),
            already_registered = summary.already_registered.len(),
            disabled = summary.disabled.len(),
            skipped = summary.skipped.len(),
            "Hook discovery completed"
        );
        Ok(summary)
    }

    /// Register an in-process hook. Config overrides for `id` apply here too;
    /// a hook disabled by config is skipped and `Ok(false)` returned.
    pub fn register_hook(
        &self,
        id: impl Into<String>,
        mut metadata: HookMetadata,
        handler: AsyncHookHandler,
    ) -> EngineResult<bool> {
        let id = id.into();
        if let Some(rule) = self.config().hook_override(&id) {
            if !rule.enabled {
                tracing::debug!(hook_id = %id, "Hook disabled by config");
                return Ok(false);
            }
            rule.apply(&mut metadata);
        }
        self.dispatcher.registry().register(id, metadata, handler)?;
        Ok(true)
    }

    pub fn unregister_hook(&self, id: &str) -> bool {
        self.dispatcher.registry().unregister(id).is_some()
    }

    /// All hooks in registration order.
    pub fn list_hooks(&self) -> Vec<HookSummary> {
        self.dispatcher
            .registry()
            .all()
            .iter()
            .map(HookSummary::from)
            .collect()
    }

    pub fn hook_metadata(&self, id: &str) -> Option<HookMetadata> {
        self.dispatcher.registry().metadata(id)
    }

    /// Seed registered hooks with learned estimates from `store`. Returns the
    /// number of hooks updated.
    pub fn restore_learned_state(&self, store: &HookStateStore) -> usize {
        let registry = self.dispatcher.registry();
        let mut restored = 0;
        for (id, learned) in &store.hooks {
            if registry.update_metadata(id, |meta| learned.apply(meta)) {
                restored += 1;
            }
        }
        tracing::debug!(restored, known = store.len(), "Learned hook state restored");
        restored
    }

    /// Record the learned estimates of every hook that has executed into
    /// `store`. Returns the number of hooks recorded.
    pub fn capture_learned_state(&self, store: &mut HookStateStore) -> usize {
        let mut captured = 0;
        for hook in self.dispatcher.registry().all() {
            if hook.metadata.execution_count > 0 {
                store.record(hook.id, &hook.metadata);
                captured += 1;
            }
        }
        captured
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakerRegistry {
        self.dispatcher.breakers()
    }

    /// Run every hook registered for `event_name` and return one result per
    /// hook in priority order. Hook failures are reported in the results;
    /// only an unknown event name is an error.
    pub async fn execute_hooks(
        &self,
        event_name: &str,
        context: HookContext,
    ) -> EngineResult<Vec<HookExecutionResult>> {
        let event: HookEvent = event_name.parse()?;
        Ok(self.execute_event(event, context, None).await)
    }

    /// Like [`execute_hooks`](Self::execute_hooks), but hooks still pending
    /// when `deadline` elapses are reported as timed out.
    pub async fn execute_hooks_with_deadline(
        &self,
        event_name: &str,
        context: HookContext,
        deadline: Duration,
    ) -> EngineResult<Vec<HookExecutionResult>> {
        let event: HookEvent = event_name.parse()?;
        Ok(self.execute_event(event, context, Some(deadline)).await)
    }

    pub async fn execute_event(
        &self,
        event: HookEvent,
        context: HookContext,
        deadline: Option<Duration>,
    ) -> Vec<HookExecutionResult> {
        let mut hooks = self.dispatcher.registry().hooks_for_event(event);
        if hooks.is_empty() {
            tracing::debug!(event = %event, "No hooks registered for event");
            return Vec::new();
        }
        prioritize(&mut hooks);

        tracing::debug!(event = %event, hook_count = hooks.len(), "Dispatching event to hooks");
        let results = self
            .scheduler
            .run(
                Arc::clone(&self.dispatcher),
                hooks,
                Arc::new(context),
                self.dispatcher.event_exclusion(event),
                deadline,
            )
            .await;

        let succeeded = results.iter().filter(|r| r.success).count();
        tracing::debug!(
            event = %event,
            success_count = succeeded,
            failure_count = results.len() - succeeded,
            "Event dispatch completed"
        );
        results
    }

    /// Start background resource sampling at the configured interval. `None`
    /// when sampling is disabled or unsupported on this platform. Must be
    /// called from within a tokio runtime.
    pub fn start_resource_sampling(&self) -> Option<JoinHandle<()>> {
        let interval = self.config().resource_sample_interval()?;
        let monitor = self.dispatcher.monitor();
        if !monitor.is_available() {
            tracing::debug!("Resource monitoring unavailable, sampling not started");
            return None;
        }
        Some(monitor.start_sampling(interval, self.sampling.child_token()))
    }

    /// Stop background work. Idempotent.
    pub fn shutdown(&self) {
        self.sampling.cancel();
    }

    pub fn get_performance_metrics(&self) -> PerformanceMetrics {
        let dispatcher = &self.dispatcher;
        let hooks = dispatcher
            .registry()
            .all()
            .into_iter()
            .map(|hook| {
                let circuit_state = dispatcher
                    .breakers()
                    .get(&hook.id)
                    .map(|breaker| breaker.state())
                    .unwrap_or(CircuitState::Closed);
                let performance = HookPerformance {
                    event: hook.metadata.event,
                    priority: hook.metadata.priority,
                    executions: hook.metadata.execution_count,
                    success_rate: hook.metadata.success_rate,
                    estimated_time_ms: hook.metadata.estimated_time_ms,
                    latency: dispatcher.anomalies().stats(&hook.id),
                    anomalies: dispatcher.anomalies().anomaly_count(&hook.id),
                    circuit_state,
                };
                (hook.id, performance)
            })
            .collect::<BTreeMap<_, _>>();

        PerformanceMetrics {
            registered_hooks: hooks.len(),
            executions: dispatcher.totals(),
            anomalies: dispatcher.anomalies().total_anomalies(),
            cache: dispatcher.cache().get_stats(),
            resources: ResourceMetrics {
                current: dispatcher.monitor().get_current_metrics(),
                peak: dispatcher.monitor().get_peak_metrics(),
            },
            hooks,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
        }
    }

    pub fn get_circuit_breaker_status(&self) -> BTreeMap<String, CircuitBreakerStatus> {
        self.dispatcher.breakers().statuses()
    }

    pub fn get_cache_performance(&self) -> CacheStats {
        self.dispatcher.cache().get_stats()
    }

    pub fn get_connection_pool_info(&self) -> BTreeMap<String, PoolStats> {
        self.dispatcher.pools().get_pool_stats()
    }

    pub fn check_system_health(&self) -> SystemHealth {
        let dispatcher = &self.dispatcher;
        let thresholds = &dispatcher.config().thresholds;
        let hooks = dispatcher.registry().all();
        let current = dispatcher.monitor().get_current_metrics();

        let checks = vec![
            health::check_circuit_breakers(&dispatcher.breakers().statuses(), hooks.len()),
            health::check_cache(&dispatcher.cache().get_stats()),
            health::check_connection_pools(&dispatcher.pools().get_pool_stats()),
            health::check_resources(current.as_ref(), thresholds),
            health::check_reliability(
                hooks.iter().map(|hook| (hook.id.as_str(), &hook.metadata)),
                thresholds,
            ),
        ];
        let report = SystemHealth::from_checks(checks);
        tracing::debug!(status = ?report.status, "System health checked");
        report
    }

    pub fn get_hook_recommendations(&self) -> Vec<HookRecommendation> {
        let hooks = self.dispatcher.registry().all();
        health::recommendations(
            hooks.iter().map(|hook| (hook.id.as_str(), &hook.metadata)),
            &self.config().thresholds,
        )
    }

    /// Drop cached results whose key contains `pattern` (a hook identity
    /// works), or everything when `None`. Returns the number removed.
    pub fn invalidate_hook_cache(&self, pattern: Option<&str>) -> usize {
        let removed = self.dispatcher.cache().invalidate(pattern);
        tracing::info!(pattern = ?pattern, removed, "Hook cache invalidated");
        removed
    }

    /// Close the breaker for `hook_id`, or every breaker when `None`.
    pub fn reset_circuit_breakers(&self, hook_id: Option<&str>) -> usize {
        let reset = self.dispatcher.breakers().reset(hook_id);
        tracing::info!(hook_id = ?hook_id, reset, "Circuit breakers reset");
        reset
    }
}

impl Drop for HookManager {
    fn drop(&mut self) {
        self.sampling.cancel();
    }
}
