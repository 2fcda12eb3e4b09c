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

//! Hook Execution Engine for Agent Lifecycle Events
//!
//! Discovers hook scripts on disk, infers scheduling metadata from their
//! names, and runs every hook registered for an event under a bounded
//! worker pool. Supported events:
//!
//! - **session_start** / **session_end**
//! - **user_prompt_submit**
//! - **pre_tool_use** / **post_tool_use**
//! - **notification**
//! - **stop**
//!
//! # Architecture
//!
//! - Discovery: directory walk, identity = path relative to the hooks root
//! - Scheduling: priority order, then fastest and most reliable first
//! - Concurrency: at most `max_concurrent_hooks` hooks in flight; hooks that
//!   are not parallel-safe run alone
//! - Resilience: per-hook circuit breaker, retry with backoff, timeout,
//!   result cache keyed by hook and context fingerprint
//! - Learning: success rate and execution time are updated after every run
//!
//! # Example
//!
//! ```rust,ignore
//! use hookwise_hooks::{EngineConfig, HookManager, HookContext};
//!
//! let manager = HookManager::new(EngineConfig::from_file("hookwise.toml")?)?;
//! manager.discover()?;
//! let results = manager.execute_hooks("post_tool_use", HookContext::new()).await?;
//! for result in &results {
//!     println!("{} -> {:?}", result.hook_id, result.outcome);
//! }
//! ```

mod command;
mod config;
mod discovery;
mod dispatcher;
mod error;
mod events;
mod execution;
mod handlers;
mod health;
mod manager;
mod metadata;
mod registry;
mod scheduler;
mod state;

pub use command::CommandHandler;
pub use config::{CacheSettings, EngineConfig, HealthThresholds, HookOverride};
pub use discovery::{discover_hooks, hook_identity, DiscoveredHook, DiscoveryReport};
pub use dispatcher::{HookConnection, HookDispatcher};
pub use error::{ConfigError, DiscoveryError, EngineError, EngineResult, HookError, StateError};
pub use events::{cache_key, context_fingerprint, HookContext, HookEvent};
pub use execution::{ExecutionOutcome, HookExecutionResult, ResourceDelta};
pub use handlers::{AsyncHookHandler, FnHandler, HookHandler, HookInvocation, HookOutput, NoOpHandler};
pub use health::{
    ExecutionTotals, HealthCheck, HealthStatus, HookPerformance, HookRecommendation,
    PerformanceMetrics, RecommendationKind, ResourceMetrics, SystemHealth,
};
pub use manager::{DiscoverySummary, HookManager, HookSummary};
pub use metadata::{
    DevelopmentPhase, FilenameInference, HookCategory, HookMetadata, HookPriority,
    MetadataInference,
};
pub use registry::{HookRegistry, RegisteredHook};
pub use scheduler::{prioritize, HookRunner, Scheduler};
pub use state::{HookStateStore, LearnedHookState};
