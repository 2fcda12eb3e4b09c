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

//! Hook metadata and its inference from hook identities.
//!
//! Discovered hooks carry no manifest. Their scheduling attributes are
//! derived from the identity string alone (the path relative to the hooks
//! root), by matching well-known name fragments:
//!
//! | Attribute        | Fragments                                                  |
//! |------------------|------------------------------------------------------------|
//! | event            | `session_start`, `pre_tool`, ... (file name only)          |
//! | CRITICAL         | `security`, `auth`, `secret`, `credential`, `validate`, `guard` |
//! | HIGH             | `perf`, `performance`, `cache`, `optimiz`, `monitor`        |
//! | LOW              | `notify`, `cleanup`, `debug`, `telemetry`                   |
//! | not parallel-safe| `write`, `modify`, `delete`, `update`, `format`, `commit`   |

use crate::events::HookEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Weight given to the newest observation in the rolling estimates.
const SMOOTHING: f64 = 0.1;

/// Scheduling priority class. Higher classes dispatch first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HookPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Coarse kind of work a hook performs, used for cache TTLs and pool selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookCategory {
    Network,
    VersionControl,
    Analysis,
    Mutating,
    General,
}

impl HookCategory {
    /// Connection pool name for hooks of this category.
    pub fn pool_name(&self) -> &'static str {
        match self {
            HookCategory::Network => "network",
            HookCategory::VersionControl => "version_control",
            HookCategory::Analysis => "analysis",
            HookCategory::Mutating => "mutating",
            HookCategory::General => "general",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevelopmentPhase {
    Specification,
    Design,
    Implementation,
    Testing,
    Review,
    Deployment,
}

/// Scheduling metadata for one hook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HookMetadata {
    pub event: HookEvent,
    pub priority: HookPriority,
    /// Rolling estimate of execution time in milliseconds.
    pub estimated_time_ms: f64,
    /// Exponentially weighted success rate in `[0, 1]`.
    pub success_rate: f64,
    /// Relative token/resource cost.
    pub estimated_cost: u32,
    /// Phases this hook is relevant to; missing phases weigh 0.
    #[serde(default)]
    pub phase_weights: BTreeMap<DevelopmentPhase, f64>,
    pub parallel_safe: bool,
    pub category: HookCategory,
    #[serde(default)]
    pub execution_count: u64,
}

impl HookMetadata {
    pub fn new(event: HookEvent) -> Self {
        Self {
            event,
            priority: HookPriority::Normal,
            estimated_time_ms: 10.0,
            success_rate: 1.0,
            estimated_cost: 50,
            phase_weights: BTreeMap::new(),
            parallel_safe: true,
            category: HookCategory::General,
            execution_count: 0,
        }
    }

    pub fn with_priority(mut self, priority: HookPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_estimated_time_ms(mut self, estimated_time_ms: f64) -> Self {
        self.estimated_time_ms = estimated_time_ms;
        self
    }

    pub fn with_parallel_safe(mut self, parallel_safe: bool) -> Self {
        self.parallel_safe = parallel_safe;
        self
    }

    pub fn with_category(mut self, category: HookCategory) -> Self {
        self.category = category;
        self
    }

    pub fn phase_weight(&self, phase: DevelopmentPhase) -> f64 {
        self.phase_weights.get(&phase).copied().unwrap_or(0.0)
    }

    /// Fold one observed execution into the rolling estimates.
    pub fn record_execution(&mut self, success: bool, execution_time_ms: f64) {
        let observed = if success { 1.0 } else { 0.0 };
        self.success_rate = self.success_rate * (1.0 - SMOOTHING) + observed * SMOOTHING;
        self.estimated_time_ms =
            self.estimated_time_ms * (1.0 - SMOOTHING) + execution_time_ms * SMOOTHING;
        self.execution_count += 1;
    }
}

/// Strategy deriving default metadata for a discovered hook.
pub trait MetadataInference: Send + Sync {
    /// `None` means the hook cannot be bound to any event and is not scheduled.
    fn infer(&self, identity: &str) -> Option<HookMetadata>;
}

const CRITICAL_FRAGMENTS: &[&str] = &["security", "auth", "secret", "credential", "validate", "guard"];
const HIGH_FRAGMENTS: &[&str] = &["perf", "performance", "cache", "optimiz", "monitor"];
const LOW_FRAGMENTS: &[&str] = &["notify", "cleanup", "debug", "telemetry"];
const NETWORK_FRAGMENTS: &[&str] = &["http", "api", "fetch", "webhook", "network"];
const VCS_FRAGMENTS: &[&str] = &["git", "commit", "vcs"];
const ANALYSIS_FRAGMENTS: &[&str] = &["analy", "report", "review", "summar"];
const CHEAP_FRAGMENTS: &[&str] = &["log", "read"];
const MUTATING_FRAGMENTS: &[&str] = &["write", "modify", "delete", "update", "format", "commit"];
const PHASE_FRAGMENTS: &[(&str, DevelopmentPhase)] = &[
    ("spec", DevelopmentPhase::Specification),
    ("requirement", DevelopmentPhase::Specification),
    ("design", DevelopmentPhase::Design),
    ("arch", DevelopmentPhase::Design),
    ("impl", DevelopmentPhase::Implementation),
    ("build", DevelopmentPhase::Implementation),
    ("test", DevelopmentPhase::Testing),
    ("review", DevelopmentPhase::Review),
    ("lint", DevelopmentPhase::Review),
    ("deploy", DevelopmentPhase::Deployment),
    ("release", DevelopmentPhase::Deployment),
];

// Matched in this order so `session_start` wins over the bare `stop` check.
const EVENT_ORDER: [HookEvent; 7] = [
    HookEvent::SessionStart,
    HookEvent::SessionEnd,
    HookEvent::UserPromptSubmit,
    HookEvent::PreToolUse,
    HookEvent::PostToolUse,
    HookEvent::Notification,
    HookEvent::Stop,
];

fn contains_any(haystack: &str, fragments: &[&str]) -> bool {
    fragments.iter().any(|fragment| haystack.contains(fragment))
}

/// Default inference: pure name-fragment matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilenameInference;

impl FilenameInference {
    pub fn infer_event(file_name: &str) -> Option<HookEvent> {
        let file_name = file_name.to_lowercase();
        EVENT_ORDER
            .into_iter()
            .find(|event| file_name.contains(event.file_fragment()))
    }

    pub fn infer_priority(name: &str) -> HookPriority {
        if contains_any(name, CRITICAL_FRAGMENTS) {
            HookPriority::Critical
        } else if contains_any(name, HIGH_FRAGMENTS) {
            HookPriority::High
        } else if contains_any(name, LOW_FRAGMENTS) {
            HookPriority::Low
        } else {
            HookPriority::Normal
        }
    }

    pub fn infer_category(name: &str) -> HookCategory {
        if contains_any(name, NETWORK_FRAGMENTS) {
            HookCategory::Network
        } else if contains_any(name, VCS_FRAGMENTS) {
            HookCategory::VersionControl
        } else if contains_any(name, ANALYSIS_FRAGMENTS) {
            HookCategory::Analysis
        } else if contains_any(name, MUTATING_FRAGMENTS) {
            HookCategory::Mutating
        } else {
            HookCategory::General
        }
    }

    pub fn estimate_time_ms(name: &str) -> f64 {
        if contains_any(name, NETWORK_FRAGMENTS) {
            500.0
        } else if contains_any(name, VCS_FRAGMENTS) {
            200.0
        } else if contains_any(name, ANALYSIS_FRAGMENTS) {
            100.0
        } else {
            10.0
        }
    }

    pub fn estimate_cost(name: &str) -> u32 {
        if contains_any(name, ANALYSIS_FRAGMENTS) {
            500
        } else if contains_any(name, NETWORK_FRAGMENTS) {
            200
        } else if contains_any(name, VCS_FRAGMENTS) {
            100
        } else if contains_any(name, CHEAP_FRAGMENTS) {
            10
        } else {
            50
        }
    }

    pub fn is_parallel_safe(name: &str) -> bool {
        !contains_any(name, MUTATING_FRAGMENTS)
    }

    pub fn phase_weights(name: &str) -> BTreeMap<DevelopmentPhase, f64> {
        PHASE_FRAGMENTS
            .iter()
            .filter(|(fragment, _)| name.contains(fragment))
            .map(|(_, phase)| (*phase, 1.0))
            .collect()
    }
}

impl MetadataInference for FilenameInference {
    fn infer(&self, identity: &str) -> Option<HookMetadata> {
        let file_name = identity.rsplit('/').next().unwrap_or(identity);
        let event = Self::infer_event(file_name)?;
        let name = identity.to_lowercase();

        Some(HookMetadata {
            event,
            priority: Self::infer_priority(&name),
            estimated_time_ms: Self::estimate_time_ms(&name),
            success_rate: 1.0,
            estimated_cost: Self::estimate_cost(&name),
            phase_weights: Self::phase_weights(&name),
            parallel_safe: Self::is_parallel_safe(&name),
            category: Self::infer_category(&name),
            execution_count: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn infer(identity: &str) -> HookMetadata {
        FilenameInference.infer(identity).unwrap()
    }

    #[test]
    fn test_event_inference() {
        assert_eq!(infer("session_start_init.sh").event, HookEvent::SessionStart);
        assert_eq!(infer("pre_tool_guard.py").event, HookEvent::PreToolUse);
        assert_eq!(infer("POST_TOOL_log.js").event, HookEvent::PostToolUse);
        assert_eq!(infer("user_prompt_capture.sh").event, HookEvent::UserPromptSubmit);
        assert_eq!(infer("on_stop_summary.sh").event, HookEvent::Stop);
        assert!(FilenameInference.infer("random_script.sh").is_none());
    }

    #[test]
    fn test_event_comes_from_file_name_only() {
        assert!(FilenameInference.infer("pre_tool/helper.sh").is_none());
        assert_eq!(infer("pre_tool/pre_tool_check.sh").event, HookEvent::PreToolUse);
    }

    #[test]
    fn test_priority_inference() {
        assert_eq!(infer("pre_tool_security_scan.sh").priority, HookPriority::Critical);
        assert_eq!(infer("pre_tool_validate_input.sh").priority, HookPriority::Critical);
        assert_eq!(infer("post_tool_perf_sample.sh").priority, HookPriority::High);
        assert_eq!(infer("stop_notify_user.sh").priority, HookPriority::Low);
        assert_eq!(infer("pre_tool_check.sh").priority, HookPriority::Normal);
        // Directory names count too.
        assert_eq!(infer("security/pre_tool_check.sh").priority, HookPriority::Critical);
    }

    #[test]
    fn test_time_and_cost_estimates() {
        let network = infer("post_tool_webhook.sh");
        assert_eq!(network.estimated_time_ms, 500.0);
        assert_eq!(network.estimated_cost, 200);
        assert_eq!(network.category, HookCategory::Network);

        let vcs = infer("stop_git_snapshot.sh");
        assert_eq!(vcs.estimated_time_ms, 200.0);
        assert_eq!(vcs.estimated_cost, 100);

        let analysis = infer("stop_analyze_session.py");
        assert_eq!(analysis.estimated_time_ms, 100.0);
        assert_eq!(analysis.estimated_cost, 500);

        assert_eq!(infer("post_tool_log.sh").estimated_cost, 10);
        assert_eq!(infer("pre_tool_check.sh").estimated_cost, 50);
        assert_eq!(infer("pre_tool_check.sh").estimated_time_ms, 10.0);
    }

    #[test]
    fn test_parallel_safety() {
        assert!(!infer("post_tool_format_code.sh").parallel_safe);
        assert!(!infer("stop_git_commit.sh").parallel_safe);
        assert!(infer("post_tool_read_state.sh").parallel_safe);
        assert!(infer("pre_tool_check.sh").parallel_safe);
        assert_eq!(infer("post_tool_write_file.sh").category, HookCategory::Mutating);
    }

    #[test]
    fn test_phase_weights() {
        let meta = infer("post_tool_lint_test.sh");
        assert_eq!(meta.phase_weight(DevelopmentPhase::Review), 1.0);
        assert_eq!(meta.phase_weight(DevelopmentPhase::Testing), 1.0);
        assert_eq!(meta.phase_weight(DevelopmentPhase::Deployment), 0.0);
    }

    #[test]
    fn test_record_execution_smooths() {
        let mut meta = HookMetadata::new(HookEvent::Stop).with_estimated_time_ms(100.0);
        meta.record_execution(false, 200.0);
        assert!((meta.success_rate - 0.9).abs() < 1e-9);
        assert!((meta.estimated_time_ms - 110.0).abs() < 1e-9);
        meta.record_execution(true, 100.0);
        assert!((meta.success_rate - 0.91).abs() < 1e-9);
        assert_eq!(meta.execution_count, 2);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(HookPriority::Critical > HookPriority::High);
        assert!(HookPriority::High > HookPriority::Normal);
        assert!(HookPriority::Normal > HookPriority::Low);
        assert_eq!(HookPriority::default(), HookPriority::Normal);
    }
}
