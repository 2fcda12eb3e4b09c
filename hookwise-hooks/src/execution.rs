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

//! Hook execution results.

use hookwise_core::ResourceUsageSnapshot;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded,
    Failed,
    CircuitOpen,
    Timeout,
    Cached,
}

/// Resource change observed across one hook execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ResourceDelta {
    /// Process CPU at the end of the execution.
    pub cpu_percent: f32,
    /// Change in process resident memory.
    pub memory_delta_mb: f64,
}

impl ResourceDelta {
    pub fn between(before: &ResourceUsageSnapshot, after: &ResourceUsageSnapshot) -> Self {
        Self {
            cpu_percent: after.cpu_percent,
            memory_delta_mb: after.memory_mb - before.memory_mb,
        }
    }
}

/// Result of executing a single hook for one event invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HookExecutionResult {
    pub hook_id: String,
    pub success: bool,
    pub outcome: ExecutionOutcome,
    /// Wall-clock time including retries, in milliseconds.
    pub execution_time_ms: f64,
    /// Attempts made; 0 when the hook never ran.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_usage: Option<ResourceDelta>,
    /// Execution time was anomalous relative to this hook's history.
    #[serde(default)]
    pub anomalous: bool,
}

impl HookExecutionResult {
    fn new(hook_id: impl Into<String>, outcome: ExecutionOutcome) -> Self {
        Self {
            hook_id: hook_id.into(),
            success: matches!(outcome, ExecutionOutcome::Succeeded | ExecutionOutcome::Cached),
            outcome,
            execution_time_ms: 0.0,
            attempts: 0,
            output: None,
            error: None,
            token_usage: None,
            resource_usage: None,
            anomalous: false,
        }
    }

    pub fn succeeded(
        hook_id: impl Into<String>,
        output: Option<serde_json::Value>,
        elapsed: Duration,
    ) -> Self {
        Self {
            output,
            execution_time_ms: duration_ms(elapsed),
            ..Self::new(hook_id, ExecutionOutcome::Succeeded)
        }
    }

    pub fn failed(hook_id: impl Into<String>, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            error: Some(error.into()),
            execution_time_ms: duration_ms(elapsed),
            ..Self::new(hook_id, ExecutionOutcome::Failed)
        }
    }

    pub fn timed_out(hook_id: impl Into<String>, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            error: Some(error.into()),
            execution_time_ms: duration_ms(elapsed),
            ..Self::new(hook_id, ExecutionOutcome::Timeout)
        }
    }

    /// Fast failure without an execution attempt.
    pub fn circuit_open(hook_id: impl Into<String>, retry_after: Duration) -> Self {
        Self {
            error: Some(format!(
                "Circuit open, retry after {}ms",
                retry_after.as_millis()
            )),
            ..Self::new(hook_id, ExecutionOutcome::CircuitOpen)
        }
    }

    /// Copy of a stored result served from the cache.
    pub fn to_cached(&self, elapsed: Duration) -> Self {
        Self {
            outcome: ExecutionOutcome::Cached,
            success: true,
            execution_time_ms: duration_ms(elapsed),
            attempts: 0,
            resource_usage: None,
            anomalous: false,
            ..self.clone()
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_token_usage(mut self, tokens: Option<u64>) -> Self {
        self.token_usage = tokens;
        self
    }

    pub fn with_resource_usage(mut self, usage: Option<ResourceDelta>) -> Self {
        self.resource_usage = usage;
        self
    }
}

pub(crate) fn duration_ms(elapsed: Duration) -> f64 {
    elapsed.as_micros() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_success_flags() {
        let ok = HookExecutionResult::succeeded("a", None, Duration::from_millis(5));
        assert!(ok.success);
        assert_eq!(ok.execution_time_ms, 5.0);

        let open = HookExecutionResult::circuit_open("a", Duration::from_secs(3));
        assert!(!open.success);
        assert_eq!(open.attempts, 0);
        assert!(open.error.unwrap().contains("3000ms"));

        let timeout = HookExecutionResult::timed_out("a", "deadline", Duration::ZERO);
        assert_eq!(timeout.outcome, ExecutionOutcome::Timeout);
        assert!(!timeout.success);
    }

    #[test]
    fn test_cached_copy_keeps_output() {
        let original = HookExecutionResult::succeeded(
            "a",
            Some(json!({"ok": true})),
            Duration::from_millis(250),
        )
        .with_attempts(2);
        let cached = original.to_cached(Duration::from_micros(10));

        assert_eq!(cached.outcome, ExecutionOutcome::Cached);
        assert!(cached.success);
        assert_eq!(cached.output, original.output);
        assert!(cached.execution_time_ms < 1.0);
        assert_eq!(cached.attempts, 0);
    }

    #[test]
    fn test_serializes_outcome_tag() {
        let result = HookExecutionResult::failed("a", "boom", Duration::ZERO);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["outcome"], "failed");
        assert_eq!(value["error"], "boom");
        assert!(value.get("output").is_none());
    }
}
