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

//! Agent lifecycle events and invocation context.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Lifecycle events emitted by the host that hooks can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    /// Agent session has started.
    SessionStart,
    /// Agent session has ended.
    SessionEnd,
    /// User has submitted a prompt to the agent.
    UserPromptSubmit,
    /// Agent is about to invoke a tool.
    PreToolUse,
    /// Agent has completed a tool invocation.
    PostToolUse,
    /// Agent is stopping.
    Stop,
    /// Host notification.
    Notification,
}

impl HookEvent {
    pub const ALL: [HookEvent; 7] = [
        HookEvent::SessionStart,
        HookEvent::SessionEnd,
        HookEvent::UserPromptSubmit,
        HookEvent::PreToolUse,
        HookEvent::PostToolUse,
        HookEvent::Stop,
        HookEvent::Notification,
    ];

    /// Get the event name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::SessionStart => "session_start",
            HookEvent::SessionEnd => "session_end",
            HookEvent::UserPromptSubmit => "user_prompt_submit",
            HookEvent::PreToolUse => "pre_tool_use",
            HookEvent::PostToolUse => "post_tool_use",
            HookEvent::Stop => "stop",
            HookEvent::Notification => "notification",
        }
    }

    /// File-name fragment that binds a discovered hook to this event.
    pub fn file_fragment(&self) -> &'static str {
        match self {
            HookEvent::SessionStart => "session_start",
            HookEvent::SessionEnd => "session_end",
            HookEvent::UserPromptSubmit => "user_prompt",
            HookEvent::PreToolUse => "pre_tool",
            HookEvent::PostToolUse => "post_tool",
            HookEvent::Stop => "stop",
            HookEvent::Notification => "notification",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookEvent {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        HookEvent::ALL
            .into_iter()
            .find(|event| event.as_str() == normalized)
            .ok_or_else(|| EngineError::UnknownEvent(s.to_string()))
    }
}

/// Key/value context handed to every hook of an event invocation.
///
/// A `BTreeMap` keeps keys sorted, so serializing a context is canonical.
pub type HookContext = BTreeMap<String, serde_json::Value>;

/// Stable fingerprint of a context: blake3 over its canonical JSON encoding.
pub fn context_fingerprint(context: &HookContext) -> String {
    let mut hasher = blake3::Hasher::new();
    // Serializing a BTreeMap of JSON values cannot fail.
    if let Ok(bytes) = serde_json::to_vec(context) {
        hasher.update(&bytes);
    }
    hex::encode(hasher.finalize().as_bytes())
}

/// Result cache key for one `(hook, context)` pair.
///
/// The hook identity is kept in clear so cache invalidation can match on it.
pub fn cache_key(hook_id: &str, context: &HookContext) -> String {
    format!("{}#{}", hook_id, context_fingerprint(context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_round_trip_names() {
        for event in HookEvent::ALL {
            assert_eq!(event.as_str().parse::<HookEvent>().unwrap(), event);
            assert_eq!(event.to_string(), event.as_str());
        }
        assert_eq!("Pre-Tool-Use".parse::<HookEvent>().unwrap(), HookEvent::PreToolUse);
        assert!(matches!(
            "bogus".parse::<HookEvent>(),
            Err(EngineError::UnknownEvent(name)) if name == "bogus"
        ));
    }

    #[test]
    fn test_event_serde_is_snake_case() {
        let json = serde_json::to_string(&HookEvent::UserPromptSubmit).unwrap();
        assert_eq!(json, "\"user_prompt_submit\"");
    }

    #[test]
    fn test_fingerprint_ignores_insertion_order() {
        let mut a = HookContext::new();
        a.insert("tool".into(), json!("Write"));
        a.insert("path".into(), json!("src/main.rs"));

        let mut b = HookContext::new();
        b.insert("path".into(), json!("src/main.rs"));
        b.insert("tool".into(), json!("Write"));

        assert_eq!(context_fingerprint(&a), context_fingerprint(&b));
        assert_eq!(context_fingerprint(&a).len(), 64);

        b.insert("extra".into(), json!(1));
        assert_ne!(context_fingerprint(&a), context_fingerprint(&b));
    }

    #[test]
    fn test_cache_key_prefixed_by_hook_id() {
        let key = cache_key("git/pre_tool_commit.sh", &HookContext::new());
        assert!(key.starts_with("git/pre_tool_commit.sh#"));
    }
}
