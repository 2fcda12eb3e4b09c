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

//! Hook handler traits and implementations.

use crate::error::HookError;
use crate::events::{HookContext, HookEvent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a handler gets for one execution attempt.
#[derive(Debug, Clone)]
pub struct HookInvocation {
    pub hook_id: String,
    pub event: HookEvent,
    pub context: Arc<HookContext>,
    /// 1-based attempt number under the retry policy.
    pub attempt: u32,
    /// Pooled connection borrowed for this attempt.
    pub connection_id: Option<u64>,
    /// Fires when the batch deadline elapses. Handlers should stop promptly;
    /// work that ignores it may still complete its side effects.
    pub cancel: CancellationToken,
}

impl HookInvocation {
    pub fn new(hook_id: impl Into<String>, event: HookEvent, context: Arc<HookContext>) -> Self {
        Self {
            hook_id: hook_id.into(),
            event,
            context,
            attempt: 1,
            connection_id: None,
            cancel: CancellationToken::new(),
        }
    }

    /// JSON document written to external hooks.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "hook_id": self.hook_id,
            "event": self.event,
            "context": &*self.context,
            "attempt": self.attempt,
        })
    }
}

/// Output of a successful hook execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HookOutput {
    /// Structured data returned by the hook.
    pub data: Option<serde_json::Value>,
    /// Optional message describing the result.
    pub message: Option<String>,
    /// Tokens (or other units of resource) the hook reports having consumed.
    pub token_usage: Option<u64>,
}

impl HookOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_data(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_token_usage(mut self, tokens: u64) -> Self {
        self.token_usage = Some(tokens);
        self
    }
}

/// Trait for asynchronous hook handlers.
#[async_trait]
pub trait HookHandler: Send + Sync {
    /// Run the hook once.
    async fn execute(&self, invocation: &HookInvocation) -> Result<HookOutput, HookError>;

    /// Get the handler name.
    fn name(&self) -> &str;
}

/// Type alias for a shared async hook handler.
pub type AsyncHookHandler = Arc<dyn HookHandler>;

/// Handler backed by an async closure. The closure receives an owned copy of
/// the invocation.
pub struct FnHandler<F> {
    name: String,
    callback: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(HookInvocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HookOutput, HookError>> + Send,
{
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        Self {
            name: name.into(),
            callback,
        }
    }
}

#[async_trait]
impl<F, Fut> HookHandler for FnHandler<F>
where
    F: Fn(HookInvocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HookOutput, HookError>> + Send,
{
    async fn execute(&self, invocation: &HookInvocation) -> Result<HookOutput, HookError> {
        (self.callback)(invocation.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A handler that always succeeds without doing anything.
pub struct NoOpHandler {
    name: String,
}

impl NoOpHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl HookHandler for NoOpHandler {
    async fn execute(&self, _invocation: &HookInvocation) -> Result<HookOutput, HookError> {
        Ok(HookOutput::empty())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
