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

//! Engine error types

use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by a single hook execution attempt.
///
/// These never escape `execute_hooks`; they are folded into a
/// [`HookExecutionResult`](crate::HookExecutionResult).
#[derive(Debug, Error)]
pub enum HookError {
    #[error("Hook execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Hook timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Hook cancelled")]
    Cancelled,

    #[error("Hook exited with status {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Connection pool '{0}' exhausted")]
    PoolExhausted(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl HookError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, HookError::Cancelled | HookError::SerializationError(_))
    }
}

/// Errors raised while scanning the hooks directory.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Hooks directory not found: {0}")]
    RootNotFound(PathBuf),

    #[error("Hooks directory is not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Errors raised while loading or validating engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Errors raised while reading or writing the learned-state file.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to access state file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse state file: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Top-level errors surfaced by the [`HookManager`](crate::HookManager).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Hook already registered: {0}")]
    HookAlreadyExists(String),

    #[error("No hooks directory configured")]
    NoHooksDir,

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("State error: {0}")]
    State(#[from] StateError),
}
