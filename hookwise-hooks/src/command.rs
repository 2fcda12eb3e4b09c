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

//! External hook execution.
//!
//! A discovered hook file runs as a child process. The invocation payload is
//! written to stdin as JSON; stdout becomes the hook output (parsed as JSON
//! when it is valid JSON, otherwise kept as a string). A non-zero exit status
//! is a failure. The child is killed when the invocation is cancelled.

use crate::error::HookError;
use crate::handlers::{HookHandler, HookInvocation, HookOutput};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Maximum bytes captured per output stream (1 MiB).
const MAX_OUTPUT_BYTES: u64 = 1024 * 1024;

/// Handler that runs a hook file as a child process.
pub struct CommandHandler {
    name: String,
    path: PathBuf,
}

impl CommandHandler {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Interpreter used for this file, or `None` to execute it directly.
    pub fn interpreter(&self) -> Option<&'static str> {
        match self.path.extension().and_then(|ext| ext.to_str()) {
            Some("sh") => Some("sh"),
            Some("py") => Some("python3"),
            Some("js") => Some("node"),
            _ => None,
        }
    }

    fn command(&self, invocation: &HookInvocation) -> Command {
        let mut cmd = match self.interpreter() {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&self.path);
                cmd
            }
            None => Command::new(&self.path),
        };
        if let Some(dir) = self.path.parent() {
            cmd.current_dir(dir);
        }
        cmd.env("HOOKWISE_HOOK_ID", &invocation.hook_id)
            .env("HOOKWISE_EVENT", invocation.event.as_str())
            .env("HOOKWISE_ATTEMPT", invocation.attempt.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl HookHandler for CommandHandler {
    async fn execute(&self, invocation: &HookInvocation) -> Result<HookOutput, HookError> {
        let payload = serde_json::to_vec(&invocation.payload())
            .map_err(|e| HookError::SerializationError(e.to_string()))?;

        let mut child = self.command(invocation).spawn()?;

        // Readers start before stdin is fed so a hook that writes before it
        // reads cannot fill its pipe and stall.
        let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
        let stderr_task = tokio::spawn(read_stream(child.stderr.take()));
        let stdin_task = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                // The hook may exit without reading stdin.
                let _ = stdin.write_all(&payload).await;
            })
        });

        let exited = tokio::select! {
            status = child.wait() => Some(status?),
            _ = invocation.cancel.cancelled() => None,
        };
        if let Some(task) = &stdin_task {
            task.abort();
        }
        let Some(status) = exited else {
            if let Err(e) = child.kill().await {
                tracing::warn!(hook_id = %invocation.hook_id, error = %e, "Failed to kill cancelled hook");
            }
            return Err(HookError::Cancelled);
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let stdout = String::from_utf8_lossy(&stdout);
        let stderr = String::from_utf8_lossy(&stderr);

        if !status.success() {
            return Err(HookError::NonZeroExit {
                code: status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        if !stderr.trim().is_empty() {
            tracing::debug!(hook_id = %invocation.hook_id, stderr = %stderr.trim(), "Hook wrote to stderr");
        }

        let trimmed = stdout.trim();
        let data = if trimmed.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str(trimmed)
                    .unwrap_or_else(|_| serde_json::Value::String(trimmed.to_string())),
            )
        };
        let token_usage = data
            .as_ref()
            .and_then(|d| d.get("token_usage"))
            .and_then(|t| t.as_u64());

        Ok(HookOutput {
            data,
            message: None,
            token_usage,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(handle) = handle {
        let _ = handle.take(MAX_OUTPUT_BYTES).read_to_end(&mut buf).await;
    }
    buf
}
