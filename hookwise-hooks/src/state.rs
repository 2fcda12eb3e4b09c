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

//! Learned state persistence
//!
//! Carries the learned per-hook estimates (success rate, execution time,
//! execution count) across engine restarts, so short-lived processes still
//! schedule by observed behaviour instead of inferred defaults.

use crate::error::StateError;
use crate::metadata::HookMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Learned estimates for one hook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearnedHookState {
    pub success_rate: f64,
    pub estimated_time_ms: f64,
    pub execution_count: u64,
    pub updated_at: DateTime<Utc>,
}

impl LearnedHookState {
    pub fn from_metadata(metadata: &HookMetadata) -> Self {
        Self {
            success_rate: metadata.success_rate,
            estimated_time_ms: metadata.estimated_time_ms,
            execution_count: metadata.execution_count,
            updated_at: Utc::now(),
        }
    }

    /// Overwrite the learned fields of `metadata`.
    pub fn apply(&self, metadata: &mut HookMetadata) {
        metadata.success_rate = self.success_rate.clamp(0.0, 1.0);
        metadata.estimated_time_ms = self.estimated_time_ms.max(0.0);
        metadata.execution_count = self.execution_count;
    }
}

/// Persisted learned state for every hook that has run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookStateStore {
    /// Path to the state file
    #[serde(skip)]
    path: Option<PathBuf>,

    #[serde(default)]
    pub hooks: BTreeMap<String, LearnedHookState>,
}

impl HookStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load state from `path`. A missing file yields an empty store bound to
    /// `path`.
    pub fn load(path: &Path) -> Result<Self, StateError> {
        if !path.exists() {
            return Ok(Self {
                path: Some(path.to_path_buf()),
                ..Self::default()
            });
        }

        let content = std::fs::read_to_string(path)?;
        let mut store: Self = serde_json::from_str(&content)?;
        store.path = Some(path.to_path_buf());
        Ok(store)
    }

    /// Write the store back to its file. No-op for a store without a path.
    pub fn save(&self) -> Result<(), StateError> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let content = serde_json::to_string_pretty(self)?;
            std::fs::write(path, content)?;
        }
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, hook_id: &str) -> Option<&LearnedHookState> {
        self.hooks.get(hook_id)
    }

    pub fn record(&mut self, hook_id: impl Into<String>, metadata: &HookMetadata) {
        self.hooks
            .insert(hook_id.into(), LearnedHookState::from_metadata(metadata));
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}
