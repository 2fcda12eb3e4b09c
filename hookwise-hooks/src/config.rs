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

//! Engine configuration.

use crate::error::ConfigError;
use crate::metadata::{HookCategory, HookMetadata, HookPriority};
use hookwise_core::{AnomalyConfig, CacheConfig, CircuitConfig, PoolConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the hook execution engine.
///
/// # Example TOML Configuration
///
/// ```toml
/// hooks_dir = ".hooks"
/// max_concurrent_hooks = 8
/// default_timeout_ms = 3000
///
/// [cache]
/// max_size = 500
/// network_ttl_ms = 30000
///
/// [circuit_breaker]
/// failure_threshold = 3
///
/// [[hooks]]
/// id = "git/stop_git_commit.sh"
/// timeout_ms = 30000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root directory scanned for hook files.
    #[serde(default)]
    pub hooks_dir: Option<PathBuf>,

    /// Maximum number of concurrent hook executions per event.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_hooks: usize,

    /// Default timeout for one hook attempt in milliseconds.
    #[serde(default = "default_timeout")]
    pub default_timeout_ms: u64,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub circuit_breaker: CircuitConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub anomaly: AnomalyConfig,

    #[serde(default)]
    pub thresholds: HealthThresholds,

    /// Background resource sampling interval; 0 disables sampling.
    #[serde(default = "default_sample_interval")]
    pub resource_sample_interval_ms: u64,

    /// Per-hook overrides of inferred metadata.
    #[serde(default)]
    pub hooks: Vec<HookOverride>,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_timeout() -> u64 {
    5000
}

fn default_sample_interval() -> u64 {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hooks_dir: None,
            max_concurrent_hooks: default_max_concurrent(),
            default_timeout_ms: default_timeout(),
            cache: CacheSettings::default(),
            circuit_breaker: CircuitConfig::default(),
            retry: RetryPolicy::default(),
            pool: PoolConfig::default(),
            anomaly: AnomalyConfig::default(),
            thresholds: HealthThresholds::default(),
            resource_sample_interval_ms: default_sample_interval(),
            hooks: Vec::new(),
        }
    }
}

/// Result cache sizing and per-category TTLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub max_size: usize,
    pub default_ttl_ms: u64,
    /// TTL for hooks that talk to the network.
    pub network_ttl_ms: u64,
    /// TTL for hooks that mutate state.
    pub mutating_ttl_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size: 1_000,
            default_ttl_ms: 300_000,
            network_ttl_ms: 60_000,
            mutating_ttl_ms: 30_000,
        }
    }
}

impl CacheSettings {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_size: self.max_size,
            default_ttl_ms: self.default_ttl_ms,
        }
    }

    /// TTL for a cached result of a hook with `metadata`.
    pub fn ttl_for(&self, metadata: &HookMetadata) -> Duration {
        let ms = if metadata.category == HookCategory::Network {
            self.network_ttl_ms
        } else if !metadata.parallel_safe || metadata.category == HookCategory::Mutating {
            self.mutating_ttl_ms
        } else {
            self.default_ttl_ms
        };
        Duration::from_millis(ms)
    }
}

/// Limits used by health checks and recommendations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// Hooks estimated slower than this are flagged.
    pub slow_hook_ms: f64,
    /// Hooks with a success rate below this are flagged.
    pub min_success_rate: f64,
    pub cpu_warning_percent: f32,
    pub memory_warning_mb: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            slow_hook_ms: 1_000.0,
            min_success_rate: 0.8,
            cpu_warning_percent: 90.0,
            memory_warning_mb: 2_048.0,
        }
    }
}

/// Overrides applied to one hook's inferred metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookOverride {
    /// Hook identity the override applies to.
    pub id: String,

    /// Timeout override for this specific hook (in milliseconds).
    pub timeout_ms: Option<u64>,

    pub priority: Option<HookPriority>,

    pub parallel_safe: Option<bool>,

    /// Disabled hooks are not registered at discovery.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl HookOverride {
    pub fn apply(&self, metadata: &mut HookMetadata) {
        if let Some(priority) = self.priority {
            metadata.priority = priority;
        }
        if let Some(parallel_safe) = self.parallel_safe {
            metadata.parallel_safe = parallel_safe;
        }
    }
}

impl EngineConfig {
    /// Create a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Create a configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load configuration from a file; `.json` files are parsed as JSON,
    /// everything else as TOML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_toml(&content),
        }
    }

    /// Load configuration from environment variables
    ///
    /// Supported environment variables:
    /// - HOOKWISE_HOOKS_DIR: Hooks root directory
    /// - HOOKWISE_MAX_CONCURRENT: Max concurrent hooks per event (default: 4)
    /// - HOOKWISE_DEFAULT_TIMEOUT_MS: Per-attempt hook timeout (default: 5000)
    /// - HOOKWISE_CACHE_MAX_SIZE: Result cache capacity (default: 1000)
    pub fn from_env() -> Self {
        Self::merge_with_env(Self::default())
    }

    /// Load configuration with priority: file > env > defaults
    pub fn load(config_file: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = match config_file {
            Some(path) if path.exists() => {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            }
            Some(path) => {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::merge_with_env(Self::default())
            }
            None => Self::merge_with_env(Self::default()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Override fields whose environment variable is set and parses.
    fn merge_with_env(mut config: Self) -> Self {
        if let Ok(dir) = std::env::var("HOOKWISE_HOOKS_DIR") {
            config.hooks_dir = Some(PathBuf::from(dir));
        }
        if let Some(max) = parse_env("HOOKWISE_MAX_CONCURRENT") {
            config.max_concurrent_hooks = max;
        }
        if let Some(timeout) = parse_env("HOOKWISE_DEFAULT_TIMEOUT_MS") {
            config.default_timeout_ms = timeout;
        }
        if let Some(size) = parse_env("HOOKWISE_CACHE_MAX_SIZE") {
            config.cache.max_size = size;
        }
        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_hooks == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_hooks must be greater than 0".to_string(),
            ));
        }
        if self.cache.max_size == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_size must be greater than 0".to_string(),
            ));
        }
        if self.pool.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "pool.max_connections must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.thresholds.min_success_rate) {
            return Err(ConfigError::Invalid(
                "thresholds.min_success_rate must be within [0, 1]".to_string(),
            ));
        }
        for (index, hook) in self.hooks.iter().enumerate() {
            if hook.id.is_empty() {
                return Err(ConfigError::Invalid(format!("hooks[{index}]: id cannot be empty")));
            }
        }
        Ok(())
    }

    /// Get the default timeout as a Duration.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn hook_override(&self, hook_id: &str) -> Option<&HookOverride> {
        self.hooks.iter().find(|hook| hook.id == hook_id)
    }

    /// Get the timeout for a specific hook.
    pub fn timeout_for(&self, hook_id: &str) -> Duration {
        self.hook_override(hook_id)
            .and_then(|hook| hook.timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.default_timeout())
    }

    pub fn resource_sample_interval(&self) -> Option<Duration> {
        (self.resource_sample_interval_ms > 0)
            .then(|| Duration::from_millis(self.resource_sample_interval_ms))
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::HookEvent;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent_hooks, 4);
        assert_eq!(config.default_timeout_ms, 5000);
        assert_eq!(config.cache.max_size, 1000);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.pool.max_connections, 10);
        assert_eq!(config.anomaly.window_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml_config() {
        let toml = r#"
            hooks_dir = "/srv/hooks"
            max_concurrent_hooks = 8

            [cache]
            max_size = 50

            [circuit_breaker]
            failure_threshold = 3

            [[hooks]]
            id = "stop_git_commit.sh"
            timeout_ms = 30000
            priority = "CRITICAL"
        "#;

        let config = EngineConfig::from_toml(toml).unwrap();
        assert_eq!(config.hooks_dir, Some(PathBuf::from("/srv/hooks")));
        assert_eq!(config.max_concurrent_hooks, 8);
        assert_eq!(config.cache.max_size, 50);
        assert_eq!(config.cache.network_ttl_ms, 60_000);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.success_threshold, 2);
        assert_eq!(config.default_timeout_ms, 5000);
        assert_eq!(config.timeout_for("stop_git_commit.sh"), Duration::from_secs(30));
        assert_eq!(config.timeout_for("other.sh"), Duration::from_secs(5));
        assert!(config.hooks[0].enabled);
    }

    #[test]
    fn test_parse_json_config() {
        let json = r#"{"max_concurrent_hooks": 2, "retry": {"max_retries": 0}}"#;
        let config = EngineConfig::from_json(json).unwrap();
        assert_eq!(config.max_concurrent_hooks, 2);
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.retry.base_delay_ms, 100);
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("hookwise.json");
        std::fs::write(&json_path, r#"{"default_timeout_ms": 250}"#).unwrap();
        let toml_path = dir.path().join("hookwise.toml");
        std::fs::write(&toml_path, "default_timeout_ms = 750").unwrap();

        assert_eq!(EngineConfig::from_file(&json_path).unwrap().default_timeout_ms, 250);
        assert_eq!(EngineConfig::from_file(&toml_path).unwrap().default_timeout_ms, 750);

        let loaded = EngineConfig::load(Some(json_path)).unwrap();
        assert_eq!(loaded.default_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            max_concurrent_hooks: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        assert!(matches!(
            EngineConfig::from_toml("max_concurrent_hooks = \"many\""),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_ttl_by_category() {
        let cache = CacheSettings::default();
        let general = HookMetadata::new(HookEvent::Stop);
        let network = HookMetadata::new(HookEvent::Stop).with_category(HookCategory::Network);
        let mutating = HookMetadata::new(HookEvent::Stop).with_parallel_safe(false);

        assert_eq!(cache.ttl_for(&general), Duration::from_secs(300));
        assert_eq!(cache.ttl_for(&network), Duration::from_secs(60));
        assert_eq!(cache.ttl_for(&mutating), Duration::from_secs(30));
    }

    #[test]
    fn test_override_applies_to_metadata() {
        let hook = HookOverride {
            id: "a.sh".into(),
            timeout_ms: None,
            priority: Some(HookPriority::Low),
            parallel_safe: Some(false),
            enabled: true,
        };
        let mut meta = HookMetadata::new(HookEvent::Stop);
        hook.apply(&mut meta);
        assert_eq!(meta.priority, HookPriority::Low);
        assert!(!meta.parallel_safe);
    }
}
