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

//! Latency anomaly detection
//!
//! Keeps a bounded rolling window of execution times per key and flags a new
//! observation as slow when it exceeds `mean + sensitivity * std_dev` of the
//! window. Each call both checks and records the observation.
//!
//! The check runs against the history *before* the new value is appended, so
//! a single outlier cannot inflate the statistics it is compared against.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Samples retained per key
    pub window_size: usize,
    /// History length required before any verdict is given
    pub min_samples: usize,
    /// Standard deviations above the mean that count as slow
    pub sensitivity: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            min_samples: 5,
            sensitivity: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum AnomalyVerdict {
    Normal,
    Slow {
        mean: f64,
        std_dev: f64,
        threshold: f64,
    },
}

impl AnomalyVerdict {
    pub fn is_anomalous(&self) -> bool {
        matches!(self, AnomalyVerdict::Slow { .. })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LatencyStats {
    pub samples: usize,
    pub mean: f64,
    pub std_dev: f64,
}

impl LatencyStats {
    fn from_window(window: &VecDeque<f64>) -> Option<Self> {
        if window.is_empty() {
            return None;
        }
        let n = window.len() as f64;
        let mean = window.iter().sum::<f64>() / n;
        let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            samples: window.len(),
            mean,
            std_dev: variance.sqrt(),
        })
    }
}

#[derive(Default)]
struct KeyHistory {
    window: VecDeque<f64>,
    anomalies: u64,
}

pub struct AnomalyDetector {
    histories: DashMap<String, KeyHistory>,
    config: AnomalyConfig,
    total_anomalies: AtomicU64,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            histories: DashMap::new(),
            config,
            total_anomalies: AtomicU64::new(0),
        }
    }

    /// Check `value` against the history for `key`, then record it.
    ///
    /// Returns `None` while fewer than `min_samples` observations exist.
    pub fn detect_anomaly(&self, key: &str, value: f64) -> Option<AnomalyVerdict> {
        let mut history = self.histories.entry(key.to_string()).or_default();

        let verdict = if history.window.len() >= self.config.min_samples.max(1) {
            LatencyStats::from_window(&history.window).map(|stats| {
                let threshold = stats.mean + self.config.sensitivity * stats.std_dev;
                if value > threshold {
                    AnomalyVerdict::Slow {
                        mean: stats.mean,
                        std_dev: stats.std_dev,
                        threshold,
                    }
                } else {
                    AnomalyVerdict::Normal
                }
            })
        } else {
            None
        };

        if verdict.is_some_and(|v| v.is_anomalous()) {
            history.anomalies += 1;
            self.total_anomalies.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key, value, "Latency anomaly detected");
        }

        history.window.push_back(value);
        while history.window.len() > self.config.window_size.max(1) {
            history.window.pop_front();
        }

        verdict
    }

    pub fn stats(&self, key: &str) -> Option<LatencyStats> {
        self.histories
            .get(key)
            .and_then(|history| LatencyStats::from_window(&history.window))
    }

    pub fn anomaly_count(&self, key: &str) -> u64 {
        self.histories
            .get(key)
            .map(|history| history.anomalies)
            .unwrap_or(0)
    }

    pub fn total_anomalies(&self) -> u64 {
        self.total_anomalies.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> AnomalyDetector {
        AnomalyDetector::new(AnomalyConfig::default())
    }

    #[test]
    fn test_no_verdict_below_min_samples() {
        let detector = detector();
        for _ in 0..5 {
            assert_eq!(detector.detect_anomaly("hook", 10.0), None);
        }
        // Sixth call has five samples of history.
        assert_eq!(
            detector.detect_anomaly("hook", 10.0),
            Some(AnomalyVerdict::Normal)
        );
    }

    #[test]
    fn test_outlier_is_flagged_slow() {
        let detector = detector();
        for value in [10.0, 12.0, 11.0, 9.0, 10.0, 11.0] {
            detector.detect_anomaly("hook", value);
        }

        let verdict = detector.detect_anomaly("hook", 500.0).unwrap();
        assert!(verdict.is_anomalous());
        if let AnomalyVerdict::Slow {
            mean, threshold, ..
        } = verdict
        {
            assert!((mean - 10.5).abs() < 1e-9);
            assert!(threshold < 500.0);
        }
        assert_eq!(detector.anomaly_count("hook"), 1);
        assert_eq!(detector.total_anomalies(), 1);
    }

    #[test]
    fn test_history_updated_regardless_of_verdict() {
        let detector = detector();
        for _ in 0..3 {
            detector.detect_anomaly("hook", 10.0);
        }
        assert_eq!(detector.stats("hook").unwrap().samples, 3);
        for _ in 0..10 {
            detector.detect_anomaly("hook", 10.0);
        }
        detector.detect_anomaly("hook", 1_000.0);
        assert_eq!(detector.stats("hook").unwrap().samples, 14);
    }

    #[test]
    fn test_window_is_bounded() {
        let detector = AnomalyDetector::new(AnomalyConfig {
            window_size: 4,
            ..AnomalyConfig::default()
        });
        for value in 0..10 {
            detector.detect_anomaly("hook", value as f64);
        }
        let stats = detector.stats("hook").unwrap();
        assert_eq!(stats.samples, 4);
        assert!((stats.mean - 7.5).abs() < 1e-9);
    }

    #[test]
    fn test_keys_are_independent() {
        let detector = detector();
        for _ in 0..10 {
            detector.detect_anomaly("fast", 1.0);
        }
        assert_eq!(detector.detect_anomaly("slow", 1_000.0), None);
        assert!(detector.stats("missing").is_none());
        assert_eq!(detector.anomaly_count("missing"), 0);
    }
}
