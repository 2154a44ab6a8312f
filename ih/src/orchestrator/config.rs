//! Orchestrator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OrchestratorConfig {
    /// Max handlers running at the same time across all modules
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// How long an aggregation waits for its responders, in milliseconds
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,

    /// Never deliver an event back to the module that published it
    #[serde(default = "default_skip_source_module")]
    pub skip_source_module: bool,
}

fn default_max_concurrency() -> usize {
    debug!("default_max_concurrency: called");
    16
}

fn default_deadline_ms() -> u64 {
    debug!("default_deadline_ms: called");
    5000
}

fn default_skip_source_module() -> bool {
    debug!("default_skip_source_module: called");
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        debug!("OrchestratorConfig::default: called");
        Self {
            max_concurrency: 16,
            deadline_ms: 5000,
            skip_source_module: true,
        }
    }
}

impl OrchestratorConfig {
    /// Aggregation deadline as a Duration
    pub fn deadline(&self) -> Duration {
        debug!(deadline_ms = %self.deadline_ms, "OrchestratorConfig::deadline: called");
        Duration::from_millis(self.deadline_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrency, 16);
        assert_eq!(config.deadline_ms, 5000);
        assert!(config.skip_source_module);
    }

    #[test]
    fn test_deadline_duration() {
        let config = OrchestratorConfig {
            deadline_ms: 250,
            ..Default::default()
        };
        assert_eq!(config.deadline(), Duration::from_millis(250));
    }

    #[test]
    fn test_kebab_case_keys() {
        let config: OrchestratorConfig =
            serde_yaml::from_str("max-concurrency: 2\nskip-source-module: false").unwrap();
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.deadline_ms, 5000);
        assert!(!config.skip_source_module);
    }
}
