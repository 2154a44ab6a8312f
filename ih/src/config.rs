//! IntelHub configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::bus::BusConfig;
use crate::orchestrator::OrchestratorConfig;

/// Project-local config file name
const LOCAL_CONFIG: &str = ".intelhub.yml";

/// Main IntelHub configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Event bus history and error feed sizes
    pub bus: BusConfig,

    /// Dispatch concurrency and aggregation deadline
    pub orchestrator: OrchestratorConfig,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.max_concurrency == 0 {
            return Err(eyre::eyre!("orchestrator.max-concurrency must be at least 1"));
        }
        if self.orchestrator.deadline_ms == 0 {
            return Err(eyre::eyre!("orchestrator.deadline-ms must be at least 1"));
        }
        if self.bus.watch_capacity == 0 {
            return Err(eyre::eyre!("bus.watch-capacity must be at least 1"));
        }
        Ok(())
    }

    /// Candidate config files, most specific first
    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("intelhub").join("intelhub.yml"));
        }
        paths
    }

    /// Load from `config_path`, else the first readable search path, else defaults.
    ///
    /// An explicit path must load. Unreadable or malformed search-path files are
    /// logged and skipped.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).with_context(|| format!("Cannot use config {}", path.display()));
        }

        for candidate in Self::search_paths().into_iter().filter(|p| p.exists()) {
            match Self::load_from_file(&candidate) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!(path = %candidate.display(), error = %e, "Skipping config file"),
            }
        }

        tracing::info!("Using default config");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).context("Cannot read config")?;
        let config: Self = serde_yaml::from_str(&content).context("Cannot parse config YAML")?;
        tracing::info!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config")
    }
}
