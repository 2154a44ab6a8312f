//! Event bus configuration

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Event bus configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BusConfig {
    /// Number of recently published events kept for observability
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Number of recent handler failures kept in the error feed
    #[serde(default = "default_error_feed_limit")]
    pub error_feed_limit: usize,

    /// Capacity of the broadcast tap used by watchers
    #[serde(default = "default_watch_capacity")]
    pub watch_capacity: usize,
}

fn default_history_limit() -> usize {
    debug!("default_history_limit: called");
    1000
}

fn default_error_feed_limit() -> usize {
    debug!("default_error_feed_limit: called");
    100
}

fn default_watch_capacity() -> usize {
    debug!("default_watch_capacity: called");
    1024
}

impl Default for BusConfig {
    fn default() -> Self {
        debug!("BusConfig::default: called");
        Self {
            history_limit: default_history_limit(),
            error_feed_limit: default_error_feed_limit(),
            watch_capacity: default_watch_capacity(),
        }
    }
}
