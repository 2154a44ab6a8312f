//! Hub error types

use sharedctx::ContextError;
use thiserror::Error;

/// Errors surfaced by registry, bus, and context operations
///
/// Only `Validation` and `NotFound` reach direct callers of registry and
/// context operations. `Handler` and `Timeout` describe dispatch failures;
/// they are recorded by the bus and reported as per-module status inside
/// aggregated responses, never propagated to a publisher.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Handler for module {module_id} failed: {message}")]
    Handler { module_id: String, message: String },

    #[error("Module {module_id} did not respond within {waited_ms}ms")]
    Timeout { module_id: String, waited_ms: u64 },

    #[error("{0} channel closed")]
    ChannelClosed(&'static str),

    #[error("No async runtime available: {0}")]
    Runtime(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HubError {
    /// Shorthand for a validation failure
    pub fn validation(msg: impl Into<String>) -> Self {
        HubError::Validation(msg.into())
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, HubError::Validation(_))
    }

    /// Check if this is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, HubError::NotFound { .. })
    }
}

impl From<ContextError> for HubError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::NotFound { key } => HubError::NotFound {
                kind: "Context key",
                id: key,
            },
            ContextError::InvalidKey(msg) => HubError::Validation(msg),
        }
    }
}

/// Result alias for hub operations
pub type HubResult<T> = Result<T, HubError>;
