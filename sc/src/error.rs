//! Context store error types

use thiserror::Error;

/// Errors surfaced synchronously by context operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Context key not found: {key}")]
    NotFound { key: String },

    #[error("Invalid context key: {0}")]
    InvalidKey(String),
}
