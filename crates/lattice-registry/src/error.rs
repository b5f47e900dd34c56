//! Error types for the service registry.
//!
//! Only configuration export/import can fail; health checking and load
//! balancing surface state, never errors.

use thiserror::Error;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur during registry config export/import.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
