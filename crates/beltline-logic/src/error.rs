//! Error types for the reconciliation engine.
//!
//! Missing entities, activities and transactions are never errors: they mean
//! "not yet" and derive to an earlier stage. Errors cover genuine gaps only.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// An activity named an event the registry does not describe.
    #[error("no registry entry for event '{0}'")]
    MissingRegistryEntry(String),

    /// Engine configuration failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Malformed JSON input.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
