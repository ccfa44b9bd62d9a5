//! Error types for the integrity engine.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the registry, its backing store and the controller.
///
/// Module analysis failures never appear here; they are captured as
/// error [`ModuleResult`](crate::models::ModuleResult)s.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Module id is not among the installed descriptors
    #[error("Unknown module: {0}")]
    UnknownModule(String),

    /// Weight is negative or not a finite number
    #[error("Invalid weight {weight} for module {module_id}")]
    InvalidWeight { module_id: String, weight: f64 },

    /// Backing key-value store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Stored value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors a module may return from `analyze`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModuleError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Analysis failed: {0}")]
    Analysis(String),

    #[error("Module unavailable: {0}")]
    Unavailable(String),
}
