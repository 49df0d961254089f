//! Error types for the engine's external interfaces.
//!
//! Defines error enums for the four collaborator boundaries:
//! - Oracle evaluation (UCI engine process)
//! - Job sourcing (remote game archives)
//! - Persistence (result store)
//! - Engine lifecycle operations

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the position evaluator.
#[derive(Debug, Error)]
pub enum OracleError {
    /// The evaluator process could not be spawned.
    #[error("Failed to spawn evaluator process: {0}")]
    SpawnFailed(String),

    /// The evaluator has not been warmed up yet.
    #[error("Evaluator is not warmed up")]
    NotWarm,

    /// The evaluator process exited or its pipes closed mid-conversation.
    #[error("Evaluator process terminated unexpectedly: {0}")]
    ProcessDied(String),

    /// The evaluator produced output that could not be parsed.
    #[error("Unparsable evaluator output: {0}")]
    ProtocolError(String),

    /// An evaluator operation exceeded its budget.
    #[error("Evaluator operation timed out after {0:?}")]
    Timeout(Duration),

    /// IO error on the evaluator's pipes.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while fetching candidate jobs.
#[derive(Debug, Error)]
pub enum SourceError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    /// Failed to parse an archive response.
    #[error("Failed to parse archive response: {0}")]
    ParseError(String),

    /// Every configured archive endpoint failed.
    #[error("All {0} archive endpoints failed")]
    AllEndpointsFailed(usize),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection to the store failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// A requested record does not exist.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Serialization of a persisted value failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A write rejected by the backend.
    #[error("Write failed: {0}")]
    WriteFailed(String),
}

/// Errors that can occur in engine lifecycle operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine is already running.
    #[error("Engine is already running")]
    AlreadyRunning,

    /// The engine is not running.
    #[error("Engine is not running")]
    NotRunning,

    /// No pool with the given name exists.
    #[error("Unknown pool: {0}")]
    UnknownPool(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}
