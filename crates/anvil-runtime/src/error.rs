//! Runtime error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested configuration file does not exist.
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Configuration could not be parsed or extracted.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// A loaded value is out of its valid range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur during orchestrator lifecycle operations.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// `start` was called outside the `Idle` phase.
    #[error("Orchestrator already started")]
    AlreadyStarted,

    /// `stop` was called before `start`.
    #[error("Orchestrator is not running")]
    NotRunning,

    /// Pipeline assembly failed.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] anvil_core::PipelineError),

    /// The update source failed to start or stop.
    #[error("Source error: {0}")]
    Source(#[from] anvil_core::SourceError),
}

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
