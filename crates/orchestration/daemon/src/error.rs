//! Error types for orchestrd

use orchestration_types::OrchestrationError;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The plan file could not be read or parsed
    #[error("Plan load error: {path}: {message}")]
    PlanLoad { path: String, message: String },

    /// Bad command line input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] OrchestrationError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for DaemonError {
    fn from(err: config::ConfigError) -> Self {
        DaemonError::Config(err.to_string())
    }
}

pub type DaemonResult<T> = Result<T, DaemonError>;
