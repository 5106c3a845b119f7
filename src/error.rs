//! Error types for the Gatehouse service.

use thiserror::Error;

/// Main error type for Gatehouse operations.
///
/// Admission never produces one of these: a denied request is a policy
/// outcome, not an error.
#[derive(Error, Debug)]
pub enum GatehouseError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failures talking to the upstream application
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Background task failures
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for GatehouseError {
    fn from(err: config::ConfigError) -> Self {
        GatehouseError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for GatehouseError {
    fn from(err: reqwest::Error) -> Self {
        GatehouseError::Upstream(err.to_string())
    }
}

/// Result type alias for Gatehouse operations.
pub type Result<T> = std::result::Result<T, GatehouseError>;
