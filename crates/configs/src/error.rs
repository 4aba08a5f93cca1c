//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid request timeout")]
    InvalidTimeout,

    #[error("Trusted proxy is not an IP address: {0}")]
    InvalidProxy(String),

    #[error("Unknown storage backend: {0}")]
    UnknownBackend(String),

    #[error("JWT secret must be at least 32 bytes")]
    WeakJwtSecret,

    #[error("Invalid board slug: {0}")]
    InvalidBoard(String),

    #[error("Duplicate board slug: {0}")]
    DuplicateBoard(String),

    #[error("Administrator {0} has no password hash")]
    AdminWithoutHash(String),

    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
}
