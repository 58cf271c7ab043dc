//! Runtime configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading and validating runtime settings.
#[derive(Error, Debug)]
pub enum RuntimeConfigError {
    /// File not found at the specified path.
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Failed to read a file referenced by the configuration.
    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Extraction or format error reported by the loader.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {message}")]
    ValidationError { message: String },

    /// Missing required field.
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    /// The same worker name is listed twice.
    #[error("Duplicate worker name: {0}")]
    DuplicateWorker(String),
}

impl RuntimeConfigError {
    /// Creates a validation error with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }
}

/// Result type for configuration operations.
pub type RuntimeConfigResult<T> = Result<T, RuntimeConfigError>;
