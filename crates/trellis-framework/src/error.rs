//! Error types for the Trellis framework.

use thiserror::Error;
use trellis_core::{ComError, ConfigError};

// =============================================================================
// Data Errors
// =============================================================================

/// Errors raised by data objects and their factory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    /// A property could not be read from its string form.
    #[error("cannot parse '{value}' as {classname}")]
    Parse {
        /// Class of the property.
        classname: &'static str,
        /// Rejected input.
        value: String,
    },

    /// An object is not of the expected class.
    #[error("type mismatch: expected '{expected}', got '{got}'")]
    TypeMismatch {
        /// Expected class name.
        expected: &'static str,
        /// Actual class name.
        got: &'static str,
    },

    /// No data type is registered under this name.
    #[error("unknown data type '{0}'")]
    UnknownType(String),
}

// =============================================================================
// Service Errors
// =============================================================================

/// Errors raised by service hooks and lifecycle operations.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// Failure reported by a service hook.
    #[error("{0}")]
    Custom(String),

    /// The service configuration could not be read.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A signal, slot or worker operation failed.
    #[error(transparent)]
    Com(#[from] ComError),

    /// A data object operation failed.
    #[error(transparent)]
    Data(#[from] DataError),

    /// No service implementation is registered under this type name.
    #[error("unknown service type '{0}'")]
    UnknownType(String),

    /// The service has no binding for this key.
    #[error("service '{service}' has no object at key '{key}'")]
    UnknownKey {
        /// Service uid.
        service: String,
        /// Requested key.
        key: String,
    },

    /// A slot was run from a hook of its own service. The call is queued
    /// and runs once the hook returns.
    #[error("slot '{slot}' of service '{service}' deferred until the running hook returns")]
    Deferred {
        /// Service uid.
        service: String,
        /// Slot key.
        slot: String,
    },
}

impl ServiceError {
    /// Creates a custom hook failure.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

// =============================================================================
// Parse Errors
// =============================================================================

/// Structural errors in an XML application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A required attribute is missing or empty.
    #[error("{context}: attribute '{attribute}' is missing or empty")]
    MissingAttribute {
        /// Where the attribute was expected.
        context: String,
        /// Attribute name.
        attribute: &'static str,
    },

    /// A service element embeds another service.
    #[error("service '{0}': cannot bind a service to another service")]
    NestedService(String),

    /// A `<signal>` or `<slot>` entry is not written as `uid/key`.
    #[error("'{0}' must be written as <signal>uid/key</signal> or <slot>uid/key</slot>")]
    BadConnection(String),

    /// A connection group must hold exactly one signal.
    #[error("a connection requires exactly one <signal>, found {0}")]
    SignalCount(usize),

    /// A named service configuration does not exist.
    #[error("service configuration '{0}' not found")]
    UnknownConfig(String),

    /// A lookup by uid failed.
    #[error("object or service '{0}' not found")]
    UnknownUid(String),

    /// The underlying tree could not be read.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for data operations.
pub type DataResult<T> = Result<T, DataError>;

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Result type for configuration parsing.
pub type ParseResult<T> = Result<T, ParseError>;
