//! Unified error types for the Trellis core.
//!
//! Service-level errors live in `trellis-framework`; this module only covers
//! the communication layer and configuration trees.

use thiserror::Error;

// =============================================================================
// Communication Errors
// =============================================================================

/// Errors raised by signals, slots, workers and the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComError {
    /// The slot's argument types do not match the signal's.
    #[error("bad slot: signal expects '{expected}', slot takes '{got}'")]
    BadSlot {
        /// Argument tuple the signal emits.
        expected: &'static str,
        /// Argument tuple the slot accepts.
        got: &'static str,
    },

    /// The slot is already connected to this signal.
    #[error("slot is already connected to this signal")]
    AlreadyConnected,

    /// The worker no longer accepts tasks.
    #[error("worker '{0}' is stopped")]
    WorkerStopped(String),

    /// A posted task was dropped before producing a result.
    #[error("task was dropped before completion")]
    TaskDropped,

    /// No signal is registered under the given key.
    #[error("signal '{0}' not found")]
    NoSuchSignal(String),

    /// No slot is registered under the given key.
    #[error("slot '{0}' not found")]
    NoSuchSlot(String),

    /// The worker thread could not be created.
    #[error("failed to spawn worker '{name}': {reason}")]
    Spawn {
        /// Worker name.
        name: String,
        /// Underlying failure.
        reason: String,
    },
}

// =============================================================================
// Configuration Tree Errors
// =============================================================================

/// Errors raised while reading a [`ConfigTree`](crate::ptree::ConfigTree).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The requested path does not exist.
    #[error("no such node: '{0}'")]
    PathNotFound(String),

    /// The node exists but its value cannot be converted.
    #[error("conversion of data '{value}' at '{path}' failed")]
    BadValue {
        /// Path that was read.
        path: String,
        /// Raw value found.
        value: String,
    },

    /// The XML document is malformed.
    #[error("malformed XML: {0}")]
    Xml(String),
}

impl From<quick_xml::Error> for ConfigError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for ConfigError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::Xml(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for communication operations.
pub type ComResult<T> = Result<T, ComError>;

/// Result type for configuration tree access.
pub type ConfigResult<T> = Result<T, ConfigError>;
