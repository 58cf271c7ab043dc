//! Runtime error types.

use thiserror::Error;
use trellis_core::{ComError, ConfigError};
use trellis_framework::{DataError, ParseError, ServiceError};

use crate::config::RuntimeConfigError;

/// Errors that can occur while building or running an application.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Runtime settings could not be loaded.
    #[error(transparent)]
    Config(#[from] RuntimeConfigError),

    /// The application description is not well-formed XML.
    #[error("invalid application document: {0}")]
    Document(#[from] ConfigError),

    /// An element of the application description is malformed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A service failed to configure, start, update or stop.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// A data object could not be created or assigned.
    #[error(transparent)]
    Data(#[from] DataError),

    /// A worker could not be spawned or has stopped.
    #[error(transparent)]
    Com(#[from] ComError),

    /// An uid is already registered in the application context.
    #[error("uid '{0}' already exists")]
    DuplicateUid(String),

    /// A `<start>` or `<update>` item names no service.
    #[error("{context}: no service registered with uid '{uid}'")]
    UnknownService { context: String, uid: String },

    /// A referenced object is not registered.
    #[error("{context}: object '{uid}' has not been found")]
    UnknownObject { context: String, uid: String },

    /// A referenced object does not have the declared type.
    #[error("{context}: object '{uid}' is a {actual}, not a {expected}")]
    ObjectType {
        context: String,
        uid: String,
        expected: String,
        actual: String,
    },

    /// An object's `src` attribute is not supported.
    #[error("{context}: unsupported build mode '{mode}'")]
    BuildMode { context: String, mode: String },

    /// The object type holds no value, so a `value` attribute cannot apply.
    #[error("{context}: object '{uid}' of type {classname} does not take a value")]
    NotAProperty {
        context: String,
        uid: String,
        classname: String,
    },

    /// No application description has been set.
    #[error("no application configuration loaded")]
    NoApplication,

    /// A blocking application task panicked or was cancelled.
    #[error("application task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
