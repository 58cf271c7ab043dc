//! Runtime configuration.
//!
//! Settings for logging, workers and the application file, loaded with
//! figment from files and environment variables.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{RuntimeConfigError, RuntimeConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    AppConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, SpanEventConfig,
    TrellisConfig,
};
pub use validation::validate_config;
