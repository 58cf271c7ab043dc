//! Trellis Runtime - application layer of the Trellis service framework.
//!
//! This crate provides:
//! - The [`AppManager`], which builds objects, services and channels from an
//!   XML application description and drives their lifecycle
//! - The [`AppRuntime`], which runs one application until shutdown
//! - Runtime settings loaded with figment ([`config`])
//! - Logging setup ([`logging`])
//!
//! ```ignore
//! use trellis_runtime::AppRuntime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // trellis.toml: [app] file = "viewer.xml"
//!     let runtime = AppRuntime::new();
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use app::{AppManager, AppState, Parameters};
pub use config::{
    ConfigLoader, LoggingConfig, RuntimeConfigError, RuntimeConfigResult, TrellisConfig,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{AppRuntime, RuntimeBuilder};

// Re-export tracing for use by service implementations
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for service implementations.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
