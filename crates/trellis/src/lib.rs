//! # Trellis
//!
//! A service framework built on typed signals and slots.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  create/start   ┌───────────────────────────────────┐
//! │  AppRuntime  │───────────────▶ │ Service "reader" (worker "io")    │──▶ objects
//! │ (AppManager) │───────────────▶ │ Service "viewer" (calling thread) │──▶ objects
//! └──────────────┘                 └───────────────────────────────────┘
//!         │ proxy channels                ▲ auto-connections
//!         └───────────────────────────────┘ (object "modified" ─▶ slot)
//! ```
//!
//! - **Core**: slots, signals, workers, the proxy and configuration trees
//! - **Framework**: the service lifecycle, data objects and XML parsing
//! - **Runtime**: application manager, settings and logging
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trellis::prelude::*;
//!
//! struct Doubler;
//!
//! impl Service for Doubler {
//!     fn declare(&self, decls: &mut Declarations) {
//!         decls.inout("value", true, false);
//!     }
//!     fn starting(&mut self, _: &ServiceContext<'_>) -> ServiceResult<()> { Ok(()) }
//!     fn stopping(&mut self, _: &ServiceContext<'_>) -> ServiceResult<()> { Ok(()) }
//!     fn updating(&mut self, ctx: &ServiceContext<'_>) -> ServiceResult<()> {
//!         let value = ctx.require::<Integer>("value")?;
//!         value.set_value(value.value() * 2);
//!         Ok(())
//!     }
//! }
//!
//! register_service!(DOUBLER, "demo::Doubler", || Box::new(Doubler));
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = AppRuntime::new();
//!     runtime.load_app_xml(include_str!("app.xml"))?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML runtime settings (default)
//! - `yaml-config`: YAML runtime settings
//! - `json-log`: JSON log output

pub use trellis_core as core;
pub use trellis_framework as framework;
pub use trellis_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use trellis::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use trellis_runtime::{AppManager, AppRuntime, AppState, RuntimeError, RuntimeResult};

    // Services, data objects and communication primitives
    pub use trellis_framework::prelude::*;
}
