//! # Trellis Framework
//!
//! Services, data objects and configuration helpers built on
//! [`trellis_core`].
//!
//! This layer provides:
//! - The [`Service`](service::Service) trait and the [`Base`](service::Base)
//!   lifecycle state machine (configure, start, stop, update, swap)
//! - Property auto-instantiation and auto-connections between data objects
//!   and service slots
//! - Data objects ([`data`]) with a statically registered factory
//! - Uid registries and the shared [`AppContext`]
//! - Parsing of XML service descriptions ([`helper::config`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use trellis_framework::prelude::*;
//!
//! let ctx = AppContext::new();
//! let reader = ctx.service_factory().create("io::Reader", "reader")?;
//! reader.set_input("path", Arc::new(Text::new("in.raw".into())));
//! reader.configure()?;
//! reader.start().wait()?;
//! reader.update().wait()?;
//! reader.stop().wait()?;
//! ```

pub mod context;
pub mod data;
pub mod error;
pub mod helper;
pub mod registry;
pub mod service;

#[doc(hidden)]
pub use linkme;

pub use context::AppContext;
pub use error::{DataError, DataResult, ParseError, ParseResult, ServiceError, ServiceResult};

/// Prelude for common imports.
pub mod prelude {
    pub use std::sync::Arc;

    pub use super::context::AppContext;
    pub use super::data::{Boolean, Integer, MODIFIED_SIG, Object, Property, Real, Text};
    pub use super::error::{DataError, ParseError, ServiceError, ServiceResult};
    pub use super::service::{
        Access, Base, Declarations, KeyConnectionsMap, NotificationType, Service, ServiceContext,
        ServiceFuture,
    };
    pub use super::{register_data, register_service};
    pub use trellis_core::prelude::*;
}
