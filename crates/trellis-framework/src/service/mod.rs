//! Services and their lifecycle.
//!
//! - [`Service`]: the trait application logic implements.
//! - [`Base`]: the managed instance wrapping one implementation, with its
//!   bindings, core signals and lifecycle slots.
//! - [`ServiceFactory`] / [`KeyPropsCache`]: creation by type name and the
//!   memoized per-type key defaults.
//! - [`ServiceConfig`] and friends: parsed service descriptions.

mod base;
mod config;
mod detail;
mod factory;
mod future;
mod status;
mod traits;

pub use base::{
    Base, FAILURE_NOTIFIED_SIG, INFO_NOTIFIED_SIG, LifecycleSlot, NotificationSignal,
    OUTPUT_CHANGED_SIG, ObjectBinding, START_SLOT, STARTED_SIG, STOP_SLOT, STOPPED_SIG,
    SUCCESS_NOTIFIED_SIG, SWAP_KEY_SLOT, SWAPPED_SIG, SwapSlot, UPDATE_SLOT, UPDATED_SIG,
};
pub use config::{ObjectServiceConfig, ProxyConnections, ProxyConnectionsMap, ServiceConfig};
pub use factory::{KeyProps, KeyPropsCache, SERVICE_REGISTRY, ServiceCtor, ServiceEntry, ServiceFactory};
pub use future::ServiceFuture;
pub use status::{Access, ConfigurationStatus, GlobalStatus, NotificationType, UpdatingStatus};
pub use traits::{
    Declarations, KeyConnectionsMap, KeyDecl, PropertyDefault, Service, ServiceContext, group_key,
    group_of,
};
