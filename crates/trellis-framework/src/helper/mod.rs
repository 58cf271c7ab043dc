//! Helpers shared by application managers.

pub mod config;

pub use config::{
    ConnectionInfo, connect_proxy, disconnect_proxies, parse_connections, parse_connections2,
    parse_service,
};
