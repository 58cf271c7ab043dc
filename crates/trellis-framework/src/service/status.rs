//! Lifecycle states and binding modes.

use std::fmt;
use std::str::FromStr;

/// Where a service is in its start/stop cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GlobalStatus {
    #[default]
    Stopped,
    Starting,
    Started,
    Stopping,
    Swapping,
}

/// Whether the configuration has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConfigurationStatus {
    #[default]
    Unconfigured,
    Configuring,
    Configured,
}

/// Whether an update is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpdatingStatus {
    #[default]
    NotUpdating,
    Updating,
}

/// How a service may use a bound object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Read only.
    In,
    /// Read and modify.
    InOut,
    /// Produced by the service.
    Out,
}

impl Access {
    /// The XML element name for this access mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Access::In => "in",
            Access::InOut => "inout",
            Access::Out => "out",
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Access {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(Access::In),
            "inout" => Ok(Access::InOut),
            "out" => Ok(Access::Out),
            other => Err(format!("unknown access mode '{other}'")),
        }
    }
}

/// Kind of user notification a service emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NotificationType {
    #[default]
    Info,
    Success,
    Failure,
}

/// Lifecycle state of one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Status {
    pub(crate) global: GlobalStatus,
    pub(crate) configuration: ConfigurationStatus,
    pub(crate) updating: UpdatingStatus,
}
