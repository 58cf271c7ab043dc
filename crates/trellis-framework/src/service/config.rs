//! Parsed service descriptions.

use std::collections::HashMap;

use trellis_core::ConfigTree;

use super::status::Access;

/// One object binding of a service, as read from `<in>`, `<out>` or `<inout>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectServiceConfig {
    /// Binding key; group members are named `group[index]`.
    pub key: String,
    /// Uid of the bound object.
    pub uid: String,
    pub access: Access,
    /// Connect the object's signals to the service on start.
    pub auto_connect: bool,
    /// The service may start without this object.
    pub optional: bool,
}

/// Everything needed to build and wire one service.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub uid: String,
    /// Registered implementation name.
    pub type_name: String,
    /// Auto-connect every binding, whatever its own flag says.
    pub global_auto_connect: bool,
    /// Name of the worker the service slots run on.
    pub worker: Option<String>,
    /// The service element, or the named configuration it refers to.
    pub config: ConfigTree,
    pub objects: Vec<ObjectServiceConfig>,
}

impl ServiceConfig {
    pub fn new(uid: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    /// Adds a binding, replacing any previous one with the same key.
    pub fn insert_object(&mut self, object: ObjectServiceConfig) {
        match self.objects.iter_mut().find(|o| o.key == object.key) {
            Some(existing) => *existing = object,
            None => self.objects.push(object),
        }
    }

    pub fn object(&self, key: &str) -> Option<&ObjectServiceConfig> {
        self.objects.iter().find(|o| o.key == key)
    }
}

/// Signals and slots attached to one named proxy channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyConnections {
    pub channel: String,
    /// `(uid, signal key)` pairs.
    pub signals: Vec<(String, String)>,
    /// `(uid, slot key)` pairs.
    pub slots: Vec<(String, String)>,
}

impl ProxyConnections {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Self::default()
        }
    }

    pub fn add_signal(&mut self, uid: impl Into<String>, key: impl Into<String>) -> &mut Self {
        self.signals.push((uid.into(), key.into()));
        self
    }

    pub fn add_slot(&mut self, uid: impl Into<String>, key: impl Into<String>) -> &mut Self {
        self.slots.push((uid.into(), key.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty() && self.slots.is_empty()
    }
}

/// Proxy connections grouped by the key of the element that declared them.
pub type ProxyConnectionsMap = HashMap<String, Vec<ProxyConnections>>;
