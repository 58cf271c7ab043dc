//! Uid-keyed registries of objects, services and named configurations.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{trace, warn};
use trellis_core::ConfigTree;

use crate::data::ObjectPtr;
use crate::service::Base;

/// Entries of one kind, by uid.
pub struct Registry<T> {
    kind: &'static str,
    entries: RwLock<HashMap<String, T>>,
}

/// Data objects by uid.
pub type ObjectRegistry = Registry<ObjectPtr>;

/// Services by uid.
pub type ServiceRegistry = Registry<Arc<Base>>;

/// Named service configurations, referenced by `<service config="...">`.
pub type ConfigRegistry = Registry<ConfigTree>;

impl<T: Clone> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `value` under `uid`, returning the entry it replaced.
    pub fn register(&self, uid: impl Into<String>, value: T) -> Option<T> {
        let uid = uid.into();
        trace!(kind = self.kind, uid = %uid, "Registered");
        let previous = self.entries.write().insert(uid.clone(), value);
        if previous.is_some() {
            warn!(kind = self.kind, uid = %uid, "Replaced an existing registration");
        }
        previous
    }

    pub fn unregister(&self, uid: &str) -> Option<T> {
        self.entries.write().remove(uid)
    }

    pub fn get(&self, uid: &str) -> Option<T> {
        self.entries.read().get(uid).cloned()
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.entries.read().contains_key(uid)
    }

    /// Sorted uids.
    pub fn uids(&self) -> Vec<String> {
        let mut uids: Vec<_> = self.entries.read().keys().cloned().collect();
        uids.sort();
        uids
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl<T> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("len", &self.entries.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Integer;

    #[test]
    fn test_register_and_replace() {
        let registry = ObjectRegistry::new("object");
        assert!(registry.register("a", Arc::new(Integer::new(1))).is_none());
        assert!(registry.register("a", Arc::new(Integer::new(2))).is_some());
        registry.register("b", Arc::new(Integer::new(3)));

        assert_eq!(registry.uids(), vec!["a", "b"]);
        let a = registry.get("a").unwrap();
        assert_eq!(a.as_property().unwrap().value_string(), "2");

        assert!(registry.unregister("a").is_some());
        assert!(!registry.contains("a"));
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_config_registry() {
        let registry = ConfigRegistry::new("config");
        registry.register("cfg", ConfigTree::with_data("x"));
        assert_eq!(registry.get("cfg").unwrap().data(), "x");
        assert!(registry.get("other").is_none());
    }
}
