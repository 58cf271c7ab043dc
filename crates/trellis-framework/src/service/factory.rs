//! Creation of services by type name and the per-type key table.

use std::collections::HashMap;
use std::sync::Arc;

use linkme::distributed_slice;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::base::Base;
use super::traits::{Declarations, Service, group_of};
use crate::error::{ServiceError, ServiceResult};

/// Constructor of a service implementation.
pub type ServiceCtor = fn() -> Box<dyn Service>;

/// One statically registered service implementation.
pub struct ServiceEntry {
    /// Name used by the `type` attribute of `<service>`.
    pub type_name: &'static str,
    pub create: ServiceCtor,
}

/// Registry of service implementations contributed by any linked crate.
///
/// Use [`register_service!`](crate::register_service) to add an entry.
#[distributed_slice]
pub static SERVICE_REGISTRY: [ServiceEntry];

/// Registers a service implementation with [`SERVICE_REGISTRY`].
///
/// ```rust,ignore
/// register_service!(THRESHOLD, "filter::Threshold", || Box::new(Threshold::default()));
/// ```
#[macro_export]
macro_rules! register_service {
    ($name:ident, $type_name:expr, $ctor:expr $(,)?) => {
        #[$crate::linkme::distributed_slice($crate::service::SERVICE_REGISTRY)]
        #[linkme(crate = $crate::linkme)]
        static $name: $crate::service::ServiceEntry = $crate::service::ServiceEntry {
            type_name: $type_name,
            create: $ctor,
        };
    };
}

// ─── ServiceFactory ─────────────────────────────────────────────────────────

/// Builds services by type name.
pub struct ServiceFactory {
    ctors: RwLock<HashMap<String, ServiceCtor>>,
}

impl Default for ServiceFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceFactory {
    /// A factory holding every statically registered implementation.
    pub fn new() -> Self {
        let ctors = SERVICE_REGISTRY
            .iter()
            .map(|entry| (entry.type_name.to_string(), entry.create))
            .collect::<HashMap<_, _>>();
        debug!(count = ctors.len(), "Service factory initialised");
        Self {
            ctors: RwLock::new(ctors),
        }
    }

    /// Adds or replaces an implementation at runtime.
    pub fn register(&self, type_name: impl Into<String>, create: ServiceCtor) {
        self.ctors.write().insert(type_name.into(), create);
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.ctors.read().contains_key(type_name)
    }

    fn ctor(&self, type_name: &str) -> ServiceResult<ServiceCtor> {
        self.ctors
            .read()
            .get(type_name)
            .copied()
            .ok_or_else(|| ServiceError::UnknownType(type_name.to_string()))
    }

    /// Creates a stopped, unconfigured service `uid` of type `type_name`.
    pub fn create(&self, type_name: &str, uid: &str) -> ServiceResult<Arc<Base>> {
        let imp = self.ctor(type_name)?();
        Ok(Base::new(uid, type_name, imp))
    }

    /// The keys declared by `type_name`.
    pub fn declarations(&self, type_name: &str) -> ServiceResult<Declarations> {
        let imp = self.ctor(type_name)?();
        let mut decls = Declarations::new();
        imp.declare(&mut decls);
        Ok(decls)
    }

    /// Sorted type names.
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.ctors.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ServiceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceFactory")
            .field("types", &self.type_names())
            .finish()
    }
}

// ─── KeyPropsCache ──────────────────────────────────────────────────────────

/// Binding defaults declared by a service type for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyProps {
    pub auto_connect: bool,
    pub optional: bool,
}

type KeyTable = Arc<HashMap<String, KeyProps>>;

/// Memoized [`KeyProps`] of each service type.
#[derive(Default)]
pub struct KeyPropsCache {
    tables: RwLock<HashMap<String, KeyTable>>,
}

impl KeyPropsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The key table of `type_name`, built on first use.
    ///
    /// An unknown type yields an empty table.
    pub fn table(&self, factory: &ServiceFactory, type_name: &str) -> KeyTable {
        if let Some(table) = self.tables.read().get(type_name) {
            return Arc::clone(table);
        }

        let table: HashMap<String, KeyProps> = match factory.declarations(type_name) {
            Ok(decls) => decls
                .iter()
                .map(|d| {
                    (
                        d.key.clone(),
                        KeyProps {
                            auto_connect: d.auto_connect,
                            optional: d.optional,
                        },
                    )
                })
                .collect(),
            Err(e) => {
                warn!(kind = %type_name, error = %e, "No key table for service type");
                HashMap::new()
            }
        };
        let table = Arc::new(table);
        self.tables
            .write()
            .entry(type_name.to_string())
            .or_insert(table)
            .clone()
    }

    /// Defaults of `key` (or of its group) for `type_name`.
    pub fn key_props(&self, factory: &ServiceFactory, type_name: &str, key: &str) -> Option<KeyProps> {
        let table = self.table(factory, type_name);
        table
            .get(key)
            .or_else(|| group_of(key).and_then(|g| table.get(g)))
            .copied()
    }

    pub fn is_key_optional(&self, factory: &ServiceFactory, type_name: &str, key: &str) -> bool {
        self.key_props(factory, type_name, key)
            .is_some_and(|p| p.optional)
    }

    /// Number of memoized types.
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }

    pub fn clear(&self) {
        self.tables.write().clear();
    }
}

impl std::fmt::Debug for KeyPropsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPropsCache")
            .field("types", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{Access, ServiceContext};

    #[derive(Default)]
    struct Viewer;

    impl Service for Viewer {
        fn declare(&self, decls: &mut Declarations) {
            decls
                .input("image", true, false)
                .group("layers", Access::In, false, true);
        }

        fn starting(&mut self, _ctx: &ServiceContext<'_>) -> ServiceResult<()> {
            Ok(())
        }

        fn stopping(&mut self, _ctx: &ServiceContext<'_>) -> ServiceResult<()> {
            Ok(())
        }

        fn updating(&mut self, _ctx: &ServiceContext<'_>) -> ServiceResult<()> {
            Ok(())
        }
    }

    crate::register_service!(VIEWER, "test::Viewer", || Box::new(Viewer));

    #[test]
    fn test_static_registration() {
        let factory = ServiceFactory::new();
        assert!(factory.contains("test::Viewer"));
        let base = factory.create("test::Viewer", "viewer").unwrap();
        assert_eq!(base.id(), "viewer");
        assert_eq!(base.type_name(), "test::Viewer");
        assert!(base.is_stopped());
    }

    #[test]
    fn test_unknown_type() {
        let factory = ServiceFactory::new();
        assert!(matches!(
            factory.create("nope", "x"),
            Err(ServiceError::UnknownType(t)) if t == "nope"
        ));
    }

    #[test]
    fn test_key_props_memoized() {
        let factory = ServiceFactory::new();
        let cache = KeyPropsCache::new();

        let props = cache.key_props(&factory, "test::Viewer", "image").unwrap();
        assert!(props.auto_connect);
        assert!(!props.optional);
        assert!(cache.is_key_optional(&factory, "test::Viewer", "layers[3]"));
        assert_eq!(cache.len(), 1);

        assert!(cache.key_props(&factory, "missing", "image").is_none());
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }
}
