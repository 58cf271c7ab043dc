//! Application-wide shared state.
//!
//! [`AppContext`] bundles the proxy, the registries, the factories, the
//! key-props cache and the active workers. One context describes one running
//! application; several contexts can live in the same process.

use std::sync::Arc;

use trellis_core::{ActiveWorkers, HasSignals, HasSlots, Proxy};

use crate::data::DataFactory;
use crate::registry::{ConfigRegistry, ObjectRegistry, ServiceRegistry};
use crate::service::{KeyProps, KeyPropsCache, ServiceFactory};

/// Shared state of one application.
#[derive(Debug)]
pub struct AppContext {
    proxy: Arc<Proxy>,
    objects: ObjectRegistry,
    services: ServiceRegistry,
    configs: ConfigRegistry,
    key_props: KeyPropsCache,
    service_factory: ServiceFactory,
    data_factory: DataFactory,
    workers: Arc<ActiveWorkers>,
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AppContext {
    pub fn new() -> Self {
        Self::with_workers(Arc::new(ActiveWorkers::new()))
    }

    /// A context sharing an existing set of workers.
    pub fn with_workers(workers: Arc<ActiveWorkers>) -> Self {
        Self {
            proxy: Arc::new(Proxy::new()),
            objects: ObjectRegistry::new("object"),
            services: ServiceRegistry::new("service"),
            configs: ConfigRegistry::new("config"),
            key_props: KeyPropsCache::new(),
            service_factory: ServiceFactory::new(),
            data_factory: DataFactory::new(),
            workers,
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    pub fn proxy(&self) -> &Arc<Proxy> {
        &self.proxy
    }

    pub fn objects(&self) -> &ObjectRegistry {
        &self.objects
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn configs(&self) -> &ConfigRegistry {
        &self.configs
    }

    pub fn key_props_cache(&self) -> &KeyPropsCache {
        &self.key_props
    }

    pub fn service_factory(&self) -> &ServiceFactory {
        &self.service_factory
    }

    pub fn data_factory(&self) -> &DataFactory {
        &self.data_factory
    }

    pub fn workers(&self) -> &Arc<ActiveWorkers> {
        &self.workers
    }

    // ─── Lookups ────────────────────────────────────────────────────────────

    /// Defaults declared by `type_name` for `key`.
    pub fn key_props(&self, type_name: &str, key: &str) -> Option<KeyProps> {
        self.key_props
            .key_props(&self.service_factory, type_name, key)
    }

    /// The signal side of the service or object `uid`.
    pub fn signals_of(&self, uid: &str) -> Option<Arc<dyn HasSignals>> {
        if let Some(service) = self.services.get(uid) {
            return Some(service);
        }
        self.objects
            .get(uid)
            .map(|object| -> Arc<dyn HasSignals> { object })
    }

    /// The slot side of the service `uid`.
    pub fn slots_of(&self, uid: &str) -> Option<Arc<dyn HasSlots>> {
        self.services
            .get(uid)
            .map(|service| -> Arc<dyn HasSlots> { service })
    }

    /// Whether `uid` names a registered object or service.
    pub fn contains(&self, uid: &str) -> bool {
        self.services.contains(uid) || self.objects.contains(uid)
    }
}
