//! Lifecycle state machine of a [`Base`].
//!
//! ```text
//!            configure()
//! Unconfigured ─────────▶ Configuring ─────────▶ Configured
//!
//!          start()                       stop()
//! Stopped ────────▶ Starting ─▶ Started ───────▶ Stopping ─▶ Stopped
//!    ▲                 │          │  ▲              │
//!    └──── failure ────┘          │  └── failure ───┘
//!                      swap_key() ▼  │
//!                               Swapping (always back to Started)
//! ```
//!
//! Every `run_*` operation executes its hook on the calling thread. With
//! `propagate` set, a hook failure is returned as the immediate `Err`;
//! otherwise it is carried by the returned [`ServiceFuture`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tracing::{debug, error, info, warn};
use trellis_core::{ConfigError, ConfigTree, HasSignals, KeyConnections, Proxy, Slot, XMLATTR};

use super::base::Base;
use super::config::ProxyConnections;
use super::future::ServiceFuture;
use super::status::{Access, ConfigurationStatus, GlobalStatus, UpdatingStatus};
use super::traits::group_of;
use crate::data::{MODIFIED_SIG, ObjectPtr};
use crate::error::{ServiceError, ServiceResult};

fn failure(err: ServiceError, propagate: bool) -> ServiceResult<ServiceFuture> {
    if propagate {
        Err(err)
    } else {
        Ok(ServiceFuture::failed(err))
    }
}

/// Property values of a service element.
///
/// Attributes of `<properties>` win over nested `<property>` elements, of
/// which only the first attribute is read.
fn collect_properties(tree: &ConfigTree) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for properties in tree.equal_range("properties") {
        if let Some(attrs) = properties.get_child_optional(XMLATTR) {
            for (key, value) in attrs.children() {
                values.insert(key.to_string(), value.data().to_string());
            }
        }
    }
    for properties in tree.equal_range("properties") {
        for property in properties.equal_range("property") {
            let first = property
                .get_child_optional(XMLATTR)
                .and_then(|attrs| attrs.children().next());
            if let Some((key, value)) = first {
                values
                    .entry(key.to_string())
                    .or_insert_with(|| value.data().to_string());
            }
        }
    }
    values
}

impl Base {
    // ===== Configure =====

    /// Applies the configuration set with [`set_config`](Self::set_config).
    pub fn configure(&self) -> ServiceResult<()> {
        self.configure_with_properties(&HashMap::new())
    }

    /// Configures the service, taking property objects from `properties`
    /// before falling back to bound or default ones.
    ///
    /// Only an unconfigured, stopped service is configured. A missing tree
    /// path is logged with the tree and swallowed; any other hook failure,
    /// a value that fails to convert included, leaves the service
    /// unconfigured and is returned.
    pub fn configure_with_properties(
        &self,
        properties: &HashMap<String, ObjectPtr>,
    ) -> ServiceResult<()> {
        {
            let mut status = self.state.lock();
            if status.configuration != ConfigurationStatus::Unconfigured {
                debug!(service = %self.id, "Service already configured");
                return Ok(());
            }
            if status.global != GlobalStatus::Stopped {
                error!(service = %self.id, "Cannot configure a service that is not stopped");
                return Ok(());
            }
            status.configuration = ConfigurationStatus::Configuring;
        }

        let tree = self.config.read().config.clone();
        let values = collect_properties(&tree);
        self.instantiate_properties(&values, properties);

        let result = self.with_imp(|imp, ctx| {
            imp.configuring(ctx)?;
            imp.configuring_with(ctx, &tree)
        });
        match result {
            Ok(()) => {}
            Err(ServiceError::Config(e @ ConfigError::PathNotFound(_))) => {
                error!(
                    service = %self.id,
                    error = %e,
                    config = %tree,
                    "Configuration error, service left misconfigured"
                );
            }
            Err(e) => {
                error!(service = %self.id, error = %e, "Failed to configure service");
                self.state.lock().configuration = ConfigurationStatus::Unconfigured;
                return Err(e);
            }
        }

        self.state.lock().configuration = ConfigurationStatus::Configured;
        debug!(service = %self.id, "Service configured");
        Ok(())
    }

    fn instantiate_properties(
        &self,
        values: &HashMap<String, String>,
        external: &HashMap<String, ObjectPtr>,
    ) {
        for decl in self.decls.properties() {
            let key = decl.key.as_str();
            let bound = self.object(key);

            let object = match (external.get(key), bound) {
                (Some(given), Some(bound)) => {
                    if !Arc::ptr_eq(given, &bound) {
                        error!(
                            service = %self.id,
                            key = %key,
                            "Property is both bound and given in the property map, using the map entry"
                        );
                    }
                    Some(Arc::clone(given))
                }
                (Some(given), None) => Some(Arc::clone(given)),
                (None, Some(_)) => None,
                (None, None) => {
                    let Some(default) = decl.default.as_ref() else {
                        continue;
                    };
                    let object = default();
                    if let Some(value) = values.get(key) {
                        match object.as_property() {
                            Some(property) => {
                                if let Err(e) = property.set_from_str(value) {
                                    error!(service = %self.id, key = %key, error = %e, "Invalid property value");
                                }
                            }
                            None => {
                                warn!(service = %self.id, key = %key, "Default object is not string-convertible")
                            }
                        }
                    }
                    self.created_properties.lock().push(key.to_string());
                    Some(object)
                }
            };
            if let Some(object) = object {
                self.set_object(key, Some(object), decl.access, true, decl.optional);
            }

            if !self.slots.contains(key) {
                let slot = Slot::new(property_slot(self.this.clone(), key.to_string()));
                slot.set_worker(self.worker());
                self.slots.insert(key, slot);
            }
        }
    }

    // ===== Start =====

    pub(crate) fn run_start(&self, propagate: bool) -> ServiceResult<ServiceFuture> {
        {
            let mut status = self.state.lock();
            assert!(
                status.global == GlobalStatus::Stopped,
                "service '{}' is not stopped",
                self.id
            );
            status.global = GlobalStatus::Starting;
        }
        self.connect_proxies();

        debug!(service = %self.id, "Starting service");
        if let Err(e) = self.with_imp(|imp, ctx| imp.starting(ctx)) {
            error!(service = %self.id, error = %e, "Failed to start service");
            self.state.lock().global = GlobalStatus::Stopped;
            self.auto_connections.disconnect();
            self.disconnect_proxies();
            return failure(e, propagate);
        }

        self.state.lock().global = GlobalStatus::Started;
        self.auto_connect();
        self.core.started.async_emit(());
        info!(service = %self.id, "Service started");
        Ok(ServiceFuture::ok())
    }

    // ===== Stop =====

    pub(crate) fn run_stop(&self, propagate: bool) -> ServiceResult<ServiceFuture> {
        {
            let mut status = self.state.lock();
            assert!(
                status.global == GlobalStatus::Started,
                "service '{}' is not started",
                self.id
            );
            status.global = GlobalStatus::Stopping;
        }
        self.auto_connections.disconnect();

        debug!(service = %self.id, "Stopping service");
        if let Err(e) = self.with_imp(|imp, ctx| imp.stopping(ctx)) {
            error!(service = %self.id, error = %e, "Failed to stop service");
            self.state.lock().global = GlobalStatus::Started;
            self.auto_connect();
            return failure(e, propagate);
        }

        self.state.lock().global = GlobalStatus::Stopped;
        self.core.stopped.async_emit(());
        self.reset_outputs();
        self.disconnect_proxies();
        info!(service = %self.id, "Service stopped");
        Ok(ServiceFuture::ok())
    }

    fn reset_outputs(&self) {
        let outputs: Vec<String> = self
            .bindings
            .lock()
            .iter()
            .filter(|(_, b)| b.access == Access::Out && b.object.is_some())
            .map(|(k, _)| k.clone())
            .collect();
        for key in outputs {
            self.set_output(&key, None);
        }
    }

    // ===== Swap =====

    /// The service is back to started whatever the hook returns; a failed
    /// swap is not followed by auto-connection.
    pub(crate) fn run_swap(
        &self,
        key: &str,
        object: Option<ObjectPtr>,
        propagate: bool,
    ) -> ServiceResult<ServiceFuture> {
        {
            let status = self.state.lock();
            assert!(
                status.global == GlobalStatus::Started,
                "service '{}' is not started",
                self.id
            );
        }
        self.auto_connections.disconnect();
        self.state.lock().global = GlobalStatus::Swapping;

        if let Some(object) = object {
            let (access, auto_connect, optional) = match self.binding(key) {
                Some(b) => (b.access, b.auto_connect, b.optional),
                None => self
                    .decls
                    .get(key)
                    .map_or((Access::In, false, false), |d| {
                        (d.access, d.auto_connect, d.optional)
                    }),
            };
            self.set_object(key, Some(object), access, auto_connect, optional);
        }

        debug!(service = %self.id, key = %key, "Swapping service");
        let result = self.with_imp(|imp, ctx| imp.swapping(ctx, key));
        self.state.lock().global = GlobalStatus::Started;
        if let Err(e) = result {
            error!(service = %self.id, key = %key, error = %e, "Failed to swap service");
            return failure(e, propagate);
        }

        self.auto_connect();
        self.core.swapped.async_emit(());
        Ok(ServiceFuture::ok())
    }

    // ===== Update =====

    pub(crate) fn run_update(&self, propagate: bool) -> ServiceResult<ServiceFuture> {
        {
            let mut status = self.state.lock();
            if status.global != GlobalStatus::Started {
                warn!(
                    service = %self.id,
                    status = ?status.global,
                    "Update ignored, service is not started"
                );
                return Ok(ServiceFuture::ok());
            }
            assert!(
                status.updating == UpdatingStatus::NotUpdating,
                "service '{}' is already updating",
                self.id
            );
            status.updating = UpdatingStatus::Updating;
        }

        let result = self.with_imp(|imp, ctx| imp.updating(ctx));
        self.state.lock().updating = UpdatingStatus::NotUpdating;
        if let Err(e) = result {
            error!(service = %self.id, error = %e, "Failed to update service");
            return failure(e, propagate);
        }

        self.core.updated.async_emit(());
        Ok(ServiceFuture::ok())
    }

    // ===== Auto-connections =====

    /// Connects every auto-connected binding to this service.
    ///
    /// Static pairs from [`Service::auto_connections`](super::Service::auto_connections)
    /// are looked up by key, then by group name; a property without static
    /// pairs connects `modified` to its own slot.
    pub(crate) fn auto_connect(&self) {
        let statics = self.imp.lock().auto_connections();
        let global = self.config.read().global_auto_connect;
        let bindings: Vec<(String, ObjectPtr, bool)> = self
            .bindings
            .lock()
            .iter()
            .filter_map(|(k, b)| b.object.clone().map(|o| (k.clone(), o, b.auto_connect)))
            .collect();

        for (key, object, auto_connect) in bindings {
            if !(auto_connect || global) {
                continue;
            }
            let declared = statics
                .get(&key)
                .or_else(|| group_of(&key).and_then(|g| statics.get(g)));
            let pairs = match declared {
                Some(pairs) => pairs.clone(),
                None if self.is_property_key(&key) => {
                    KeyConnections::from_iter([(MODIFIED_SIG, key.as_str())])
                }
                None => {
                    if auto_connect {
                        error!(
                            service = %self.id,
                            key = %key,
                            "Auto-connection requested but the service declares none for this key"
                        );
                    }
                    continue;
                }
            };

            let source: &dyn HasSignals = &*object;
            let pairs: KeyConnections = pairs
                .iter()
                .filter(|(signal, slot)| {
                    let found = source.signal(signal).is_some() && self.slots.contains(slot);
                    if !found {
                        debug!(service = %self.id, key = %key, signal = %signal, slot = %slot, "Skipping auto-connection");
                    }
                    found
                })
                .collect();
            self.auto_connections.connect_map(source, self, &pairs);
        }
        debug!(
            service = %self.id,
            count = self.auto_connections.len(),
            "Auto-connections established"
        );
    }

    fn is_property_key(&self, key: &str) -> bool {
        self.decls.get(key).is_some_and(|d| d.is_property())
    }

    // ===== Proxy =====

    pub(super) fn connect_proxy(&self, proxy: &Proxy, connections: &ProxyConnections) {
        let channel = connections.channel.as_str();
        for (_, key) in connections.signals.iter().filter(|(uid, _)| *uid == self.id) {
            match self.signals.get_base(key) {
                Some(signal) => {
                    if let Err(e) = proxy.connect_signal(channel, signal) {
                        error!(service = %self.id, channel = %channel, signal = %key, error = %e, "Cannot connect signal to channel");
                    }
                }
                None => warn!(service = %self.id, signal = %key, "No such signal for proxy channel"),
            }
        }
        for (_, key) in connections.slots.iter().filter(|(uid, _)| *uid == self.id) {
            match self.slots.get_base(key) {
                Some(slot) => {
                    if let Err(e) = proxy.connect_slot(channel, slot) {
                        error!(service = %self.id, channel = %channel, slot = %key, error = %e, "Cannot connect slot to channel");
                    }
                }
                None => warn!(service = %self.id, slot = %key, "No such slot for proxy channel"),
            }
        }
    }

    fn connect_proxies(&self) {
        for (proxy, connections) in self.proxies.lock().iter() {
            self.connect_proxy(proxy, connections);
        }
    }

    fn disconnect_proxies(&self) {
        for (proxy, connections) in self.proxies.lock().iter() {
            let channel = connections.channel.as_str();
            for (_, key) in connections.signals.iter().filter(|(uid, _)| *uid == self.id) {
                if let Some(signal) = self.signals.get_base(key)
                    && let Err(e) = proxy.disconnect_signal(channel, signal.as_ref())
                {
                    warn!(service = %self.id, channel = %channel, error = %e, "Cannot disconnect signal");
                }
            }
            for (_, key) in connections.slots.iter().filter(|(uid, _)| *uid == self.id) {
                if let Some(slot) = self.slots.get_base(key)
                    && let Err(e) = proxy.disconnect_slot(channel, slot.as_ref())
                {
                    warn!(service = %self.id, channel = %channel, error = %e, "Cannot disconnect slot");
                }
            }
        }
    }
}

/// Body of the slot created for each property key.
///
/// A property modified by a hook of its own service is handled once that
/// hook returns.
fn property_slot(this: Weak<Base>, key: String) -> impl Fn(()) + Send + Sync + 'static {
    move |()| {
        let Some(base) = this.upgrade() else {
            return;
        };
        if base.holds_imp() {
            let key = key.clone();
            base.defer(Box::new(move |base: &Base| property_set(base, &key)));
            return;
        }
        property_set(&base, &key);
    }
}

fn property_set(base: &Base, key: &str) {
    if !base.is_started() {
        return;
    }
    if let Err(e) = base.with_imp(|imp, ctx| imp.on_property_set(ctx, key)) {
        error!(service = %base.id(), key = %key, error = %e, "Property handler failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_properties_attributes_win() {
        let tree = ConfigTree::from_xml(
            r#"<service uid="s" type="T">
                 <properties level="5" name="first">
                   <property level="9"/>
                   <property color="red" ignored="x"/>
                 </properties>
               </service>"#,
        )
        .unwrap();
        let service = tree.get_child("service").unwrap();
        let values = collect_properties(service);
        assert_eq!(values.get("level").map(String::as_str), Some("5"));
        assert_eq!(values.get("name").map(String::as_str), Some("first"));
        assert_eq!(values.get("color").map(String::as_str), Some("red"));
        assert!(!values.contains_key("ignored"));
    }
}
