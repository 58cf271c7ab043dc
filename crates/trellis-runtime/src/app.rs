//! Application manager.
//!
//! An [`AppManager`] turns an XML application description into live objects,
//! services and proxy channels, then drives them through their lifecycle:
//!
//! ```text
//!             create()            start()
//! Destroyed ───────────▶ Created ─────────▶ Started
//!     ▲                     │                 │  ▲
//!     │      destroy()      │                 │  │ start()
//!     └─────────────────────┴── Stopped ◀─────┘  │
//!                               │      stop()    │
//!                               └────────────────┘
//! ```
//!
//! The description is a `<config>` element:
//!
//! ```xml
//! <config>
//!   <object uid="threshold" type="Integer" value="3"/>
//!   <service uid="reader" type="io::Reader" worker="io">
//!     <inout key="value" uid="threshold"/>
//!   </service>
//!   <connect channel="c1"><signal>reader/updated</signal><slot>writer/update</slot></connect>
//!   <start uid="reader"/>
//!   <update uid="reader"/>
//! </config>
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use trellis_core::{ConfigError, ConfigTree};
use trellis_framework::AppContext;
use trellis_framework::ParseError;
use trellis_framework::helper::{
    connect_proxy, disconnect_proxies, parse_connections2, parse_service,
};
use trellis_framework::service::{
    Access, Base, ProxyConnections, ProxyConnectionsMap, ServiceConfig, ServiceFuture,
};

use crate::error::{RuntimeError, RuntimeResult};

/// Values substituted for `${name}` in an application description.
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// Lifecycle state of an [`AppManager`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AppState {
    #[default]
    Destroyed,
    Created,
    Started,
    Stopped,
}

/// Builds and runs one application description.
#[derive(Debug)]
pub struct AppManager {
    id: String,
    ctx: Arc<AppContext>,
    config: ConfigTree,
    state: AppState,
    /// Uids of the objects this manager registered.
    created_objects: Vec<String>,
    created_services: Vec<Arc<Base>>,
    started: Vec<Arc<Base>>,
    /// Channel entries whose ends are objects, connected while the
    /// application lives.
    object_connections: Vec<ProxyConnections>,
    /// The connected copy of `object_connections`, under the app id.
    object_proxies: ProxyConnectionsMap,
    /// Channel entries whose ends are services, by service uid.
    service_proxies: HashMap<String, Vec<ProxyConnections>>,
    proxy_counter: usize,
}

impl AppManager {
    pub fn new(id: impl Into<String>, ctx: Arc<AppContext>) -> Self {
        Self {
            id: id.into(),
            ctx,
            config: ConfigTree::new(),
            state: AppState::Destroyed,
            created_objects: Vec::new(),
            created_services: Vec::new(),
            started: Vec::new(),
            object_connections: Vec::new(),
            object_proxies: ProxyConnectionsMap::new(),
            service_proxies: HashMap::new(),
            proxy_counter: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> AppState {
        self.state
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// The `<config>` element being managed.
    pub fn config(&self) -> &ConfigTree {
        &self.config
    }

    pub fn has_config(&self) -> bool {
        !self.config.is_empty()
    }

    /// Services started by this manager, in start order.
    pub fn started_services(&self) -> &[Arc<Base>] {
        &self.started
    }

    // ─── Configuration ──────────────────────────────────────────────────────

    /// Sets the `<config>` element, substituting `parameters` first.
    ///
    /// # Panics
    ///
    /// Panics if the application is created.
    pub fn set_config(&mut self, mut config: ConfigTree, parameters: &Parameters) {
        assert!(
            self.state == AppState::Destroyed,
            "app '{}' must be destroyed before it is reconfigured",
            self.id
        );
        substitute_parameters(&mut config, parameters);
        self.config = config;
    }

    /// Parses an XML document whose root element is the application.
    pub fn load_xml(&mut self, xml: &str, parameters: &Parameters) -> RuntimeResult<()> {
        let document = ConfigTree::from_xml(xml)?;
        let Some((name, root)) = document.children().next() else {
            return Err(ConfigError::Xml("document has no root element".into()).into());
        };
        if name != "config" {
            debug!(app = %self.id, root = %name, "Application root element is not <config>");
        }
        self.set_config(root.clone(), parameters);
        Ok(())
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────

    /// Creates, starts and updates the application.
    pub fn launch(&mut self) -> RuntimeResult<()> {
        self.create()?;
        self.start()?;
        self.update()
    }

    /// Stops then destroys the application. Destruction happens even if a
    /// service fails to stop; the first failure is returned.
    pub fn stop_and_destroy(&mut self) -> RuntimeResult<()> {
        let stopped = match self.state {
            AppState::Started => self.stop(),
            _ => Ok(()),
        };
        if self.state != AppState::Destroyed {
            self.destroy();
        }
        stopped
    }

    /// Creates the objects, channels and services of the description.
    ///
    /// On failure everything created so far is released again.
    ///
    /// # Panics
    ///
    /// Panics if the application is already created.
    pub fn create(&mut self) -> RuntimeResult<()> {
        assert!(
            self.state == AppState::Destroyed,
            "app '{}' is already created",
            self.id
        );
        let config = self.config.clone();
        let created = self
            .create_objects(&config)
            .and_then(|()| self.create_connections(&config))
            .and_then(|()| self.create_services(&config));
        if let Err(e) = created {
            error!(app = %self.id, error = %e, "Failed to create application");
            self.release();
            return Err(e);
        }

        self.state = AppState::Created;
        info!(
            app = %self.id,
            objects = self.created_objects.len(),
            services = self.created_services.len(),
            "Application created"
        );
        Ok(())
    }

    /// Starts the services listed in `<start>` items, in document order.
    ///
    /// # Panics
    ///
    /// Panics if the application is neither created nor stopped.
    pub fn start(&mut self) -> RuntimeResult<()> {
        assert!(
            matches!(self.state, AppState::Created | AppState::Stopped),
            "app '{}' must be created before it starts",
            self.id
        );
        let services = self.items("start")?;

        self.connect_object_proxies();
        let pending: Vec<ServiceFuture> = services.iter().map(|s| s.start()).collect();
        self.started = services;
        self.state = AppState::Started;

        let result = wait_all(pending);
        info!(app = %self.id, services = self.started.len(), "Application started");
        result
    }

    /// Updates the services listed in `<update>` items.
    pub fn update(&self) -> RuntimeResult<()> {
        let services = self.items("update")?;
        wait_all(services.iter().map(|s| s.update()).collect())
    }

    /// Stops started services in reverse start order and detaches object
    /// channels.
    ///
    /// # Panics
    ///
    /// Panics if the application is not started.
    pub fn stop(&mut self) -> RuntimeResult<()> {
        assert!(
            self.state == AppState::Started,
            "app '{}' is not started",
            self.id
        );
        disconnect_proxies(&self.ctx, &self.id, &mut self.object_proxies);

        let mut pending = Vec::new();
        for service in self.started.drain(..).rev() {
            if service.is_stopped() {
                warn!(app = %self.id, service = %service.id(), "Service already stopped");
            } else {
                pending.push(service.stop());
            }
        }
        self.state = AppState::Stopped;

        let result = wait_all(pending);
        self.ctx.key_props_cache().clear();
        info!(app = %self.id, "Application stopped");
        result
    }

    /// Unregisters everything [`create`](Self::create) registered.
    ///
    /// # Panics
    ///
    /// Panics if the application is started.
    pub fn destroy(&mut self) {
        assert!(
            matches!(self.state, AppState::Created | AppState::Stopped),
            "app '{}' is not stopped",
            self.id
        );
        self.release();
        self.state = AppState::Destroyed;
        info!(app = %self.id, "Application destroyed");
    }

    // ─── Creation ───────────────────────────────────────────────────────────

    fn create_objects(&mut self, config: &ConfigTree) -> RuntimeResult<()> {
        for elem in config.equal_range("object") {
            self.create_object(elem)?;
        }
        Ok(())
    }

    fn create_object(&mut self, elem: &ConfigTree) -> RuntimeResult<()> {
        let uid = required(elem, "uid", &self.id)?;
        let type_name = elem.attr("type").filter(|t| !t.is_empty());

        match elem.attr("src").unwrap_or("new") {
            "new" => {
                let type_name = type_name.ok_or_else(|| ParseError::MissingAttribute {
                    context: format!("{}: object '{uid}'", self.id),
                    attribute: "type",
                })?;
                if self.ctx.contains(uid) {
                    return Err(RuntimeError::DuplicateUid(uid.to_string()));
                }
                let object = self.ctx.data_factory().create(type_name)?;
                if let Some(value) = elem.attr("value") {
                    let property =
                        object
                            .as_property()
                            .ok_or_else(|| RuntimeError::NotAProperty {
                                context: self.id.clone(),
                                uid: uid.to_string(),
                                classname: type_name.to_string(),
                            })?;
                    property.set_from_str(value)?;
                }
                self.ctx.objects().register(uid, object);
                self.created_objects.push(uid.to_string());
                debug!(app = %self.id, uid = %uid, type_name = %type_name, "Created object");
            }
            "ref" => {
                let object =
                    self.ctx
                        .objects()
                        .get(uid)
                        .ok_or_else(|| RuntimeError::UnknownObject {
                            context: self.id.clone(),
                            uid: uid.to_string(),
                        })?;
                if let Some(expected) = type_name
                    && object.classname() != expected
                {
                    return Err(RuntimeError::ObjectType {
                        context: self.id.clone(),
                        uid: uid.to_string(),
                        expected: expected.to_string(),
                        actual: object.classname().to_string(),
                    });
                }
                debug!(app = %self.id, uid = %uid, "Referenced existing object");
            }
            mode => {
                return Err(RuntimeError::BuildMode {
                    context: format!("{}: object '{uid}'", self.id),
                    mode: mode.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Splits every `<connect>` between the objects side, connected here,
    /// and the services side, handed to each service when it is created.
    fn create_connections(&mut self, config: &ConfigTree) -> RuntimeResult<()> {
        for elem in config.equal_range("connect") {
            let app_id = self.id.as_str();
            let counter = &mut self.proxy_counter;
            let connections = parse_connections2(elem, app_id, || {
                let channel = format!("Proxy_{app_id}_{counter}");
                *counter += 1;
                channel
            })?;

            let mut objects_side = ProxyConnections::new(connections.channel.clone());
            for (uid, key) in &connections.signals {
                if self.ctx.objects().contains(uid) {
                    objects_side.add_signal(uid, key);
                } else {
                    self.service_channel(uid, &connections.channel)
                        .add_signal(uid, key);
                }
            }
            for (uid, key) in &connections.slots {
                if self.ctx.objects().contains(uid) {
                    objects_side.add_slot(uid, key);
                } else {
                    self.service_channel(uid, &connections.channel)
                        .add_slot(uid, key);
                }
            }

            if !objects_side.is_empty() {
                self.object_connections.push(objects_side);
            }
        }
        self.connect_object_proxies();
        Ok(())
    }

    fn service_channel(&mut self, uid: &str, channel: &str) -> &mut ProxyConnections {
        let list = self.service_proxies.entry(uid.to_string()).or_default();
        match list.iter().position(|c| c.channel == channel) {
            Some(index) => &mut list[index],
            None => {
                list.push(ProxyConnections::new(channel));
                let last = list.len() - 1;
                &mut list[last]
            }
        }
    }

    fn connect_object_proxies(&mut self) {
        if self.object_proxies.contains_key(&self.id) {
            return;
        }
        for connections in &self.object_connections {
            connect_proxy(&self.ctx, connections);
        }
        self.object_proxies
            .insert(self.id.clone(), self.object_connections.clone());
    }

    fn create_services(&mut self, config: &ConfigTree) -> RuntimeResult<()> {
        for elem in config.equal_range("service") {
            let service_config = parse_service(&self.ctx, elem, &self.id)?;
            self.create_service(service_config)?;
        }
        for list in config.equal_range("serviceList") {
            self.create_services(list)?;
        }
        Ok(())
    }

    fn create_service(&mut self, config: ServiceConfig) -> RuntimeResult<Arc<Base>> {
        if self.ctx.contains(&config.uid) {
            return Err(RuntimeError::DuplicateUid(config.uid));
        }
        let service = self
            .ctx
            .service_factory()
            .create(&config.type_name, &config.uid)?;
        self.ctx.services().register(&config.uid, Arc::clone(&service));
        self.created_services.push(Arc::clone(&service));

        if let Some(name) = &config.worker {
            service.set_worker(self.ctx.workers().get_or_create(name)?);
        }

        for binding in &config.objects {
            let object = self.ctx.objects().get(&binding.uid);
            if object.is_none() && !binding.optional {
                return Err(RuntimeError::UnknownObject {
                    context: format!("{}: when creating service '{}'", self.id, config.uid),
                    uid: binding.uid.clone(),
                });
            }
            if object.is_some() && binding.access != Access::Out {
                service.bind(binding, object);
            }
        }

        if let Some(list) = self.service_proxies.get(&config.uid) {
            for connections in list {
                service.add_proxy_connection(self.ctx.proxy(), connections.clone());
            }
        }

        let uid = config.uid.clone();
        service.set_config(config);
        service.configure()?;
        debug!(app = %self.id, service = %uid, type_name = %service.type_name(), "Created service");
        Ok(service)
    }

    // ─── Helpers ────────────────────────────────────────────────────────────

    /// Resolves the services named by `<kind uid="…"/>` items.
    fn items(&self, kind: &str) -> RuntimeResult<Vec<Arc<Base>>> {
        self.config
            .equal_range(kind)
            .map(|item| {
                let uid = required(item, "uid", &self.id)?;
                self.ctx
                    .services()
                    .get(uid)
                    .ok_or_else(|| RuntimeError::UnknownService {
                        context: format!("{}: <{kind}>", self.id),
                        uid: uid.to_string(),
                    })
            })
            .collect()
    }

    /// Detaches channels, stops what still runs, unregisters every uid this
    /// manager created.
    fn release(&mut self) {
        disconnect_proxies(&self.ctx, &self.id, &mut self.object_proxies);

        for service in self.created_services.drain(..).rev() {
            if service.is_started() {
                warn!(app = %self.id, service = %service.id(), "Stopping service left running");
                if let Err(e) = service.stop().wait() {
                    error!(app = %self.id, service = %service.id(), error = %e, "Failed to stop service");
                }
            }
            service.release_properties();
            self.ctx.services().unregister(service.id());
        }
        for uid in self.created_objects.drain(..) {
            self.ctx.objects().unregister(&uid);
        }

        self.started.clear();
        self.object_connections.clear();
        self.service_proxies.clear();
        self.proxy_counter = 0;
    }
}

impl Drop for AppManager {
    fn drop(&mut self) {
        if self.state == AppState::Destroyed {
            return;
        }
        warn!(app = %self.id, state = ?self.state, "Application dropped before being destroyed");
        if self.state == AppState::Started
            && let Err(e) = self.stop()
        {
            error!(app = %self.id, error = %e, "Failed to stop application");
        }
        self.release();
    }
}

fn required<'a>(elem: &'a ConfigTree, attribute: &'static str, app: &str) -> RuntimeResult<&'a str> {
    elem.attr(attribute)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            ParseError::MissingAttribute {
                context: app.to_string(),
                attribute,
            }
            .into()
        })
}

/// Waits for every future, then returns the first failure.
fn wait_all(pending: Vec<ServiceFuture>) -> RuntimeResult<()> {
    let results = futures::executor::block_on(futures::future::join_all(pending));
    let mut first = None;
    for result in results {
        if let Err(e) = result {
            error!(error = %e, "Service operation failed");
            first.get_or_insert(e);
        }
    }
    match first {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Replaces `${name}` with the matching parameter in every value of `tree`.
///
/// String parameters are inserted as is, other JSON values in their JSON
/// spelling. Unknown names are left untouched.
pub fn substitute_parameters(tree: &mut ConfigTree, parameters: &Parameters) {
    if parameters.is_empty() {
        return;
    }
    tree.for_each_data_mut(&mut |value| {
        if !value.contains("${") {
            return;
        }
        for (name, replacement) in parameters {
            let pattern = format!("${{{name}}}");
            if value.contains(&pattern) {
                let text = match replacement {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                *value = value.replace(&pattern, &text);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_parameters() {
        let mut tree = ConfigTree::from_xml(
            r#"<config><object uid="${prefix}.count" type="Integer" value="${initial}"/><label>${missing}</label></config>"#,
        )
        .unwrap();
        let mut parameters = Parameters::new();
        parameters.insert("prefix".into(), serde_json::json!("viewer"));
        parameters.insert("initial".into(), serde_json::json!(7));
        substitute_parameters(&mut tree, &parameters);

        let config = tree.get_child("config").unwrap();
        let object = config.get_child("object").unwrap();
        assert_eq!(object.attr("uid"), Some("viewer.count"));
        assert_eq!(object.attr("value"), Some("7"));
        assert_eq!(config.get::<String>("label").unwrap(), "${missing}");
    }

    #[test]
    fn test_load_xml_takes_root_element() {
        let mut app = AppManager::new("app", Arc::new(AppContext::new()));
        app.load_xml(r#"<config><start uid="a"/></config>"#, &Parameters::new())
            .unwrap();
        assert!(app.has_config());
        assert_eq!(app.config().count("start"), 1);
        assert_eq!(app.state(), AppState::Destroyed);
    }

    #[test]
    fn test_empty_application_lifecycle() {
        let mut app = AppManager::new("empty", Arc::new(AppContext::new()));
        app.load_xml("<config/>", &Parameters::new()).unwrap();
        app.launch().unwrap();
        assert_eq!(app.state(), AppState::Started);
        app.stop_and_destroy().unwrap();
        assert_eq!(app.state(), AppState::Destroyed);
    }

    #[test]
    #[should_panic(expected = "is not started")]
    fn test_stop_before_start_panics() {
        let mut app = AppManager::new("idle", Arc::new(AppContext::new()));
        app.create().unwrap();
        app.stop().unwrap();
    }
}
