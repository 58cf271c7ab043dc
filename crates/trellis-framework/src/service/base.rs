//! The managed side of a service: identity, bindings, signals and slots.
//!
//! A [`Base`] owns one [`Service`] implementation and drives it through
//! its lifecycle (see [`detail`](super::detail) for the state machine).
//! Everything a running application wires together goes through the base:
//! object bindings, the core signals and the lifecycle slots.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, warn};
use trellis_core::{
    HasSignals, HasSlots, Proxy, SigSlotConnection, Signal, Signals, Slot, Slots, Worker,
};

use super::config::{ObjectServiceConfig, ProxyConnections, ServiceConfig};
use super::future::ServiceFuture;
use super::status::{
    Access, ConfigurationStatus, GlobalStatus, NotificationType, Status, UpdatingStatus,
};
use super::traits::{Declarations, Service, ServiceContext, group_of};
use crate::data::ObjectPtr;
use crate::error::{ServiceError, ServiceResult};

// ===== Keys =====

pub const STARTED_SIG: &str = "started";
pub const STOPPED_SIG: &str = "stopped";
pub const SWAPPED_SIG: &str = "swapped";
pub const UPDATED_SIG: &str = "updated";
pub const INFO_NOTIFIED_SIG: &str = "info_notified";
pub const SUCCESS_NOTIFIED_SIG: &str = "success_notified";
pub const FAILURE_NOTIFIED_SIG: &str = "failure_notified";
/// Emitted with the key of an output whenever it is set or reset.
pub const OUTPUT_CHANGED_SIG: &str = "output_changed";

pub const START_SLOT: &str = "start";
pub const STOP_SLOT: &str = "stop";
pub const UPDATE_SLOT: &str = "update";
pub const SWAP_KEY_SLOT: &str = "swap_key";

/// Signal type of notifications.
pub type NotificationSignal = Signal<(String,)>;

/// Slot type of `start`, `stop` and `update`.
pub type LifecycleSlot = Slot<(), ServiceResult<()>>;

/// Slot type of `swap_key`.
pub type SwapSlot = Slot<(String, Option<ObjectPtr>), ServiceResult<()>>;

// ===== Bindings =====

/// An object bound to a service key.
#[derive(Clone)]
pub struct ObjectBinding {
    /// `None` for an output not produced yet.
    pub object: Option<ObjectPtr>,
    pub access: Access,
    pub auto_connect: bool,
    pub optional: bool,
}

impl fmt::Debug for ObjectBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBinding")
            .field("object", &self.object.as_ref().map(|o| o.classname()))
            .field("access", &self.access)
            .field("auto_connect", &self.auto_connect)
            .field("optional", &self.optional)
            .finish()
    }
}

pub(super) struct CoreSignals {
    pub(super) started: Signal<()>,
    pub(super) stopped: Signal<()>,
    pub(super) swapped: Signal<()>,
    pub(super) updated: Signal<()>,
    pub(super) info_notified: NotificationSignal,
    pub(super) success_notified: NotificationSignal,
    pub(super) failure_notified: NotificationSignal,
    pub(super) output_changed: Signal<(String,)>,
}

impl CoreSignals {
    fn new(signals: &Signals) -> Self {
        Self {
            started: signals.new_signal(STARTED_SIG),
            stopped: signals.new_signal(STOPPED_SIG),
            swapped: signals.new_signal(SWAPPED_SIG),
            updated: signals.new_signal(UPDATED_SIG),
            info_notified: signals.new_signal(INFO_NOTIFIED_SIG),
            success_notified: signals.new_signal(SUCCESS_NOTIFIED_SIG),
            failure_notified: signals.new_signal(FAILURE_NOTIFIED_SIG),
            output_changed: signals.new_signal(OUTPUT_CHANGED_SIG),
        }
    }
}

pub(super) struct LifecycleSlots {
    pub(super) start: LifecycleSlot,
    pub(super) stop: LifecycleSlot,
    pub(super) update: LifecycleSlot,
    pub(super) swap_key: SwapSlot,
}

impl LifecycleSlots {
    fn new(this: &Weak<Base>, slots: &Slots) -> Self {
        let start = {
            let this = this.clone();
            slots.new_slot(START_SLOT, move |()| run_slot(&this, |b| b.run_start(true)))
        };
        let stop = {
            let this = this.clone();
            slots.new_slot(STOP_SLOT, move |()| run_slot(&this, |b| b.run_stop(true)))
        };
        let update = {
            let this = this.clone();
            slots.new_slot(UPDATE_SLOT, move |()| run_slot(&this, |b| b.run_update(true)))
        };
        let swap_key = {
            let this = this.clone();
            slots.new_slot(
                SWAP_KEY_SLOT,
                move |(key, object): (String, Option<ObjectPtr>)| {
                    run_slot(&this, |b| b.run_swap(&key, object, true))
                },
            )
        };
        Self {
            start,
            stop,
            update,
            swap_key,
        }
    }
}

fn run_slot(
    this: &Weak<Base>,
    op: impl FnOnce(&Base) -> ServiceResult<ServiceFuture>,
) -> ServiceResult<()> {
    let base = this
        .upgrade()
        .ok_or_else(|| ServiceError::custom("service no longer exists"))?;
    op(&base).map(drop)
}

fn settle(result: ServiceResult<ServiceFuture>) -> ServiceFuture {
    result.unwrap_or_else(ServiceFuture::failed)
}

// ===== Base =====

/// Work queued while the implementation is held by a hook of the same
/// thread.
pub(super) type Deferred = Box<dyn FnOnce(&Base) + Send>;

/// Clears the holder of the implementation when a hook returns or unwinds.
struct HolderGuard<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for HolderGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

/// One service instance as seen by the rest of the application.
pub struct Base {
    pub(super) id: String,
    pub(super) type_name: String,
    pub(super) this: Weak<Base>,
    pub(super) state: Mutex<Status>,
    pub(super) config: RwLock<ServiceConfig>,
    pub(super) decls: Declarations,
    pub(super) bindings: Mutex<BTreeMap<String, ObjectBinding>>,
    /// Keys of the properties this service instantiated itself.
    pub(super) created_properties: Mutex<Vec<String>>,
    pub(super) signals: Signals,
    pub(super) core: CoreSignals,
    pub(super) slots: Slots,
    pub(super) lifecycle: LifecycleSlots,
    pub(super) auto_connections: SigSlotConnection,
    pub(super) proxies: Mutex<Vec<(Arc<Proxy>, ProxyConnections)>>,
    pub(super) worker: RwLock<Option<Worker>>,
    pub(super) imp: Mutex<Box<dyn Service>>,
    /// Thread currently running a hook.
    holder: Mutex<Option<ThreadId>>,
    deferred: Mutex<Vec<Deferred>>,
}

impl Base {
    /// Wraps `imp` into a new stopped, unconfigured service.
    pub fn new(
        id: impl Into<String>,
        type_name: impl Into<String>,
        imp: Box<dyn Service>,
    ) -> Arc<Self> {
        let id = id.into();
        let type_name = type_name.into();
        let mut decls = Declarations::new();
        imp.declare(&mut decls);

        let base = Arc::new_cyclic(|this: &Weak<Base>| {
            let signals = Signals::new();
            let core = CoreSignals::new(&signals);
            let slots = Slots::new();
            let lifecycle = LifecycleSlots::new(this, &slots);
            Self {
                config: RwLock::new(ServiceConfig::new(id.clone(), type_name.clone())),
                id,
                type_name,
                this: this.clone(),
                state: Mutex::new(Status::default()),
                decls,
                bindings: Mutex::new(BTreeMap::new()),
                created_properties: Mutex::new(Vec::new()),
                signals,
                core,
                slots,
                lifecycle,
                auto_connections: SigSlotConnection::new(),
                proxies: Mutex::new(Vec::new()),
                worker: RwLock::new(None),
                imp: Mutex::new(imp),
                holder: Mutex::new(None),
                deferred: Mutex::new(Vec::new()),
            }
        });
        base.imp.lock().init_com(&base);
        debug!(service = %base.id, kind = %base.type_name, "Service created");
        base
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn declarations(&self) -> &Declarations {
        &self.decls
    }

    // ─── Status ─────────────────────────────────────────────────────────────

    pub fn global_status(&self) -> GlobalStatus {
        self.state.lock().global
    }

    pub fn configuration_status(&self) -> ConfigurationStatus {
        self.state.lock().configuration
    }

    pub fn updating_status(&self) -> UpdatingStatus {
        self.state.lock().updating
    }

    pub fn is_started(&self) -> bool {
        self.global_status() == GlobalStatus::Started
    }

    pub fn is_stopped(&self) -> bool {
        self.global_status() == GlobalStatus::Stopped
    }

    // ─── Configuration ──────────────────────────────────────────────────────

    pub fn set_config(&self, config: ServiceConfig) {
        *self.config.write() = config;
    }

    pub fn config(&self) -> ServiceConfig {
        self.config.read().clone()
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────

    /// Starts the service.
    ///
    /// Runs on the calling thread, or on the service worker when the caller
    /// is elsewhere.
    ///
    /// # Panics
    ///
    /// Panics if the service is not stopped.
    pub fn start(&self) -> ServiceFuture {
        if self.on_foreign_thread() {
            return ServiceFuture::from_task(self.lifecycle.start.async_run(()));
        }
        settle(self.run_start(false))
    }

    /// Stops the service.
    ///
    /// # Panics
    ///
    /// Panics if the service is not started.
    pub fn stop(&self) -> ServiceFuture {
        if self.on_foreign_thread() {
            return ServiceFuture::from_task(self.lifecycle.stop.async_run(()));
        }
        settle(self.run_stop(false))
    }

    /// Updates the service; does nothing unless it is started.
    ///
    /// # Panics
    ///
    /// Panics if an update is already in progress.
    pub fn update(&self) -> ServiceFuture {
        if self.on_foreign_thread() {
            return ServiceFuture::from_task(self.lifecycle.update.async_run(()));
        }
        settle(self.run_update(false))
    }

    /// Replaces the object at `key` (when given) and lets the service react.
    ///
    /// # Panics
    ///
    /// Panics if the service is not started.
    pub fn swap_key(&self, key: &str, object: Option<ObjectPtr>) -> ServiceFuture {
        if self.on_foreign_thread() {
            return ServiceFuture::from_task(
                self.lifecycle.swap_key.async_run((key.to_string(), object)),
            );
        }
        settle(self.run_swap(key, object, false))
    }

    fn on_foreign_thread(&self) -> bool {
        self.worker.read().as_ref().is_some_and(|w| !w.is_current())
    }

    // ─── Worker ─────────────────────────────────────────────────────────────

    /// Runs every slot of this service on `worker`.
    pub fn set_worker(&self, worker: Worker) {
        self.slots.set_worker(&worker);
        *self.worker.write() = Some(worker);
    }

    pub fn worker(&self) -> Option<Worker> {
        self.worker.read().clone()
    }

    // ─── Bindings ───────────────────────────────────────────────────────────

    /// Binds `object` to `key`, replacing any previous binding.
    pub fn set_object(
        &self,
        key: &str,
        object: Option<ObjectPtr>,
        access: Access,
        auto_connect: bool,
        optional: bool,
    ) {
        self.bindings.lock().insert(
            key.to_string(),
            ObjectBinding {
                object,
                access,
                auto_connect,
                optional,
            },
        );
        if access == Access::Out {
            self.core.output_changed.async_emit((key.to_string(),));
        }
    }

    /// Binds an object as described by a parsed configuration entry.
    pub fn bind(&self, binding: &ObjectServiceConfig, object: Option<ObjectPtr>) {
        self.set_object(
            &binding.key,
            object,
            binding.access,
            binding.auto_connect,
            binding.optional,
        );
    }

    /// Binds a read-only object with the flags declared for `key`.
    pub fn set_input(&self, key: &str, object: ObjectPtr) {
        self.set_declared(key, Some(object), Access::In);
    }

    /// Binds a modifiable object with the flags declared for `key`.
    pub fn set_inout(&self, key: &str, object: ObjectPtr) {
        self.set_declared(key, Some(object), Access::InOut);
    }

    /// Publishes or clears an output; dependents are told through
    /// `output_changed`.
    pub fn set_output(&self, key: &str, object: Option<ObjectPtr>) {
        {
            let mut bindings = self.bindings.lock();
            let binding = bindings
                .entry(key.to_string())
                .or_insert_with(|| ObjectBinding {
                    object: None,
                    access: Access::Out,
                    auto_connect: false,
                    optional: true,
                });
            binding.object = object;
        }
        self.core.output_changed.async_emit((key.to_string(),));
    }

    fn set_declared(&self, key: &str, object: Option<ObjectPtr>, access: Access) {
        let (auto_connect, optional) = self
            .decls
            .get(key)
            .map_or((false, false), |d| (d.auto_connect, d.optional));
        self.set_object(key, object, access, auto_connect, optional);
    }

    /// Removes the binding of `key`.
    pub fn reset_object(&self, key: &str) -> Option<ObjectBinding> {
        self.bindings.lock().remove(key)
    }

    pub fn object(&self, key: &str) -> Option<ObjectPtr> {
        self.bindings.lock().get(key).and_then(|b| b.object.clone())
    }

    pub fn binding(&self, key: &str) -> Option<ObjectBinding> {
        self.bindings.lock().get(key).cloned()
    }

    /// Sorted keys of every binding.
    pub fn keys(&self) -> Vec<String> {
        self.bindings.lock().keys().cloned().collect()
    }

    /// Number of bound members of `group`.
    pub fn key_group_size(&self, group: &str) -> usize {
        self.bindings
            .lock()
            .keys()
            .filter(|k| group_of(k) == Some(group))
            .count()
    }

    /// Whether every non-optional binding and declared input is present.
    ///
    /// Properties are not checked before [`configure`](Self::configure)
    /// since it creates the missing ones.
    pub fn has_all_required_objects(&self) -> bool {
        let bindings = self.bindings.lock();
        let bound_ok = bindings
            .values()
            .all(|b| b.optional || b.object.is_some());
        let declared_ok = self
            .decls
            .iter()
            .filter(|d| !d.optional && !d.group && !d.is_property() && d.access != Access::Out)
            .all(|d| bindings.get(&d.key).is_some_and(|b| b.object.is_some()));
        bound_ok && declared_ok
    }

    /// Unbinds the properties this service created during configuration.
    pub fn release_properties(&self) {
        let keys: Vec<_> = self.created_properties.lock().drain(..).collect();
        let mut bindings = self.bindings.lock();
        for key in keys {
            bindings.remove(&key);
        }
    }

    pub fn created_properties(&self) -> Vec<String> {
        self.created_properties.lock().clone()
    }

    // ─── Signals & slots ────────────────────────────────────────────────────

    /// Creates a custom signal of this service.
    pub fn new_signal<A>(&self, key: &str) -> Signal<A>
    where
        A: Clone + Send + 'static,
    {
        self.signals.new_signal(key)
    }

    pub fn typed_signal<A>(&self, key: &str) -> Option<Signal<A>>
    where
        A: Clone + Send + 'static,
    {
        self.signals.get(key)
    }

    /// Creates a custom slot running `f` on the implementation.
    ///
    /// The slot fails if the implementation is not an `S`.
    pub fn new_slot<S, A, R>(
        &self,
        key: &str,
        f: impl Fn(&mut S, &ServiceContext<'_>, A) -> ServiceResult<R> + Send + Sync + 'static,
    ) -> Slot<A, ServiceResult<R>>
    where
        S: Service,
        A: Send + 'static,
        R: Send + 'static,
    {
        let this = self.this.clone();
        let f = Arc::new(f);
        let slot_key = key.to_string();
        let slot = Slot::new(move |args: A| {
            let base = this
                .upgrade()
                .ok_or_else(|| ServiceError::custom("service no longer exists"))?;
            if base.holds_imp() {
                let f = Arc::clone(&f);
                let key = slot_key.clone();
                base.defer(Box::new(move |base: &Base| {
                    let result = base.with_imp(|imp, ctx| call_on::<S, A, R, _>(&*f, imp, ctx, args));
                    if let Err(e) = result {
                        error!(service = %base.id(), slot = %key, error = %e, "Deferred slot failed");
                    }
                }));
                return Err(ServiceError::Deferred {
                    service: base.id().to_string(),
                    slot: slot_key.clone(),
                });
            }
            base.with_imp(|imp, ctx| call_on::<S, A, R, _>(&*f, imp, ctx, args))
        });
        slot.set_worker(self.worker());
        self.slots.insert(key, slot.clone());
        slot
    }

    /// Emits the notification signal matching `kind`.
    pub fn notify(&self, kind: NotificationType, message: impl Into<String>) {
        let signal = match kind {
            NotificationType::Info => &self.core.info_notified,
            NotificationType::Success => &self.core.success_notified,
            NotificationType::Failure => &self.core.failure_notified,
        };
        signal.async_emit((message.into(),));
    }

    /// Number of live auto-connections.
    pub fn auto_connection_count(&self) -> usize {
        self.auto_connections.len()
    }

    // ─── Proxy ──────────────────────────────────────────────────────────────

    /// Attaches this service's entries of `connections` to `proxy` while
    /// the service is started.
    pub fn add_proxy_connection(&self, proxy: &Arc<Proxy>, connections: ProxyConnections) {
        if self.is_started() {
            self.connect_proxy(proxy, &connections);
        }
        self.proxies.lock().push((Arc::clone(proxy), connections));
    }

    // ─── Implementation access ──────────────────────────────────────────────

    /// Runs `f` with exclusive access to the implementation, then runs the
    /// calls `f` deferred.
    pub(super) fn with_imp<R>(
        &self,
        f: impl FnOnce(&mut dyn Service, &ServiceContext<'_>) -> R,
    ) -> R {
        let result = {
            let mut imp = self.imp.lock();
            *self.holder.lock() = Some(thread::current().id());
            let _holder = HolderGuard(&self.holder);
            let ctx = ServiceContext::new(self);
            f(imp.as_mut(), &ctx)
        };
        self.run_deferred();
        result
    }

    /// Whether the calling thread is inside a hook of this service.
    pub(super) fn holds_imp(&self) -> bool {
        *self.holder.lock() == Some(thread::current().id())
    }

    pub(super) fn defer(&self, call: Deferred) {
        debug!(service = %self.id, "Deferring call until the running hook returns");
        self.deferred.lock().push(call);
    }

    fn run_deferred(&self) {
        loop {
            let calls = std::mem::take(&mut *self.deferred.lock());
            if calls.is_empty() {
                break;
            }
            for call in calls {
                call(self);
            }
        }
    }

    /// Runs `f` on the implementation if it is an `S`.
    pub fn with_service<S: Service, R>(&self, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        let mut imp = self.imp.lock();
        let imp: &mut dyn Any = imp.as_mut();
        imp.downcast_mut::<S>().map(f)
    }
}

/// Runs a custom slot body on the implementation if it is an `S`.
fn call_on<S, A, R, F>(
    f: &F,
    imp: &mut dyn Service,
    ctx: &ServiceContext<'_>,
    args: A,
) -> ServiceResult<R>
where
    S: Service,
    F: Fn(&mut S, &ServiceContext<'_>, A) -> ServiceResult<R>,
{
    let imp: &mut dyn Any = imp;
    let imp = imp.downcast_mut::<S>().ok_or_else(|| {
        ServiceError::custom(format!(
            "service '{}' is not a {}",
            ctx.id(),
            std::any::type_name::<S>()
        ))
    })?;
    f(imp, ctx, args)
}

impl HasSignals for Base {
    fn signals(&self) -> &Signals {
        &self.signals
    }
}

impl HasSlots for Base {
    fn slots(&self) -> &Slots {
        &self.slots
    }
}

impl Drop for Base {
    fn drop(&mut self) {
        let global = self.state.get_mut().global;
        if global != GlobalStatus::Stopped {
            warn!(service = %self.id, status = ?global, "Service dropped while not stopped");
        }
    }
}

impl fmt::Debug for Base {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = *self.state.lock();
        f.debug_struct("Base")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("global", &state.global)
            .field("configuration", &state.configuration)
            .field("keys", &self.keys())
            .finish_non_exhaustive()
    }
}
