//! Lifecycle behaviour of services driven through `Base`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Barrier, mpsc};
use std::time::Duration;

use parking_lot::Mutex;
use trellis_core::{ConfigError, Slot, Worker};
use trellis_framework::data::downcast;
use trellis_framework::prelude::*;
use trellis_framework::service::{
    ConfigurationStatus, FAILURE_NOTIFIED_SIG, GlobalStatus, STARTED_SIG, STOPPED_SIG,
    SWAPPED_SIG, ServiceConfig, UPDATE_SLOT, UPDATED_SIG,
};

// ─── Fixtures ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct Shared {
    events: Mutex<Vec<String>>,
    fail_starting: AtomicBool,
    fail_stopping: AtomicBool,
    starting_thread: Mutex<Option<String>>,
}

impl Shared {
    fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }
}

struct Recorder(Arc<Shared>);

impl Service for Recorder {
    fn declare(&self, decls: &mut Declarations) {
        decls
            .input("source", false, true)
            .output("result")
            .property("level", || Arc::new(Integer::new(3)));
    }

    fn starting(&mut self, ctx: &ServiceContext<'_>) -> ServiceResult<()> {
        self.0.push("starting");
        *self.0.starting_thread.lock() = std::thread::current().name().map(str::to_string);
        if self.0.fail_starting.load(Ordering::SeqCst) {
            return Err(ServiceError::custom("cannot start"));
        }
        ctx.set_output("result", Some(Arc::new(Integer::new(7))));
        Ok(())
    }

    fn stopping(&mut self, _ctx: &ServiceContext<'_>) -> ServiceResult<()> {
        self.0.push("stopping");
        if self.0.fail_stopping.load(Ordering::SeqCst) {
            return Err(ServiceError::custom("cannot stop"));
        }
        Ok(())
    }

    fn updating(&mut self, _ctx: &ServiceContext<'_>) -> ServiceResult<()> {
        self.0.push("updating");
        Ok(())
    }

    fn on_property_set(&mut self, _ctx: &ServiceContext<'_>, key: &str) -> ServiceResult<()> {
        self.0.push(format!("property:{key}"));
        Ok(())
    }

    fn auto_connections(&self) -> KeyConnectionsMap {
        let mut map = KeyConnectionsMap::new();
        map.insert(
            "source".into(),
            KeyConnections::from_iter([(MODIFIED_SIG, UPDATE_SLOT)]),
        );
        map
    }
}

fn recorder() -> (Arc<Base>, Arc<Shared>) {
    let shared = Arc::new(Shared::default());
    let base = Base::new("probe", "test::Recorder", Box::new(Recorder(Arc::clone(&shared))));
    (base, shared)
}

fn auto_connected(base: &Base) {
    let mut config = ServiceConfig::new(base.id(), base.type_name());
    config.global_auto_connect = true;
    base.set_config(config);
}

/// Records every emission of `key` into the shared event log.
fn listen(base: &Base, key: &'static str, shared: &Arc<Shared>) -> Slot<()> {
    let shared = Arc::clone(shared);
    let slot = Slot::new(move |()| shared.push(key));
    base.typed_signal::<()>(key).unwrap().connect(&slot).unwrap();
    slot
}

// ─── Lifecycle ──────────────────────────────────────────────────────────────

#[test]
fn test_configure_start_stop_emits_started_then_stopped() {
    let (base, shared) = recorder();
    let _started = listen(&base, STARTED_SIG, &shared);
    let _stopped = listen(&base, STOPPED_SIG, &shared);

    base.configure().unwrap();
    base.start().wait().unwrap();
    base.stop().wait().unwrap();

    assert_eq!(base.global_status(), GlobalStatus::Stopped);
    assert_eq!(base.configuration_status(), ConfigurationStatus::Configured);
    let signals: Vec<String> = shared
        .events
        .lock()
        .iter()
        .filter(|e| *e == STARTED_SIG || *e == STOPPED_SIG)
        .cloned()
        .collect();
    assert_eq!(signals, vec![STARTED_SIG, STOPPED_SIG]);
}

#[test]
fn test_update_when_not_started_is_noop() {
    let (base, shared) = recorder();
    let _updated = listen(&base, UPDATED_SIG, &shared);

    let future = base.update();
    assert!(future.is_ready());
    assert!(future.wait().is_ok());
    assert_eq!(shared.count("updating"), 0);
    assert_eq!(shared.count(UPDATED_SIG), 0);
}

#[test]
fn test_update_emits_updated() {
    let (base, shared) = recorder();
    let _updated = listen(&base, UPDATED_SIG, &shared);

    base.start().wait().unwrap();
    base.update().wait().unwrap();
    base.update().wait().unwrap();
    assert_eq!(shared.count("updating"), 2);
    assert_eq!(shared.count(UPDATED_SIG), 2);
    base.stop().wait().unwrap();
}

#[test]
#[should_panic(expected = "is not stopped")]
fn test_double_start_panics() {
    let (base, _shared) = recorder();
    base.start().wait().unwrap();
    let _ = base.start();
}

#[test]
#[should_panic(expected = "is not started")]
fn test_stop_without_start_panics() {
    let (base, _shared) = recorder();
    let _ = base.stop();
}

#[test]
fn test_starting_failure_reverts_to_stopped() {
    let (base, shared) = recorder();
    auto_connected(&base);
    let source = Arc::new(Integer::new(0));
    base.set_input("source", source.clone());
    base.configure().unwrap();
    shared.fail_starting.store(true, Ordering::SeqCst);

    let err = base.start().wait().unwrap_err();
    assert_eq!(err.to_string(), "cannot start");
    assert_eq!(base.global_status(), GlobalStatus::Stopped);
    assert_eq!(base.auto_connection_count(), 0);
    assert_eq!(source.modified_signal().num_connections(), 0);

    source.modified_signal().emit(());
    let level = downcast::<Integer>(&base.object("level").unwrap()).unwrap();
    level.modified_signal().emit(());
    assert_eq!(shared.count("updating"), 0);
    assert_eq!(shared.count("property:level"), 0);
}

#[test]
fn test_stopping_failure_reverts_to_started() {
    let (base, shared) = recorder();
    auto_connected(&base);
    base.set_input("source", Arc::new(Integer::new(0)));
    base.configure().unwrap();
    base.start().wait().unwrap();
    assert!(base.object("result").is_some());
    let connections = base.auto_connection_count();
    assert_eq!(connections, 2);

    shared.fail_stopping.store(true, Ordering::SeqCst);
    assert!(base.stop().wait().is_err());
    assert_eq!(base.global_status(), GlobalStatus::Started);
    assert!(base.object("result").is_some());
    assert_eq!(base.auto_connection_count(), connections);

    shared.fail_stopping.store(false, Ordering::SeqCst);
    base.stop().wait().unwrap();
    assert!(base.object("result").is_none());
}

#[test]
fn test_property_initialised_from_configuration() {
    let (base, _shared) = recorder();
    let tree = ConfigTree::from_xml(
        r#"<service uid="probe" type="test::Recorder"><properties level="42"/></service>"#,
    )
    .unwrap();
    let mut config = ServiceConfig::new("probe", "test::Recorder");
    config.config = tree.get_child("service").unwrap().clone();
    base.set_config(config);

    base.configure().unwrap();

    assert_eq!(base.global_status(), GlobalStatus::Stopped);
    let level = downcast::<Integer>(&base.object("level").unwrap()).unwrap();
    assert_eq!(level.value(), 42);
    assert_eq!(base.created_properties(), vec!["level"]);

    base.release_properties();
    assert!(base.object("level").is_none());
}

#[test]
fn test_property_reuses_bound_object() {
    let (base, _shared) = recorder();
    let level = Arc::new(Integer::new(9));
    base.set_input("level", level.clone());
    base.configure().unwrap();

    let bound = downcast::<Integer>(&base.object("level").unwrap()).unwrap();
    assert!(Arc::ptr_eq(&bound, &level));
    assert!(base.created_properties().is_empty());
}

#[test]
fn test_property_modification_reaches_hook() {
    let (base, shared) = recorder();
    base.configure().unwrap();
    let level = downcast::<Integer>(&base.object("level").unwrap()).unwrap();

    base.start().wait().unwrap();
    level.set_value(5);
    level.modified_signal().emit(());
    assert_eq!(shared.count("property:level"), 1);

    base.stop().wait().unwrap();
    level.modified_signal().emit(());
    assert_eq!(shared.count("property:level"), 1);
}

#[test]
fn test_repeated_cycles_leave_no_connections() {
    let (base, _shared) = recorder();
    auto_connected(&base);
    let source = Arc::new(Integer::new(0));
    base.set_input("source", source.clone());
    base.configure().unwrap();

    for _ in 0..2 {
        base.start().wait().unwrap();
        assert_eq!(base.auto_connection_count(), 2);
        assert_eq!(source.modified_signal().num_connections(), 1);
        base.stop().wait().unwrap();
        assert_eq!(base.auto_connection_count(), 0);
        assert_eq!(source.modified_signal().num_connections(), 0);
    }
}

#[test]
fn test_modified_triggers_update_while_started() {
    let (base, shared) = recorder();
    auto_connected(&base);
    let source = Arc::new(Integer::new(0));
    base.set_input("source", source.clone());
    base.configure().unwrap();
    base.start().wait().unwrap();

    for _ in 0..3 {
        source.modified_signal().emit(());
    }
    assert_eq!(shared.count("updating"), 3);

    base.stop().wait().unwrap();
    source.modified_signal().emit(());
    assert_eq!(shared.count("updating"), 3);
}

#[test]
fn test_binding_without_auto_connect_is_not_wired() {
    let (base, shared) = recorder();
    let source = Arc::new(Integer::new(0));
    base.set_input("source", source.clone());
    base.start().wait().unwrap();

    source.modified_signal().emit(());
    assert_eq!(shared.count("updating"), 0);
    base.stop().wait().unwrap();
}

// ─── Hooks touching their own service ─────────────────────────────────────

/// Bumps its own `level` property and pokes its own `bump` slot while
/// updating.
struct SelfTuning(Arc<Shared>);

impl Service for SelfTuning {
    fn declare(&self, decls: &mut Declarations) {
        decls.property("level", || Arc::new(Integer::new(1)));
    }

    fn init_com(&self, base: &Base) {
        base.new_signal::<()>("poke");
        base.new_slot("bump", |tuning: &mut SelfTuning, _ctx: &ServiceContext<'_>, (): ()| {
            tuning.0.push("bump");
            Ok(())
        });
    }

    fn starting(&mut self, _ctx: &ServiceContext<'_>) -> ServiceResult<()> {
        Ok(())
    }

    fn stopping(&mut self, _ctx: &ServiceContext<'_>) -> ServiceResult<()> {
        Ok(())
    }

    fn updating(&mut self, ctx: &ServiceContext<'_>) -> ServiceResult<()> {
        self.0.push("updating");
        let level = ctx.require::<Integer>("level")?;
        level.set_value(level.value() + 1);
        level.modified_signal().emit(());

        if let Some(poke) = ctx.signal::<()>("poke") {
            poke.emit(());
        }
        if let Some(bump) = ctx.base().slots().get::<(), ServiceResult<()>>("bump")
            && let Ok(Err(ServiceError::Deferred { slot, .. })) = bump.run(())
        {
            self.0.push(format!("deferred:{slot}"));
        }
        self.0.push("updated");
        Ok(())
    }

    fn on_property_set(&mut self, _ctx: &ServiceContext<'_>, key: &str) -> ServiceResult<()> {
        self.0.push(format!("property:{key}"));
        Ok(())
    }
}

fn self_tuning() -> (Arc<Base>, Arc<Shared>) {
    let shared = Arc::new(Shared::default());
    let base = Base::new("tuning", "test::SelfTuning", Box::new(SelfTuning(Arc::clone(&shared))));
    let bump = base.slots().get::<(), ServiceResult<()>>("bump").unwrap();
    base.typed_signal::<()>("poke").unwrap().connect(&bump).unwrap();
    (base, shared)
}

#[test]
fn test_hook_modifying_own_property_runs_slot_after_hook() {
    let (base, shared) = self_tuning();
    base.configure().unwrap();
    base.start().wait().unwrap();

    let (tx, rx) = mpsc::channel();
    let updating = Arc::clone(&base);
    std::thread::spawn(move || {
        let _ = tx.send(updating.update().wait());
    });
    rx.recv_timeout(Duration::from_secs(5))
        .expect("update did not return")
        .unwrap();

    assert_eq!(
        *shared.events.lock(),
        vec![
            "updating",
            "deferred:bump",
            "updated",
            "property:level",
            "bump",
            "bump"
        ]
    );
    let level = downcast::<Integer>(&base.object("level").unwrap()).unwrap();
    assert_eq!(level.value(), 2);

    base.update().wait().unwrap();
    assert_eq!(shared.count("property:level"), 2);
    assert_eq!(level.value(), 3);
    base.stop().wait().unwrap();
}

#[test]
fn test_hook_on_worker_modifying_own_property() {
    let (base, shared) = self_tuning();
    let worker = Worker::new("tuning").unwrap();
    base.set_worker(worker.clone());
    base.configure().unwrap();
    base.start().wait().unwrap();

    base.update().wait().unwrap();
    assert_eq!(shared.count("property:level"), 1);
    assert_eq!(shared.count("bump"), 2);

    base.stop().wait().unwrap();
    worker.stop();
}

/// Parks inside `updating` until released.
struct Parked {
    entered: Arc<Barrier>,
    release: Arc<Barrier>,
}

impl Service for Parked {
    fn starting(&mut self, _ctx: &ServiceContext<'_>) -> ServiceResult<()> {
        Ok(())
    }

    fn stopping(&mut self, _ctx: &ServiceContext<'_>) -> ServiceResult<()> {
        Ok(())
    }

    fn updating(&mut self, _ctx: &ServiceContext<'_>) -> ServiceResult<()> {
        self.entered.wait();
        self.release.wait();
        Ok(())
    }
}

/// Lets the parked update finish even when the test thread unwinds.
struct Release(Arc<Barrier>);

impl Drop for Release {
    fn drop(&mut self) {
        self.0.wait();
    }
}

#[test]
#[should_panic(expected = "is already updating")]
fn test_concurrent_update_panics() {
    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let base = Base::new(
        "parked",
        "test::Parked",
        Box::new(Parked {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        }),
    );
    base.start().wait().unwrap();

    let first = Arc::clone(&base);
    std::thread::spawn(move || {
        let _ = first.update().wait();
    });
    entered.wait();

    let _release = Release(release);
    let _ = base.update();
}

// ─── Swap ───────────────────────────────────────────────────────────────────

#[test]
fn test_swap_rebinds_and_reconnects() {
    let (base, shared) = recorder();
    auto_connected(&base);
    let _swapped = listen(&base, SWAPPED_SIG, &shared);
    let first = Arc::new(Integer::new(1));
    base.set_input("source", first.clone());
    base.start().wait().unwrap();

    let second = Arc::new(Integer::new(2));
    base.swap_key("source", Some(second.clone())).wait().unwrap();

    assert_eq!(base.global_status(), GlobalStatus::Started);
    assert_eq!(shared.count(SWAPPED_SIG), 1);
    assert_eq!(first.modified_signal().num_connections(), 0);
    second.modified_signal().emit(());
    assert_eq!(shared.count("updating"), 1);
    base.stop().wait().unwrap();
}

#[test]
fn test_failed_swap_stays_started_without_connections() {
    let (base, shared) = recorder();
    auto_connected(&base);
    base.set_input("source", Arc::new(Integer::new(1)));
    base.start().wait().unwrap();

    shared.fail_stopping.store(true, Ordering::SeqCst);
    assert!(base.swap_key("source", None).wait().is_err());
    assert_eq!(base.global_status(), GlobalStatus::Started);
    assert_eq!(base.auto_connection_count(), 0);

    shared.fail_stopping.store(false, Ordering::SeqCst);
    base.stop().wait().unwrap();
}

// ─── Workers & notifications ────────────────────────────────────────────────

#[test]
fn test_lifecycle_dispatched_to_worker() {
    let (base, shared) = recorder();
    let worker = Worker::new("lifecycle").unwrap();
    base.set_worker(worker.clone());

    base.start().wait().unwrap();
    assert!(base.is_started());
    assert_eq!(
        shared.starting_thread.lock().as_deref(),
        Some("trellis-lifecycle")
    );
    base.update().wait().unwrap();
    base.stop().wait().unwrap();
    assert!(base.is_stopped());
    worker.stop();
}

#[tokio::test]
async fn test_lifecycle_future_can_be_awaited() {
    let (base, shared) = recorder();
    let worker = Worker::new("awaited").unwrap();
    base.set_worker(worker.clone());

    base.start().await.unwrap();
    base.update().await.unwrap();
    base.stop().await.unwrap();
    assert_eq!(shared.count("updating"), 1);
    worker.stop();
}

#[test]
fn test_notify_emits_matching_signal() {
    let (base, _shared) = recorder();
    let received = Arc::new(Mutex::new(Vec::new()));
    let slot = {
        let received = Arc::clone(&received);
        Slot::new(move |(message,): (String,)| received.lock().push(message))
    };
    base.typed_signal::<(String,)>(FAILURE_NOTIFIED_SIG)
        .unwrap()
        .connect(&slot)
        .unwrap();

    base.notify(NotificationType::Failure, "disk full");
    base.notify(NotificationType::Info, "ignored");
    assert_eq!(*received.lock(), vec!["disk full"]);
}

// ─── Configuration errors ───────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Failure {
    MissingPath,
    BadValue,
    Hook,
}

struct Misconfigured {
    failure: Failure,
    configured: Arc<AtomicUsize>,
}

impl Service for Misconfigured {
    fn configuring_with(
        &mut self,
        _ctx: &ServiceContext<'_>,
        config: &ConfigTree,
    ) -> ServiceResult<()> {
        self.configured.fetch_add(1, Ordering::SeqCst);
        match self.failure {
            Failure::MissingPath => {
                config.get::<i64>("missing.value")?;
            }
            Failure::BadValue => {
                ConfigTree::from_xml("<level>high</level>")?.get::<i64>("level")?;
            }
            Failure::Hook => return Err(ServiceError::custom("fatal")),
        }
        Ok(())
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

#[test]
fn test_tree_error_is_swallowed() {
    let configured = Arc::new(AtomicUsize::new(0));
    let base = Base::new(
        "lenient",
        "test::Misconfigured",
        Box::new(Misconfigured {
            failure: Failure::MissingPath,
            configured: Arc::clone(&configured),
        }),
    );
    assert!(base.configure().is_ok());
    assert_eq!(base.configuration_status(), ConfigurationStatus::Configured);

    // Configuring twice is a no-op.
    base.configure().unwrap();
    assert_eq!(configured.load(Ordering::SeqCst), 1);
}

#[test]
fn test_other_configuration_errors_propagate() {
    let base = Base::new(
        "strict",
        "test::Misconfigured",
        Box::new(Misconfigured {
            failure: Failure::Hook,
            configured: Arc::new(AtomicUsize::new(0)),
        }),
    );
    let err = base.configure().unwrap_err();
    assert!(!matches!(err, ServiceError::Config(ConfigError::PathNotFound(_))));
    assert_eq!(err.to_string(), "fatal");
    assert_eq!(base.configuration_status(), ConfigurationStatus::Unconfigured);
}

#[test]
fn test_bad_configuration_value_propagates() {
    let base = Base::new(
        "picky",
        "test::Misconfigured",
        Box::new(Misconfigured {
            failure: Failure::BadValue,
            configured: Arc::new(AtomicUsize::new(0)),
        }),
    );
    let err = base.configure().unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Config(ConfigError::BadValue { ref value, .. }) if value == "high"
    ));
    assert_eq!(base.configuration_status(), ConfigurationStatus::Unconfigured);
}
