//! Typed multicast signals.

use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{trace, warn};

use super::connection::{Connection, ConnectionInner, ConnectionOwner};
use super::slot::{Slot, SlotBase, SlotId, SlotRun};
use crate::error::{ComError, ComResult};

/// Process-unique signal identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalId(u64);

impl SignalId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

struct Entry<A> {
    connection: Arc<ConnectionInner>,
    slot_id: SlotId,
    slot: Weak<dyn SlotRun<A>>,
}

impl<A> Entry<A> {
    fn is_live(&self) -> bool {
        self.slot.strong_count() > 0
    }
}

impl<A> Clone for Entry<A> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            slot_id: self.slot_id,
            slot: self.slot.clone(),
        }
    }
}

struct SignalCore<A> {
    id: SignalId,
    entries: Mutex<Vec<Entry<A>>>,
}

impl<A: 'static> ConnectionOwner for SignalCore<A> {
    fn remove(&self, id: u64) {
        self.entries.lock().retain(|e| e.connection.id != id);
    }

    fn is_alive(&self, id: u64) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|e| e.connection.id == id && e.is_live())
    }
}

/// A multicast emitter for the argument tuple `A`.
///
/// Connections are kept in connection order. Slots are held weakly: a slot
/// dropped by its owner silently leaves the signal.
pub struct Signal<A> {
    core: Arc<SignalCore<A>>,
}

impl<A> Clone for Signal<A> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<A> Default for Signal<A>
where
    A: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Signal<A>
where
    A: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            core: Arc::new(SignalCore {
                id: SignalId::next(),
                entries: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> SignalId {
        self.core.id
    }

    /// Connects a slot taking the same arguments.
    ///
    /// The slot's return value is discarded on emission.
    pub fn connect<R>(&self, slot: &Slot<A, R>) -> ComResult<Connection>
    where
        R: Send + 'static,
    {
        self.attach(slot.id(), slot.runner())
    }

    /// Connects a type-erased slot, checking its argument types.
    pub fn connect_base(&self, slot: &dyn SlotBase) -> ComResult<Connection> {
        let runner = self.runner_of(slot)?;
        self.attach(slot.id(), runner)
    }

    /// Disconnects `slot`. Disconnecting a slot that is not connected is a
    /// no-op.
    pub fn disconnect<R>(&self, slot: &Slot<A, R>)
    where
        R: Send + 'static,
    {
        self.detach(slot.id());
    }

    /// Type-checked counterpart of [`disconnect`](Self::disconnect).
    pub fn disconnect_base(&self, slot: &dyn SlotBase) -> ComResult<()> {
        self.check_args(slot)?;
        self.detach(slot.id());
        Ok(())
    }

    /// Disconnects every slot.
    pub fn disconnect_all(&self) {
        self.core.entries.lock().clear();
    }

    /// Number of connections whose slot is still alive.
    pub fn num_connections(&self) -> usize {
        let mut entries = self.core.entries.lock();
        entries.retain(Entry::is_live);
        entries.len()
    }

    /// Returns the connection to `slot`, if any.
    pub fn connection(&self, slot: &dyn SlotBase) -> Option<Connection> {
        self.core
            .entries
            .lock()
            .iter()
            .find(|e| e.slot_id == slot.id() && e.is_live())
            .map(|e| Connection::new(&e.connection))
    }

    /// Calls every unblocked slot and waits for each.
    ///
    /// Slots bound to another worker are dispatched there; the emitter
    /// blocks until each has run.
    pub fn emit(&self, args: A) {
        for entry in self.snapshot() {
            if entry.connection.is_blocked() {
                continue;
            }
            let Some(slot) = entry.slot.upgrade() else {
                continue;
            };
            if let Err(e) = slot.run_discard(args.clone()) {
                warn!(slot = %entry.slot_id, error = %e, "Signal emission failed");
            }
        }
    }

    /// Queues a call to every unblocked slot without waiting.
    ///
    /// Calls to slots on the same worker keep emission order. A slot with
    /// no worker runs inline.
    pub fn async_emit(&self, args: A) {
        for entry in self.snapshot() {
            if entry.connection.is_blocked() {
                continue;
            }
            let Some(slot) = entry.slot.upgrade() else {
                continue;
            };
            if let Err(e) = slot.post_discard(args.clone()) {
                warn!(slot = %entry.slot_id, error = %e, "Asynchronous emission failed");
            }
        }
    }

    fn snapshot(&self) -> Vec<Entry<A>> {
        let mut entries = self.core.entries.lock();
        entries.retain(Entry::is_live);
        entries.clone()
    }

    fn attach(&self, slot_id: SlotId, runner: Weak<dyn SlotRun<A>>) -> ComResult<Connection> {
        let mut entries = self.core.entries.lock();
        entries.retain(Entry::is_live);
        if entries.iter().any(|e| e.slot_id == slot_id) {
            return Err(ComError::AlreadyConnected);
        }

        let core: Arc<dyn ConnectionOwner> = self.core.clone();
        let inner = ConnectionInner::new(Arc::downgrade(&core));
        let connection = Connection::new(&inner);
        entries.push(Entry {
            connection: inner,
            slot_id,
            slot: runner,
        });
        trace!(slot = %slot_id, "Slot connected");
        Ok(connection)
    }

    fn detach(&self, slot_id: SlotId) {
        self.core.entries.lock().retain(|e| e.slot_id != slot_id);
    }

    fn check_args(&self, slot: &dyn SlotBase) -> ComResult<()> {
        if slot.args_type() == TypeId::of::<A>() {
            Ok(())
        } else {
            Err(ComError::BadSlot {
                expected: std::any::type_name::<A>(),
                got: slot.args_name(),
            })
        }
    }

    fn runner_of(&self, slot: &dyn SlotBase) -> ComResult<Weak<dyn SlotRun<A>>> {
        self.check_args(slot)?;
        slot.erased_runner()
            .downcast::<Weak<dyn SlotRun<A>>>()
            .map(|boxed| *boxed)
            .map_err(|_| ComError::BadSlot {
                expected: std::any::type_name::<A>(),
                got: slot.args_name(),
            })
    }
}

impl<A> std::fmt::Debug for Signal<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.core.id)
            .field("args", &std::any::type_name::<A>())
            .field("connections", &self.core.entries.lock().len())
            .finish()
    }
}

// =============================================================================
// Type-erased signal
// =============================================================================

/// A signal with its argument type erased.
pub trait SignalBase: Send + Sync {
    fn id(&self) -> SignalId;

    fn args_type(&self) -> TypeId;

    fn args_name(&self) -> &'static str;

    fn connect_base(&self, slot: &dyn SlotBase) -> ComResult<Connection>;

    fn disconnect_base(&self, slot: &dyn SlotBase) -> ComResult<()>;

    fn num_connections(&self) -> usize;

    fn as_any(&self) -> &dyn Any;
}

impl<A> SignalBase for Signal<A>
where
    A: Clone + Send + 'static,
{
    fn id(&self) -> SignalId {
        self.core.id
    }

    fn args_type(&self) -> TypeId {
        TypeId::of::<A>()
    }

    fn args_name(&self) -> &'static str {
        std::any::type_name::<A>()
    }

    fn connect_base(&self, slot: &dyn SlotBase) -> ComResult<Connection> {
        Signal::connect_base(self, slot)
    }

    fn disconnect_base(&self, slot: &dyn SlotBase) -> ComResult<()> {
        Signal::disconnect_base(self, slot)
    }

    fn num_connections(&self) -> usize {
        Signal::num_connections(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn SignalBase {
    /// Recovers the typed signal, if `A` matches.
    pub fn downcast<A>(&self) -> Option<Signal<A>>
    where
        A: Clone + Send + 'static,
    {
        self.as_any().downcast_ref::<Signal<A>>().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::Worker;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_slot(hits: &Arc<AtomicUsize>) -> Slot<(i32,)> {
        let hits = Arc::clone(hits);
        Slot::new(move |(n,): (i32,)| {
            hits.fetch_add(n as usize, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_emit_reaches_connected_slots_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let signal = Signal::<(i32,)>::new();
        let slots: Vec<_> = (0..3)
            .map(|i| {
                let order = Arc::clone(&order);
                Slot::new(move |(n,): (i32,)| order.lock().push(i * 10 + n))
            })
            .collect();
        for slot in &slots {
            signal.connect(slot).unwrap();
        }

        signal.emit((1,));
        assert_eq!(*order.lock(), vec![1, 11, 21]);
        assert_eq!(signal.num_connections(), 3);
    }

    #[test]
    fn test_duplicate_connection_is_rejected() {
        let hits = Arc::new(AtomicUsize::new(0));
        let signal = Signal::<(i32,)>::new();
        let slot = counter_slot(&hits);

        signal.connect(&slot).unwrap();
        assert_eq!(signal.connect(&slot).unwrap_err(), ComError::AlreadyConnected);
        assert_eq!(signal.num_connections(), 1);
    }

    #[test]
    fn test_connect_base_checks_arguments() {
        let signal = Signal::<(i32,)>::new();
        let wrong = Slot::new(|(_s,): (String,)| ());
        let err = signal.connect_base(&wrong).unwrap_err();
        assert!(matches!(err, ComError::BadSlot { .. }));
        assert!(matches!(
            signal.disconnect_base(&wrong),
            Err(ComError::BadSlot { .. })
        ));

        let hits = Arc::new(AtomicUsize::new(0));
        let right = counter_slot(&hits);
        signal.connect_base(&right).unwrap();
        signal.emit((2,));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let hits = Arc::new(AtomicUsize::new(0));
        let signal = Signal::<(i32,)>::new();
        let slot = counter_slot(&hits);
        let connection = signal.connect(&slot).unwrap();

        assert!(!connection.expired());
        connection.disconnect();
        assert!(connection.expired());
        connection.disconnect();
        signal.disconnect(&slot);

        signal.emit((1,));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(signal.num_connections(), 0);
    }

    #[test]
    fn test_dropped_slot_leaves_signal() {
        let hits = Arc::new(AtomicUsize::new(0));
        let signal = Signal::<(i32,)>::new();
        let slot = counter_slot(&hits);
        let connection = signal.connect(&slot).unwrap();

        drop(slot);
        assert!(connection.expired());
        assert_eq!(signal.num_connections(), 0);
        signal.emit((1,));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_blocked_connection_skips_delivery() {
        let hits = Arc::new(AtomicUsize::new(0));
        let signal = Signal::<(i32,)>::new();
        let slot = counter_slot(&hits);
        let connection = signal.connect(&slot).unwrap();

        {
            let _outer = connection.blocker();
            let mut inner = connection.blocker();
            signal.emit((1,));
            inner.reset();
            assert!(connection.is_blocked());
            signal.emit((1,));
        }
        assert!(!connection.is_blocked());
        signal.emit((1,));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connection_lookup_and_disconnect_all() {
        let hits = Arc::new(AtomicUsize::new(0));
        let signal = Signal::<(i32,)>::new();
        let a = counter_slot(&hits);
        let b = counter_slot(&hits);
        signal.connect(&a).unwrap();
        assert!(signal.connection(&a).is_some());
        assert!(signal.connection(&b).is_none());

        signal.connect(&b).unwrap();
        signal.disconnect_all();
        assert_eq!(signal.num_connections(), 0);
        assert!(signal.connection(&a).is_none());
    }

    #[test]
    fn test_async_emit_runs_on_slot_worker_in_order() {
        let worker = Worker::new("signal-async").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let signal = Signal::<(i32,)>::new();

        let recorder = {
            let seen = Arc::clone(&seen);
            let probe = worker.clone();
            Slot::with_worker(
                move |(n,): (i32,)| seen.lock().push((n, probe.is_current())),
                worker.clone(),
            )
        };
        signal.connect(&recorder).unwrap();

        for n in 0..10 {
            signal.async_emit((n,));
        }
        worker.post_task(|| ()).wait().unwrap();

        let seen = seen.lock().clone();
        assert_eq!(seen.iter().map(|(n, _)| *n).collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());
        assert!(seen.iter().all(|(_, on_worker)| *on_worker));
        worker.stop();
    }

    #[test]
    fn test_downcast_from_base() {
        let signal = Signal::<()>::new();
        let base: Arc<dyn SignalBase> = Arc::new(signal.clone());
        assert_eq!(base.id(), signal.id());
        assert!(base.downcast::<()>().is_some());
        assert!(base.downcast::<(i32,)>().is_none());
    }
}
