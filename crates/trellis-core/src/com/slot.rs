//! Typed slots with optional worker affinity.
//!
//! A [`Slot<A, R>`] wraps a callable taking the argument tuple `A` and
//! returning `R`. Slots are stored type-erased as [`SlotBase`] in a
//! [`Slots`](super::Slots) container and recovered by downcasting.

use std::any::{Any, TypeId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::trace;

use crate::error::ComResult;
use crate::thread::{TaskFuture, Worker};

/// Process-unique slot identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u64);

impl SlotId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

// =============================================================================
// Slot
// =============================================================================

pub(crate) struct SlotInner<A, R> {
    id: SlotId,
    func: Box<dyn Fn(A) -> R + Send + Sync>,
    worker: RwLock<Option<Worker>>,
}

impl<A, R> SlotInner<A, R> {
    fn worker(&self) -> Option<Worker> {
        self.worker.read().clone()
    }
}

fn call<A, R>(inner: &Arc<SlotInner<A, R>>, args: A) -> ComResult<R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    match inner.worker() {
        Some(worker) if !worker.is_current() => {
            trace!(slot = %inner.id, worker = %worker.name(), "Dispatching slot synchronously");
            let inner = Arc::clone(inner);
            worker.post_task(move || (inner.func)(args)).wait()
        }
        _ => Ok((inner.func)(args)),
    }
}

fn call_async<A, R>(inner: &Arc<SlotInner<A, R>>, args: A) -> TaskFuture<R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    match inner.worker() {
        Some(worker) => {
            let inner = Arc::clone(inner);
            worker.post_task(move || (inner.func)(args))
        }
        None => TaskFuture::ready((inner.func)(args)),
    }
}

/// A callable target taking the argument tuple `A` and returning `R`.
///
/// Cloning a slot yields another handle to the same callable; signals hold
/// slots weakly, so connections die with the last handle.
pub struct Slot<A, R = ()> {
    pub(crate) inner: Arc<SlotInner<A, R>>,
}

impl<A, R> Clone for Slot<A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, R> Slot<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Creates a slot with no worker: calls run on the caller's thread.
    pub fn new(f: impl Fn(A) -> R + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(SlotInner {
                id: SlotId::next(),
                func: Box::new(f),
                worker: RwLock::new(None),
            }),
        }
    }

    /// Creates a slot bound to `worker`.
    pub fn with_worker(f: impl Fn(A) -> R + Send + Sync + 'static, worker: Worker) -> Self {
        let slot = Self::new(f);
        slot.set_worker(Some(worker));
        slot
    }

    pub fn id(&self) -> SlotId {
        self.inner.id
    }

    pub fn worker(&self) -> Option<Worker> {
        self.inner.worker()
    }

    pub fn set_worker(&self, worker: Option<Worker>) {
        *self.inner.worker.write() = worker;
    }

    /// Runs the slot and waits for its result.
    ///
    /// Executes inline when the slot has no worker or when called from its
    /// worker; otherwise posts to the worker and blocks until done.
    pub fn run(&self, args: A) -> ComResult<R> {
        call(&self.inner, args)
    }

    /// Runs the slot without waiting.
    ///
    /// The task is queued on the slot's worker; a slot without worker runs
    /// inline and returns a resolved future.
    pub fn async_run(&self, args: A) -> TaskFuture<R> {
        call_async(&self.inner, args)
    }

    pub(crate) fn runner(&self) -> std::sync::Weak<dyn SlotRun<A>> {
        let strong: Arc<dyn SlotRun<A>> = self.inner.clone();
        Arc::downgrade(&strong)
    }
}

impl<A, R> std::fmt::Debug for Slot<A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("id", &self.inner.id)
            .field("args", &std::any::type_name::<A>())
            .field("worker", &self.inner.worker().map(|w| w.name().to_string()))
            .finish()
    }
}

// =============================================================================
// Signal-side view
// =============================================================================

/// What a signal needs from a slot: run it and forget the result.
pub(crate) trait SlotRun<A>: Send + Sync {
    /// Runs synchronously, crossing to the slot's worker if needed.
    fn run_discard(self: Arc<Self>, args: A) -> ComResult<()>;

    /// Queues on the slot's worker, or runs inline without one.
    fn post_discard(self: Arc<Self>, args: A) -> ComResult<()>;
}

impl<A, R> SlotRun<A> for SlotInner<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    fn run_discard(self: Arc<Self>, args: A) -> ComResult<()> {
        call(&self, args).map(drop)
    }

    fn post_discard(self: Arc<Self>, args: A) -> ComResult<()> {
        match self.worker() {
            Some(worker) => {
                let inner = Arc::clone(&self);
                worker.post(move || {
                    (inner.func)(args);
                })
            }
            None => {
                (self.func)(args);
                Ok(())
            }
        }
    }
}

// =============================================================================
// Type-erased slot
// =============================================================================

/// A slot with its argument and return types erased.
pub trait SlotBase: Send + Sync {
    fn id(&self) -> SlotId;

    /// `TypeId` of the argument tuple.
    fn args_type(&self) -> TypeId;

    /// Readable name of the argument tuple, for diagnostics.
    fn args_name(&self) -> &'static str;

    fn worker(&self) -> Option<Worker>;

    fn set_worker(&self, worker: Option<Worker>);

    fn as_any(&self) -> &dyn Any;

    /// A boxed `Weak<dyn SlotRun<A>>` for the signal side to downcast.
    #[doc(hidden)]
    fn erased_runner(&self) -> Box<dyn Any>;
}

impl<A, R> SlotBase for Slot<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    fn id(&self) -> SlotId {
        self.inner.id
    }

    fn args_type(&self) -> TypeId {
        TypeId::of::<A>()
    }

    fn args_name(&self) -> &'static str {
        std::any::type_name::<A>()
    }

    fn worker(&self) -> Option<Worker> {
        self.inner.worker()
    }

    fn set_worker(&self, worker: Option<Worker>) {
        Slot::set_worker(self, worker);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn erased_runner(&self) -> Box<dyn Any> {
        Box::new(self.runner())
    }
}

impl dyn SlotBase {
    /// Recovers the typed slot, if `A` and `R` match.
    pub fn downcast<A, R>(&self) -> Option<Slot<A, R>>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        self.as_any().downcast_ref::<Slot<A, R>>().cloned()
    }
}
