//! Named execution contexts.
//!
//! A [`Worker`] owns one OS thread driving a single-threaded tokio runtime.
//! Tasks posted to it run one after another in submission order; timers
//! created on it fire on the same thread, interleaved with queued tasks.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

use futures::channel::oneshot;
use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use super::future::TaskFuture;
use crate::error::{ComError, ComResult};

/// A unit of work queued on a worker.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a worker thread. Cloning shares the same thread.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    name: String,
    tx: mpsc::UnboundedSender<Task>,
    handle: Handle,
    thread_id: ThreadId,
    shutdown: CancellationToken,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Spawns a new worker thread named `name`.
    pub fn new(name: impl Into<String>) -> ComResult<Self> {
        let name = name.into();
        let spawn_err = |reason: String| ComError::Spawn {
            name: name.clone(),
            reason,
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| spawn_err(e.to_string()))?;
        let handle = runtime.handle().clone();

        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let thread_name = name.clone();
        let token = shutdown.clone();
        let join = std::thread::Builder::new()
            .name(format!("trellis-{name}"))
            .spawn(move || run_loop(thread_name, runtime, rx, token))
            .map_err(|e| spawn_err(e.to_string()))?;
        let thread_id = join.thread().id();

        debug!(worker = %name, "Worker spawned");

        Ok(Self {
            inner: Arc::new(WorkerInner {
                name,
                tx,
                handle,
                thread_id,
                shutdown,
                join: Mutex::new(Some(join)),
            }),
        })
    }

    /// Returns the worker's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns `true` when called from this worker's thread.
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.inner.thread_id
    }

    /// Returns `true` once [`stop`](Self::stop) has been requested.
    pub fn is_stopped(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Queues a fire-and-forget task.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) -> ComResult<()> {
        if self.is_stopped() {
            return Err(ComError::WorkerStopped(self.inner.name.clone()));
        }
        self.inner
            .tx
            .send(Box::new(task))
            .map_err(|_| ComError::WorkerStopped(self.inner.name.clone()))
    }

    /// Queues a task and returns a future for its result.
    pub fn post_task<R, F>(&self, f: F) -> TaskFuture<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        match self.post(move || {
            let _ = tx.send(f());
        }) {
            Ok(()) => TaskFuture::pending(rx),
            Err(e) => TaskFuture::failed(e),
        }
    }

    /// Stops the worker once the tasks already queued have run.
    ///
    /// Blocks until the thread exits, unless called from the worker itself.
    pub fn stop(&self) {
        self.inner.shutdown.cancel();
        if !self.is_current() {
            if let Some(join) = self.inner.join.lock().take() {
                let _ = join.join();
            }
        }
    }

    pub(crate) fn runtime_handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// Returns `true` if both handles refer to the same thread.
    pub fn same_as(&self, other: &Worker) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Drop for WorkerInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if std::thread::current().id() != self.thread_id {
            if let Some(join) = self.join.get_mut().take() {
                let _ = join.join();
            }
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.inner.name)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

fn run_loop(
    name: String,
    runtime: Runtime,
    mut rx: mpsc::UnboundedReceiver<Task>,
    token: CancellationToken,
) {
    runtime.block_on(async {
        loop {
            tokio::select! {
                biased;
                task = rx.recv() => match task {
                    Some(task) => execute(&name, task),
                    None => break,
                },
                _ = token.cancelled() => break,
            }
        }
    });
    debug!(worker = %name, "Worker stopped");
}

fn execute(name: &str, task: Task) {
    trace!(worker = %name, "Running task");
    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(task)) {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(worker = %name, %reason, "Task panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_tasks_run_in_fifo_order() {
        let worker = Worker::new("fifo").unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50 {
            let order = Arc::clone(&order);
            worker.post(move || order.lock().push(i)).unwrap();
        }
        worker.post_task(|| ()).wait().unwrap();

        assert_eq!(*order.lock(), (0..50).collect::<Vec<_>>());
        worker.stop();
    }

    #[test]
    fn test_post_task_returns_value_on_worker_thread() {
        let worker = Worker::new("value").unwrap();
        let probe = worker.clone();
        let on_worker = worker.post_task(move || probe.is_current()).wait();
        assert_eq!(on_worker, Ok(true));
        assert!(!worker.is_current());
        worker.stop();
    }

    #[test]
    fn test_post_after_stop_fails() {
        let worker = Worker::new("stopped").unwrap();
        worker.stop();
        assert!(worker.is_stopped());
        assert!(matches!(
            worker.post(|| ()),
            Err(ComError::WorkerStopped(name)) if name == "stopped"
        ));
        assert_eq!(
            worker.post_task(|| 1).wait(),
            Err(ComError::WorkerStopped("stopped".into()))
        );
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let worker = Worker::new("panic").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        assert_eq!(
            worker.post_task(|| panic!("boom")).wait(),
            Err::<(), _>(ComError::TaskDropped)
        );

        let c = Arc::clone(&counter);
        worker
            .post_task(move || c.fetch_add(1, Ordering::SeqCst))
            .wait()
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        worker.stop();
    }
}
