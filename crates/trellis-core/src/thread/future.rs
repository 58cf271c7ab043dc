//! Futures returned by asynchronous slot calls and worker tasks.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;

use crate::error::{ComError, ComResult};

/// The eventual result of a task posted to a worker, or of a call that
/// already completed inline.
///
/// Awaiting it (or calling [`wait`](Self::wait)) yields the task's return
/// value. A task whose worker stopped before running it resolves to
/// [`ComError::TaskDropped`].
#[must_use = "a task future does nothing unless awaited or waited on"]
pub struct TaskFuture<R> {
    state: State<R>,
}

enum State<R> {
    Ready(Option<R>),
    Failed(Option<ComError>),
    Pending(oneshot::Receiver<R>),
}

impl<R> TaskFuture<R> {
    /// A future that is already resolved with `value`.
    pub fn ready(value: R) -> Self {
        Self {
            state: State::Ready(Some(value)),
        }
    }

    /// A future that is already resolved with a communication error.
    pub fn failed(err: ComError) -> Self {
        Self {
            state: State::Failed(Some(err)),
        }
    }

    pub(crate) fn pending(rx: oneshot::Receiver<R>) -> Self {
        Self {
            state: State::Pending(rx),
        }
    }

    /// Returns `true` when the value is available without blocking.
    pub fn is_ready(&self) -> bool {
        !matches!(self.state, State::Pending(_))
    }

    /// Blocks the current thread until the task completes.
    ///
    /// Must not be called from the worker that runs the task.
    pub fn wait(self) -> ComResult<R> {
        futures::executor::block_on(self)
    }
}

// The result value is never pinned; only the receiver is polled.
impl<R> Unpin for TaskFuture<R> {}

impl<R> Future for TaskFuture<R> {
    type Output = ComResult<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            State::Ready(value) => match value.take() {
                Some(v) => Poll::Ready(Ok(v)),
                None => Poll::Ready(Err(ComError::TaskDropped)),
            },
            State::Failed(err) => Poll::Ready(Err(err.take().unwrap_or(ComError::TaskDropped))),
            State::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|res| res.map_err(|_| ComError::TaskDropped)),
        }
    }
}

impl<R> std::fmt::Debug for TaskFuture<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFuture")
            .field("ready", &self.is_ready())
            .finish()
    }
}
