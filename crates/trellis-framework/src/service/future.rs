//! Result handle of lifecycle operations.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use trellis_core::TaskFuture;

use crate::error::{ServiceError, ServiceResult};

/// Outcome of `start`, `stop`, `update` or `swap_key`.
///
/// Operations run on the caller's thread resolve immediately; operations
/// dispatched to the service worker resolve when the worker has run them.
#[must_use = "a lifecycle failure is only observable through this future"]
pub struct ServiceFuture {
    inner: TaskFuture<ServiceResult<()>>,
}

impl ServiceFuture {
    /// A successfully completed operation.
    pub fn ok() -> Self {
        Self::ready(Ok(()))
    }

    pub fn ready(result: ServiceResult<()>) -> Self {
        Self {
            inner: TaskFuture::ready(result),
        }
    }

    pub fn failed(err: ServiceError) -> Self {
        Self::ready(Err(err))
    }

    pub(crate) fn from_task(inner: TaskFuture<ServiceResult<()>>) -> Self {
        Self { inner }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    /// Blocks until the operation finished.
    ///
    /// Must not be called from the worker the operation was posted to.
    pub fn wait(self) -> ServiceResult<()> {
        self.inner.wait()?
    }
}

impl Future for ServiceFuture {
    type Output = ServiceResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for ServiceFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceFuture")
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{ComError, Worker};

    #[test]
    fn test_ready_outcomes() {
        assert!(ServiceFuture::ok().wait().is_ok());
        let err = ServiceFuture::failed(ServiceError::custom("boom"))
            .wait()
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_await_worker_task() {
        let worker = Worker::new("future-test").unwrap();
        let future = ServiceFuture::from_task(worker.post_task(|| Err(ServiceError::custom("late"))));
        let err = future.await.unwrap_err();
        assert_eq!(err.to_string(), "late");
        worker.stop();
    }

    #[test]
    fn test_ready_future_polls_immediately() {
        let mut fut = tokio_test::task::spawn(ServiceFuture::ok());
        assert!(tokio_test::assert_ready!(fut.poll()).is_ok());
    }

    #[test]
    fn test_dropped_task_surfaces_as_com_error() {
        let future = ServiceFuture::from_task(TaskFuture::failed(ComError::TaskDropped));
        assert!(matches!(
            future.wait(),
            Err(ServiceError::Com(ComError::TaskDropped))
        ));
    }
}
