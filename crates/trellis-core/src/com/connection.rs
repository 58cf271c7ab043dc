//! Connection handles between one signal and one slot.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Operations a connection needs from the signal that owns it.
pub(crate) trait ConnectionOwner: Send + Sync {
    fn remove(&self, id: u64);
    fn is_alive(&self, id: u64) -> bool;
}

pub(crate) struct ConnectionInner {
    pub(crate) id: u64,
    blocked: AtomicUsize,
    owner: Weak<dyn ConnectionOwner>,
}

impl ConnectionInner {
    pub(crate) fn new(owner: Weak<dyn ConnectionOwner>) -> Arc<Self> {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Arc::new(Self {
            id: NEXT.fetch_add(1, Ordering::Relaxed),
            blocked: AtomicUsize::new(0),
            owner,
        })
    }

    pub(crate) fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire) > 0
    }
}

/// Handle to a signal→slot connection.
///
/// The signal owns the connection; this handle only observes it. Once the
/// connection is gone (disconnected, or either end dropped) every operation
/// is a no-op.
#[derive(Clone, Default)]
pub struct Connection {
    inner: Weak<ConnectionInner>,
}

impl Connection {
    pub(crate) fn new(inner: &Arc<ConnectionInner>) -> Self {
        Self {
            inner: Arc::downgrade(inner),
        }
    }

    /// Removes the connection from its signal. Idempotent.
    pub fn disconnect(&self) {
        if let Some(inner) = self.inner.upgrade()
            && let Some(owner) = inner.owner.upgrade()
        {
            owner.remove(inner.id);
        }
    }

    /// Returns `true` once the connection can no longer deliver calls.
    pub fn expired(&self) -> bool {
        match self.inner.upgrade() {
            Some(inner) => match inner.owner.upgrade() {
                Some(owner) => !owner.is_alive(inner.id),
                None => true,
            },
            None => true,
        }
    }

    /// Suspends delivery until a matching [`unblock`](Self::unblock).
    ///
    /// Blocks nest: a connection blocked twice needs two unblocks.
    pub fn block(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.blocked.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn unblock(&self) {
        if let Some(inner) = self.inner.upgrade() {
            let _ = inner
                .blocked
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.inner.upgrade().is_some_and(|inner| inner.is_blocked())
    }

    /// Blocks the connection for the lifetime of the returned guard.
    pub fn blocker(&self) -> ConnectionBlocker {
        self.block();
        ConnectionBlocker {
            connection: Some(self.clone()),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("expired", &self.expired())
            .field("blocked", &self.is_blocked())
            .finish()
    }
}

/// Scoped block on a [`Connection`]; unblocks on drop.
#[must_use = "the connection is unblocked as soon as the blocker is dropped"]
pub struct ConnectionBlocker {
    connection: Option<Connection>,
}

impl ConnectionBlocker {
    /// Unblocks now instead of on drop.
    pub fn reset(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.unblock();
        }
    }
}

impl Drop for ConnectionBlocker {
    fn drop(&mut self) {
        self.reset();
    }
}
