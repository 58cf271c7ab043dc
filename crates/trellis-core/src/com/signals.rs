//! String-keyed signal containers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::signal::{Signal, SignalBase};

/// Signals of one object, by key.
#[derive(Default)]
pub struct Signals {
    signals: RwLock<HashMap<String, Arc<dyn SignalBase>>>,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `signal` under `key`, replacing any previous signal.
    pub fn insert<A>(&self, key: impl Into<String>, signal: Signal<A>)
    where
        A: Clone + Send + 'static,
    {
        self.signals.write().insert(key.into(), Arc::new(signal));
    }

    /// Creates a signal, registers it under `key` and returns it.
    pub fn new_signal<A>(&self, key: impl Into<String>) -> Signal<A>
    where
        A: Clone + Send + 'static,
    {
        let signal = Signal::new();
        self.insert(key, signal.clone());
        signal
    }

    /// Returns the typed signal under `key`, if its type matches.
    pub fn get<A>(&self, key: &str) -> Option<Signal<A>>
    where
        A: Clone + Send + 'static,
    {
        self.signals.read().get(key).and_then(|s| s.downcast())
    }

    pub fn get_base(&self, key: &str) -> Option<Arc<dyn SignalBase>> {
        self.signals.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.signals.read().contains_key(key)
    }

    /// Sorted signal keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.signals.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.signals.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.read().is_empty()
    }
}

impl std::fmt::Debug for Signals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signals").field("keys", &self.keys()).finish()
    }
}

/// An object exposing signals by key.
pub trait HasSignals: Send + Sync {
    fn signals(&self) -> &Signals;

    fn signal(&self, key: &str) -> Option<Arc<dyn SignalBase>> {
        self.signals().get_base(key)
    }
}

impl HasSignals for Signals {
    fn signals(&self) -> &Signals {
        self
    }
}
