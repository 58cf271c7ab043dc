//! String-keyed slot containers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::slot::{Slot, SlotBase};
use crate::thread::Worker;

/// Slots of one object, by key.
#[derive(Default)]
pub struct Slots {
    slots: RwLock<HashMap<String, Arc<dyn SlotBase>>>,
}

impl Slots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `slot` under `key`, replacing any previous slot.
    pub fn insert<A, R>(&self, key: impl Into<String>, slot: Slot<A, R>)
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        self.slots.write().insert(key.into(), Arc::new(slot));
    }

    /// Creates a slot from `f`, registers it under `key` and returns it.
    pub fn new_slot<A, R>(
        &self,
        key: impl Into<String>,
        f: impl Fn(A) -> R + Send + Sync + 'static,
    ) -> Slot<A, R>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        let slot = Slot::new(f);
        self.insert(key, slot.clone());
        slot
    }

    /// Returns the typed slot under `key`, if its types match.
    pub fn get<A, R>(&self, key: &str) -> Option<Slot<A, R>>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        self.slots.read().get(key).and_then(|s| s.downcast())
    }

    pub fn get_base(&self, key: &str) -> Option<Arc<dyn SlotBase>> {
        self.slots.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.read().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Arc<dyn SlotBase>> {
        self.slots.write().remove(key)
    }

    /// Sorted slot keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.slots.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Binds every slot to `worker`.
    pub fn set_worker(&self, worker: &Worker) {
        for slot in self.slots.read().values() {
            slot.set_worker(Some(worker.clone()));
        }
    }
}

impl std::fmt::Debug for Slots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slots").field("keys", &self.keys()).finish()
    }
}

/// An object exposing slots by key.
pub trait HasSlots: Send + Sync {
    fn slots(&self) -> &Slots;

    fn slot(&self, key: &str) -> Option<Arc<dyn SlotBase>> {
        self.slots().get_base(key)
    }
}

impl HasSlots for Slots {
    fn slots(&self) -> &Slots {
        self
    }
}
