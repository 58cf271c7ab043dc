//! Registry of named workers.
//!
//! Configuration refers to workers by name (`worker="io"`); this registry
//! resolves those names, creating workers on first use.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::worker::Worker;
use crate::error::ComResult;

/// Name under which the default worker is registered.
pub const DEFAULT_WORKER: &str = "trellis::default";

/// Named workers shared by an application.
#[derive(Default)]
pub struct ActiveWorkers {
    workers: RwLock<HashMap<String, Worker>>,
}

impl ActiveWorkers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the worker registered under `name`, if any.
    pub fn get(&self, name: &str) -> Option<Worker> {
        self.workers.read().get(name).cloned()
    }

    /// Returns the worker registered under `name`, spawning it if needed.
    pub fn get_or_create(&self, name: &str) -> ComResult<Worker> {
        if let Some(worker) = self.get(name) {
            return Ok(worker);
        }
        let mut workers = self.workers.write();
        if let Some(worker) = workers.get(name) {
            return Ok(worker.clone());
        }
        let worker = Worker::new(name)?;
        workers.insert(name.to_string(), worker.clone());
        debug!(worker = %name, "Registered worker");
        Ok(worker)
    }

    /// Returns the default worker, spawning it on first use.
    pub fn default_worker(&self) -> ComResult<Worker> {
        self.get_or_create(DEFAULT_WORKER)
    }

    /// Registers an existing worker, replacing any previous one of that name.
    pub fn insert(&self, name: impl Into<String>, worker: Worker) -> Option<Worker> {
        self.workers.write().insert(name.into(), worker)
    }

    /// Names of the registered workers, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.workers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.workers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.read().is_empty()
    }

    /// Stops and removes every worker.
    pub fn clear(&self) {
        let workers: Vec<_> = self.workers.write().drain().collect();
        if !workers.is_empty() {
            info!(count = workers.len(), "Stopping workers");
        }
        for (_, worker) in workers {
            worker.stop();
        }
    }
}

impl std::fmt::Debug for ActiveWorkers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveWorkers")
            .field("workers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_reuses_worker() {
        let workers = ActiveWorkers::new();
        let a = workers.get_or_create("io").unwrap();
        let b = workers.get_or_create("io").unwrap();
        assert!(a.same_as(&b));
        assert_eq!(workers.len(), 1);
        workers.clear();
        assert!(a.is_stopped());
        assert!(workers.is_empty());
    }

    #[test]
    fn test_default_worker_is_registered() {
        let workers = ActiveWorkers::new();
        assert!(workers.get(DEFAULT_WORKER).is_none());
        let default = workers.default_worker().unwrap();
        assert_eq!(default.name(), DEFAULT_WORKER);
        assert_eq!(workers.names(), vec![DEFAULT_WORKER.to_string()]);
        workers.clear();
    }
}
