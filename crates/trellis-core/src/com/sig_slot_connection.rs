//! Bulk bookkeeping of signal→slot connections.

use parking_lot::Mutex;
use tracing::{debug, error};

use super::connection::Connection;
use super::signals::HasSignals;
use super::slots::HasSlots;
use crate::error::ComResult;

/// An ordered list of `(signal key, slot key)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyConnections {
    pairs: Vec<(String, String)>,
}

impl KeyConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pair; chainable.
    pub fn push(&mut self, signal: impl Into<String>, slot: impl Into<String>) -> &mut Self {
        self.pairs.push((signal.into(), slot.into()));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(s, k)| (s.as_str(), k.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl<S: Into<String>, K: Into<String>> FromIterator<(S, K)> for KeyConnections {
    fn from_iter<I: IntoIterator<Item = (S, K)>>(iter: I) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(s, k)| (s.into(), k.into()))
                .collect(),
        }
    }
}

/// Stores connections so they can be released together.
#[derive(Default)]
pub struct SigSlotConnection {
    connections: Mutex<Vec<Connection>>,
}

impl SigSlotConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects `source[signal_key]` to `target[slot_key]` and keeps the
    /// connection.
    ///
    /// # Panics
    ///
    /// Panics if either the signal or the slot does not exist.
    pub fn connect(
        &self,
        source: &dyn HasSignals,
        signal_key: &str,
        target: &dyn HasSlots,
        slot_key: &str,
    ) -> ComResult<()> {
        let signal = source.signal(signal_key);
        assert!(signal.is_some(), "signal '{signal_key}' not found");
        let slot = target.slot(slot_key);
        assert!(slot.is_some(), "slot '{slot_key}' not found");

        if let (Some(signal), Some(slot)) = (signal, slot) {
            let connection = signal.connect_base(slot.as_ref())?;
            self.connections.lock().push(connection);
            debug!(signal = %signal_key, slot = %slot_key, "Connected");
        }
        Ok(())
    }

    /// Connects every pair of `connections`; failures are logged and skipped.
    pub fn connect_map(
        &self,
        source: &dyn HasSignals,
        target: &dyn HasSlots,
        connections: &KeyConnections,
    ) {
        for (signal_key, slot_key) in connections.iter() {
            if let Err(e) = self.connect(source, signal_key, target, slot_key) {
                error!(
                    signal = %signal_key,
                    slot = %slot_key,
                    error = %e,
                    "Cannot connect signal to slot"
                );
            }
        }
    }

    /// Keeps an externally made connection.
    pub fn add(&self, connection: Connection) {
        self.connections.lock().push(connection);
    }

    /// Disconnects and forgets every stored connection.
    pub fn disconnect(&self) {
        let connections: Vec<_> = self.connections.lock().drain(..).collect();
        for connection in connections {
            connection.disconnect();
        }
    }

    /// Number of stored connections.
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }
}

impl Drop for SigSlotConnection {
    fn drop(&mut self) {
        for connection in self.connections.get_mut().drain(..) {
            connection.disconnect();
        }
    }
}

impl std::fmt::Debug for SigSlotConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigSlotConnection")
            .field("connections", &self.len())
            .finish()
    }
}
