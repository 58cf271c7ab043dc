//! Named channels connecting signals and slots indirectly.
//!
//! Every signal registered on a channel is connected to every slot
//! registered on the same channel, whichever side joins first.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::signal::SignalBase;
use super::slot::SlotBase;
use crate::error::{ComError, ComResult};

#[derive(Default)]
struct Channel {
    signals: Vec<Arc<dyn SignalBase>>,
    slots: Vec<Arc<dyn SlotBase>>,
}

impl Channel {
    fn is_empty(&self) -> bool {
        self.signals.is_empty() && self.slots.is_empty()
    }
}

/// Registry of named channels.
#[derive(Default)]
pub struct Proxy {
    channels: RwLock<HashMap<String, Arc<Mutex<Channel>>>>,
}

fn keep_first(first: &mut Option<ComError>, result: ComResult<()>) {
    match result {
        Ok(()) | Err(ComError::AlreadyConnected) => {}
        Err(e) => {
            if first.is_none() {
                *first = Some(e);
            }
        }
    }
}

impl Proxy {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, name: &str) -> Arc<Mutex<Channel>> {
        if let Some(channel) = self.channels.read().get(name) {
            return Arc::clone(channel);
        }
        Arc::clone(self.channels.write().entry(name.to_string()).or_default())
    }

    fn prune(&self, name: &str) {
        let mut channels = self.channels.write();
        if channels.get(name).is_some_and(|c| c.lock().is_empty()) {
            channels.remove(name);
            debug!(channel = %name, "Channel removed");
        }
    }

    /// Adds `signal` to `channel` and connects it to the channel's slots.
    ///
    /// The signal stays registered even if some slots do not match; the
    /// first mismatch is returned.
    pub fn connect_signal(&self, channel: &str, signal: Arc<dyn SignalBase>) -> ComResult<()> {
        let chan = self.channel(channel);
        let mut chan = chan.lock();

        let mut first_error = None;
        for slot in &chan.slots {
            keep_first(&mut first_error, signal.connect_base(slot.as_ref()).map(drop));
        }
        if !chan.signals.iter().any(|s| s.id() == signal.id()) {
            chan.signals.push(signal);
        }
        debug!(channel = %channel, "Signal joined channel");
        first_error.map_or(Ok(()), Err)
    }

    /// Adds `slot` to `channel` and connects the channel's signals to it.
    pub fn connect_slot(&self, channel: &str, slot: Arc<dyn SlotBase>) -> ComResult<()> {
        let chan = self.channel(channel);
        let mut chan = chan.lock();

        let mut first_error = None;
        for signal in &chan.signals {
            keep_first(&mut first_error, signal.connect_base(slot.as_ref()).map(drop));
        }
        if !chan.slots.iter().any(|s| s.id() == slot.id()) {
            chan.slots.push(slot);
        }
        debug!(channel = %channel, "Slot joined channel");
        first_error.map_or(Ok(()), Err)
    }

    /// Removes `signal` from `channel`, disconnecting it from the
    /// channel's slots. Unknown channels are ignored.
    pub fn disconnect_signal(&self, channel: &str, signal: &dyn SignalBase) -> ComResult<()> {
        let Some(chan) = self.channels.read().get(channel).cloned() else {
            warn!(channel = %channel, "Disconnecting from unknown channel");
            return Ok(());
        };
        let mut first_error = None;
        {
            let mut chan = chan.lock();
            for slot in &chan.slots {
                keep_first(&mut first_error, signal.disconnect_base(slot.as_ref()));
            }
            chan.signals.retain(|s| s.id() != signal.id());
        }
        self.prune(channel);
        first_error.map_or(Ok(()), Err)
    }

    /// Removes `slot` from `channel`, disconnecting the channel's signals
    /// from it. Unknown channels are ignored.
    pub fn disconnect_slot(&self, channel: &str, slot: &dyn SlotBase) -> ComResult<()> {
        let Some(chan) = self.channels.read().get(channel).cloned() else {
            warn!(channel = %channel, "Disconnecting from unknown channel");
            return Ok(());
        };
        let mut first_error = None;
        {
            let mut chan = chan.lock();
            for signal in &chan.signals {
                keep_first(&mut first_error, signal.disconnect_base(slot));
            }
            chan.slots.retain(|s| s.id() != slot.id());
        }
        self.prune(channel);
        first_error.map_or(Ok(()), Err)
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.channels.read().contains_key(channel)
    }

    /// Sorted channel names.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<_> = self.channels.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of signals and slots registered on `channel`.
    pub fn channel_len(&self, channel: &str) -> (usize, usize) {
        self.channels
            .read()
            .get(channel)
            .map(|c| {
                let c = c.lock();
                (c.signals.len(), c.slots.len())
            })
            .unwrap_or((0, 0))
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("channels", &self.channels())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::com::{Signal, Slot};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_signal_and_slot_meet_in_channel() {
        let proxy = Proxy::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let slot = Slot::new(move |()| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let early = Signal::<()>::new();
        let late = Signal::<()>::new();

        proxy.connect_signal("c1", Arc::new(early.clone())).unwrap();
        proxy.connect_slot("c1", Arc::new(slot.clone())).unwrap();
        proxy.connect_signal("c1", Arc::new(late.clone())).unwrap();
        assert_eq!(proxy.channel_len("c1"), (2, 1));

        early.emit(());
        late.emit(());
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        proxy.disconnect_signal("c1", &early).unwrap();
        early.emit(());
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        proxy.disconnect_signal("c1", &late).unwrap();
        proxy.disconnect_slot("c1", &slot).unwrap();
        assert!(!proxy.has_channel("c1"));
        assert_eq!(late.num_connections(), 0);
    }

    #[test]
    fn test_mismatched_slot_is_reported() {
        let proxy = Proxy::new();
        let signal = Signal::<(i32,)>::new();
        let slot = Slot::new(|()| ());

        proxy.connect_signal("c", Arc::new(signal.clone())).unwrap();
        let err = proxy.connect_slot("c", Arc::new(slot)).unwrap_err();
        assert!(matches!(err, ComError::BadSlot { .. }));
        assert_eq!(proxy.channel_len("c"), (1, 1));
    }

    #[test]
    fn test_unknown_channel_disconnect_is_ignored() {
        let proxy = Proxy::new();
        let signal = Signal::<()>::new();
        assert!(proxy.disconnect_signal("nowhere", &signal).is_ok());
        assert!(proxy.channels().is_empty());
    }
}
