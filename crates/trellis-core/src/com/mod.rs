//! Signals, slots and the bookkeeping around their connections.
//!
//! - [`Slot`] / [`Signal`]: typed endpoints, with [`SlotBase`] /
//!   [`SignalBase`] as their type-erased forms.
//! - [`Slots`] / [`Signals`]: per-object containers keyed by string.
//! - [`SigSlotConnection`]: bulk connect/disconnect for auto-connections.
//! - [`Proxy`]: channel-based indirect wiring.

mod connection;
mod proxy;
mod sig_slot_connection;
mod signal;
mod signals;
mod slot;
mod slots;

pub use connection::{Connection, ConnectionBlocker};
pub use proxy::Proxy;
pub use sig_slot_connection::{KeyConnections, SigSlotConnection};
pub use signal::{Signal, SignalBase, SignalId};
pub use signals::{HasSignals, Signals};
pub use slot::{Slot, SlotBase, SlotId};
pub use slots::{HasSlots, Slots};
