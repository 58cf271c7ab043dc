//! # Trellis Core
//!
//! Communication and execution primitives of the Trellis service framework.
//!
//! ## Modules
//!
//! - **Communication** ([`com`]): typed [`Slot`]s and [`Signal`]s with
//!   worker affinity, per-object [`Slots`] / [`Signals`] containers, the
//!   [`SigSlotConnection`] registry and the channel-based [`Proxy`].
//! - **Threads** ([`thread`]): [`Worker`] execution contexts, [`Timer`]s and
//!   the [`TaskFuture`] returned by asynchronous calls.
//! - **Configuration trees** ([`ptree`]): the ordered [`ConfigTree`] that
//!   services read their XML configuration from.
//!
//! ## Dispatch model
//!
//! ```text
//!                 emit()                      ┌──────────────┐
//! ┌────────┐ ───────────────▶ inline ───────▶ │ Slot (none)  │
//! │ Signal │                                  └──────────────┘
//! │        │ ──── post + wait / post ──┐      ┌──────────────┐
//! └────────┘                           └────▶ │ Worker queue │──▶ Slot
//!                                             └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use trellis_core::{Signal, Slot, Worker};
//!
//! let worker = Worker::new("io")?;
//! let print = Slot::with_worker(|(msg,): (String,)| println!("{msg}"), worker.clone());
//!
//! let said = Signal::<(String,)>::new();
//! said.connect(&print)?;
//! said.async_emit(("hello".to_string(),));
//! ```

pub mod com;
pub mod error;
pub mod ptree;
pub mod thread;

pub use com::{
    Connection, ConnectionBlocker, HasSignals, HasSlots, KeyConnections, Proxy, SigSlotConnection,
    Signal, SignalBase, SignalId, Signals, Slot, SlotBase, SlotId, Slots,
};
pub use error::{ComError, ComResult, ConfigError, ConfigResult};
pub use ptree::{ConfigTree, XMLATTR, parse_bool};
pub use thread::{ActiveWorkers, DEFAULT_WORKER, Task, TaskFuture, Timer, Worker};

/// Prelude for common imports.
pub mod prelude {
    pub use super::com::{
        Connection, HasSignals, HasSlots, KeyConnections, Signal, SignalBase, Signals, Slot,
        SlotBase, Slots,
    };
    pub use super::error::{ComError, ComResult};
    pub use super::ptree::ConfigTree;
    pub use super::thread::{TaskFuture, Worker};
}
