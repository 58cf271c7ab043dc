//! Execution contexts: workers, timers and task futures.

mod active;
mod future;
mod timer;
mod worker;

pub use active::{ActiveWorkers, DEFAULT_WORKER};
pub use future::TaskFuture;
pub use timer::Timer;
pub use worker::{Task, Worker};
