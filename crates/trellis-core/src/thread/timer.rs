//! Timers that fire on a worker thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use super::worker::Worker;

type TimerFn = Arc<dyn Fn() + Send + Sync>;

/// A one-shot or repeating timer whose callback runs on a [`Worker`].
///
/// The callback is executed on the worker's thread, between queued tasks,
/// so it never runs concurrently with slots bound to the same worker.
pub struct Timer {
    worker: Worker,
    state: Mutex<TimerState>,
}

struct TimerState {
    duration: Duration,
    one_shot: bool,
    function: Option<TimerFn>,
    token: Option<CancellationToken>,
    running: Arc<AtomicBool>,
}

impl Timer {
    /// Creates a stopped timer bound to `worker`.
    pub fn new(worker: &Worker) -> Self {
        Self {
            worker: worker.clone(),
            state: Mutex::new(TimerState {
                duration: Duration::from_secs(1),
                one_shot: false,
                function: None,
                token: None,
                running: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    pub fn set_duration(&self, duration: Duration) {
        self.state.lock().duration = duration;
    }

    pub fn set_one_shot(&self, one_shot: bool) {
        self.state.lock().one_shot = one_shot;
    }

    pub fn set_function(&self, f: impl Fn() + Send + Sync + 'static) {
        self.state.lock().function = Some(Arc::new(f));
    }

    /// Returns `true` while the timer is armed.
    pub fn is_running(&self) -> bool {
        self.state.lock().running.load(Ordering::Acquire)
    }

    /// Arms the timer, restarting it if it was already running.
    pub fn start(&self) {
        let mut state = self.state.lock();
        if let Some(token) = state.token.take() {
            token.cancel();
        }

        let Some(function) = state.function.clone() else {
            warn!(worker = %self.worker.name(), "Timer started without a function");
            return;
        };
        if self.worker.is_stopped() {
            warn!(worker = %self.worker.name(), "Timer started on a stopped worker");
            return;
        }

        let token = CancellationToken::new();
        let running = Arc::new(AtomicBool::new(true));
        state.token = Some(token.clone());
        state.running = Arc::clone(&running);

        let duration = state.duration;
        let one_shot = state.one_shot;
        self.worker.runtime_handle().spawn(async move {
            let mut interval = tokio::time::interval_at(
                tokio::time::Instant::now() + duration,
                duration.max(Duration::from_nanos(1)),
            );
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        trace!("Timer fired");
                        function();
                        if one_shot {
                            break;
                        }
                    }
                }
            }
            running.store(false, Ordering::Release);
        });
    }

    /// Disarms the timer. Pending expirations are discarded.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if let Some(token) = state.token.take() {
            token.cancel();
        }
        state.running.store(false, Ordering::Release);
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(token) = self.state.get_mut().token.take() {
            token.cancel();
        }
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Timer")
            .field("worker", &self.worker.name())
            .field("duration", &state.duration)
            .field("one_shot", &state.one_shot)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_one_shot_fires_once_on_worker() {
        let worker = Worker::new("timer-once").unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let on_worker = Arc::new(AtomicBool::new(false));

        let timer = Timer::new(&worker);
        timer.set_duration(Duration::from_millis(10));
        timer.set_one_shot(true);
        {
            let hits = Arc::clone(&hits);
            let on_worker = Arc::clone(&on_worker);
            let probe = worker.clone();
            timer.set_function(move || {
                hits.fetch_add(1, Ordering::SeqCst);
                on_worker.store(probe.is_current(), Ordering::SeqCst);
            });
        }
        timer.start();
        std::thread::sleep(Duration::from_millis(100));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(on_worker.load(Ordering::SeqCst));
        assert!(!timer.is_running());
        drop(timer);
        worker.stop();
    }

    #[test]
    fn test_stop_prevents_further_ticks() {
        let worker = Worker::new("timer-stop").unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let timer = Timer::new(&worker);
        timer.set_duration(Duration::from_millis(5));
        let h = Arc::clone(&hits);
        timer.set_function(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        timer.start();
        std::thread::sleep(Duration::from_millis(40));
        timer.stop();
        // Let a tick that raced with stop() drain.
        worker.post_task(|| ()).wait().unwrap();
        let after_stop = hits.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(40));

        assert!(after_stop >= 1);
        assert_eq!(hits.load(Ordering::SeqCst), after_stop);
        assert!(!timer.is_running());
        drop(timer);
        worker.stop();
    }

    #[test]
    fn test_start_without_function_is_noop() {
        let worker = Worker::new("timer-empty").unwrap();
        let timer = Timer::new(&worker);
        timer.start();
        assert!(!timer.is_running());
        drop(timer);
        worker.stop();
    }
}
