//! Owned, cancellable background timers.
//!
//! Each timer is a tokio task wrapped in a handle that aborts the task when
//! stopped or dropped. The tick callbacks hold only weak references to the
//! store, so a running timer never keeps a store (or the process) alive.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Periodic task that runs `tick` every `period`, starting one period from
/// now, until `tick` returns `false` or the handle is stopped.
struct PeriodicTask {
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    fn spawn<F>(runtime: &Handle, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        // tokio intervals reject a zero period.
        let period = period.max(Duration::from_millis(1));
        let handle = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !tick() {
                    break;
                }
            }
        });
        Self { handle }
    }

    fn stop(&self) {
        self.handle.abort();
    }

    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Nudges one prediction's displayed progress while the processor runs.
pub struct ProgressSimulator {
    prediction_id: String,
    task: PeriodicTask,
}

impl ProgressSimulator {
    /// Start ticking. `advance` returns `false` once the prediction has left
    /// `processing`, which ends the simulator on its own.
    pub fn start<F>(runtime: &Handle, prediction_id: &str, period: Duration, advance: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        Self {
            prediction_id: prediction_id.to_string(),
            task: PeriodicTask::spawn(runtime, period, advance),
        }
    }

    pub fn prediction_id(&self) -> &str {
        &self.prediction_id
    }

    pub fn stop(&self) {
        self.task.stop();
    }
}

/// Periodically removes aged-out terminal predictions.
pub struct CleanupSweeper {
    task: PeriodicTask,
}

impl CleanupSweeper {
    /// Start sweeping every `period`. `sweep` returns `false` once the
    /// store is gone.
    pub fn start<F>(runtime: &Handle, period: Duration, sweep: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        Self {
            task: PeriodicTask::spawn(runtime, period, sweep),
        }
    }

    pub fn stop(&self) {
        self.task.stop();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_once_per_period() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let _sweeper = CleanupSweeper::start(&Handle::current(), Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returning_false_ends_task() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let sweeper = CleanupSweeper::start(&Handle::current(), Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst) < 1
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
        assert!(!sweeper.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_ticking() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let simulator = ProgressSimulator::start(
            &Handle::current(),
            "pred-1",
            Duration::from_secs(1),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            },
        );
        assert_eq!(simulator.prediction_id(), "pred-1");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        drop(simulator);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }
}
