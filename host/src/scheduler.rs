//! Cancellable timers backed by tokio tasks.

use std::time::Duration;

use tokio::task::JoinHandle;

/// A callback scheduled on the tokio runtime. Cancelling or dropping the
/// handle aborts the task, so the callback never runs after its owner is
/// gone.
#[derive(Debug)]
pub struct ScheduledCallback {
    handle: JoinHandle<()>,
}

impl ScheduledCallback {
    /// Run `callback` once after `delay`.
    pub fn after(delay: Duration, callback: impl FnOnce() + Send + 'static) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        Self { handle }
    }

    /// Run `callback` every `period`, starting one period from now.
    pub fn every(period: Duration, mut callback: impl FnMut() + Send + 'static) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                callback();
            }
        });
        Self { handle }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Whether a one-shot callback has run (or the timer was cancelled).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledCallback {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
