//! Confirmation countdown before a broadcast starts
//!
//! Gives a person in the vehicle a window to abort a false alarm. The
//! countdown emits remaining-seconds ticks down to zero; cancellation can
//! arrive at any tick boundary through a watch channel.

use tokio::sync::watch;
use tokio::time::{sleep, Duration};

/// How a countdown ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownOutcome {
    /// Reached zero without cancellation; the alarm is confirmed
    Confirmed,
    /// Cancelled before reaching zero
    Cancelled,
}

/// One tick per second, counting down
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Cancellable cooperative countdown
pub struct ConfirmationTimer {
    duration_secs: u32,
}

impl ConfirmationTimer {
    pub fn new(duration_secs: u32) -> Self {
        Self { duration_secs }
    }

    /// Run the countdown. `on_tick` receives N, N-1, ..., 0 (N+1 ticks);
    /// reaching zero confirms exactly once. A true value on `cancel` stops
    /// the countdown at the next tick boundary; once the cancel sender is
    /// dropped, cancellation can no longer arrive.
    pub async fn run<F: FnMut(u32)>(
        &self,
        mut on_tick: F,
        cancel: watch::Receiver<bool>,
    ) -> CountdownOutcome {
        let cancelled = wait_for_cancel(cancel);
        tokio::pin!(cancelled);

        let mut remaining = self.duration_secs;
        loop {
            on_tick(remaining);
            if remaining == 0 {
                return CountdownOutcome::Confirmed;
            }

            tokio::select! {
                _ = &mut cancelled => return CountdownOutcome::Cancelled,
                _ = sleep(TICK_INTERVAL) => remaining -= 1,
            }
        }
    }
}

/// Resolve when the cancel channel carries true; park forever if the sender
/// goes away (a closed channel must not spin the select loop).
async fn wait_for_cancel(mut cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
