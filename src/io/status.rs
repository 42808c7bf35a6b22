//! Phase status channel and background heartbeat
//!
//! The monitor publishes phase snapshots through a watch channel; the
//! display boundary (here, the log) observes them. Publishing never blocks
//! and requires no acknowledgment.

use crate::domain::types::Phase;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::info;

/// Create the phase channel, starting in `Monitoring`
pub fn create_status_channel() -> (StatusSender, watch::Receiver<Phase>) {
    let (tx, rx) = watch::channel(Phase::Monitoring);
    (StatusSender { tx }, rx)
}

/// Publishes phase transitions to the display boundary
pub struct StatusSender {
    tx: watch::Sender<Phase>,
}

impl StatusSender {
    /// Publish a phase change. Every transition is logged; countdown ticks
    /// log at debug to keep the info stream readable.
    pub fn set_phase(&self, phase: Phase) {
        match phase {
            Phase::Countdown(remaining) => {
                tracing::debug!(remaining = %remaining, "countdown_tick");
            }
            _ => {
                info!(phase = %phase, "phase_changed");
            }
        }
        // Receivers may all be gone during shutdown; nothing to do then
        let _ = self.tx.send(phase);
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.tx.subscribe()
    }
}

/// Background heartbeat that periodically reports the current phase.
///
/// Runs independently of the monitor loop and never blocks it; the monitor
/// respawns the reporter if it is found not running.
pub struct StatusReporter {
    rx: watch::Receiver<Phase>,
    heartbeat: Duration,
}

impl StatusReporter {
    pub fn new(rx: watch::Receiver<Phase>, heartbeat_secs: u64) -> Self {
        Self { rx, heartbeat: Duration::from_secs(heartbeat_secs) }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = interval(self.heartbeat);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = tick.tick() => {
                    let phase = *self.rx.borrow_and_update();
                    info!(phase = %phase, "status_heartbeat");
                }
            }
        }
    }
}
