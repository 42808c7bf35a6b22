//! Vehicle monitoring state machine
//!
//! The monitor drives the end-to-end lifecycle: watch the sensor, confirm
//! an impact through the countdown window, hand the episode to the
//! broadcast coordinator, and resume monitoring once help is on the way.
//!
//! ```text
//! Idle -> Armed -> Confirming -> Broadcasting -> Resolved -> Armed
//!   \-> ManualRestartRequired (initial sensor read failed; terminal)
//! ```
//!
//! Transient sensor errors while armed are logged and monitoring continues;
//! only the initial read failure is fatal.

use crate::domain::types::{Phase, SensorReading};
use crate::infra::config::Config;
use crate::io::sensor::SensorSource;
use crate::io::status::{StatusReporter, StatusSender};
use crate::io::transport::{RecipientDirectory, TransportError};
use crate::services::broadcast::{BroadcastCoordinator, BroadcastError};
use crate::services::countdown::{ConfirmationTimer, CountdownOutcome};
use crate::services::impact::ImpactDetector;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// Lifecycle state of the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Armed,
    Confirming,
    Broadcasting,
    Resolved,
    ManualRestartRequired,
}

/// Orchestrates detection, confirmation, and broadcast for one vehicle
pub struct MonitorLoop<S: SensorSource> {
    sensor: S,
    detector: ImpactDetector,
    coordinator: BroadcastCoordinator,
    directory: Arc<dyn RecipientDirectory>,
    status: StatusSender,
    countdown_secs: u32,
    alert_hold: Duration,
    resume_delay: Duration,
    poll_pacing: Duration,
    /// Pause between failed broadcast attempts
    attempt_retry: Duration,
    heartbeat_interval_secs: u64,
    /// External false-alarm cancellation for the countdown; the default
    /// policy never cancels
    cancel: Option<watch::Receiver<bool>>,
    /// The reading that triggered the current episode
    last_reading: Option<SensorReading>,
    /// Background status heartbeat, respawned if found not running
    status_task: Option<JoinHandle<()>>,
    shutdown: watch::Receiver<bool>,
}

impl<S: SensorSource> MonitorLoop<S> {
    pub fn new(
        config: &Config,
        sensor: S,
        coordinator: BroadcastCoordinator,
        directory: Arc<dyn RecipientDirectory>,
        status: StatusSender,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            sensor,
            detector: ImpactDetector::new(config),
            coordinator,
            directory,
            status,
            countdown_secs: config.countdown_secs(),
            alert_hold: Duration::from_millis(config.alert_hold_ms()),
            resume_delay: Duration::from_secs(config.resume_delay_secs()),
            poll_pacing: Duration::from_millis(config.sensor_poll_pacing_ms()),
            attempt_retry: Duration::from_secs(config.retry_interval_secs()),
            heartbeat_interval_secs: config.heartbeat_interval_secs(),
            cancel: None,
            last_reading: None,
            status_task: None,
            shutdown,
        }
    }

    /// Wire an external cancellation signal into the confirmation countdown
    pub fn with_cancel_signal(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Run until the shutdown signal fires (or forever)
    pub async fn run(mut self) {
        let mut state = MonitorState::Idle;
        loop {
            if *self.shutdown.borrow() {
                info!("monitor_stopped");
                return;
            }
            state = match state {
                MonitorState::Idle => self.initial_read().await,
                MonitorState::Armed => self.run_armed().await,
                MonitorState::Confirming => self.run_confirming().await,
                MonitorState::Broadcasting => self.run_broadcasting().await,
                MonitorState::Resolved => self.run_resolved().await,
                MonitorState::ManualRestartRequired => {
                    self.halt().await;
                    return;
                }
            };
        }
    }

    /// One probe read before arming; an unreachable sensor at startup needs
    /// operator intervention, not a retry loop.
    async fn initial_read(&mut self) -> MonitorState {
        match self.sensor.read().await {
            Ok(reading) => {
                info!(accel = reading.accel, "initial_sensor_read");
                MonitorState::Armed
            }
            Err(e) => {
                error!(error = %e, "initial_sensor_read_failed");
                MonitorState::ManualRestartRequired
            }
        }
    }

    async fn run_armed(&mut self) -> MonitorState {
        self.status.set_phase(Phase::Monitoring);
        let mut shutdown = self.shutdown.clone();

        loop {
            self.ensure_status_task();

            let read_result = tokio::select! {
                _ = shutdown.changed() => None,
                result = self.sensor.read() => Some(result),
            };

            let Some(result) = read_result else {
                if *shutdown.borrow() {
                    return MonitorState::Armed;
                }
                continue;
            };

            match result {
                Ok(reading) => {
                    if self.detector.classify(&reading) {
                        warn!(accel = reading.accel, "impact_detected");
                        self.last_reading = Some(reading);
                        return MonitorState::Confirming;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "sensor_read_error");
                    sleep(self.poll_pacing).await;
                }
            }
        }
    }

    async fn run_confirming(&mut self) -> MonitorState {
        self.status.set_phase(Phase::EmergencyDetected);
        sleep(self.alert_hold).await;

        // Without an external signal the countdown can never be cancelled;
        // the dropped sender parks the cancel future
        let cancel_rx = match &self.cancel {
            Some(rx) => rx.clone(),
            None => watch::channel(false).1,
        };

        let timer = ConfirmationTimer::new(self.countdown_secs);
        let status = &self.status;
        let outcome =
            timer.run(|remaining| status.set_phase(Phase::Countdown(remaining)), cancel_rx).await;

        match outcome {
            CountdownOutcome::Confirmed => MonitorState::Broadcasting,
            CountdownOutcome::Cancelled => {
                info!("alarm_cancelled");
                self.last_reading = None;
                MonitorState::Armed
            }
        }
    }

    async fn run_broadcasting(&mut self) -> MonitorState {
        self.status.set_phase(Phase::CallingForHelp);
        let reading = self
            .last_reading
            .clone()
            .unwrap_or_else(|| SensorReading::new(0, "0.0", "0.0"));

        loop {
            if *self.shutdown.borrow() {
                return MonitorState::Broadcasting;
            }
            match self.broadcast_attempt(&reading).await {
                Ok(()) => return MonitorState::Resolved,
                Err(e) => {
                    error!(error = %e, "broadcast_attempt_failed");
                    self.coordinator.abort_episode();
                    sleep(self.attempt_retry).await;
                }
            }
        }
    }

    /// One full broadcast attempt: resolve the recipient list, start the
    /// episode, message + call everyone, then retry to completion. A failure
    /// before the retry loop aborts the episode so the next attempt starts
    /// clean.
    async fn broadcast_attempt(&mut self, reading: &SensorReading) -> Result<(), BroadcastError> {
        let recipients = self.directory.list_recipients().await?;
        if recipients.is_empty() {
            return Err(BroadcastError::Transport(TransportError::InvalidResponse(
                "empty broadcast list".to_string(),
            )));
        }
        info!(recipients = recipients.len(), "broadcast_list_loaded");

        self.coordinator.start_episode(recipients.clone())?;
        self.coordinator.send_initial_message(reading).await?;
        self.coordinator.place_calls(&recipients).await?;
        self.coordinator.run_retry_loop(&mut self.sensor).await?;
        Ok(())
    }

    async fn run_resolved(&mut self) -> MonitorState {
        self.status.set_phase(Phase::HelpOnTheWay);
        if let Err(e) = self.sensor.flush() {
            warn!(error = %e, "sensor_flush_failed");
        }
        self.last_reading = None;
        sleep(self.resume_delay).await;
        MonitorState::Armed
    }

    /// Terminal state: report once, then block on the halt signal instead of
    /// spinning
    async fn halt(&mut self) {
        self.status.set_phase(Phase::ManualRestartRequired);
        error!("manual_restart_required");

        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow_and_update() {
                return;
            }
            if shutdown.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Respawn the status heartbeat if it is not running
    fn ensure_status_task(&mut self) {
        let running = self.status_task.as_ref().is_some_and(|h| !h.is_finished());
        if !running {
            let reporter =
                StatusReporter::new(self.status.subscribe(), self.heartbeat_interval_secs);
            let shutdown = self.shutdown.clone();
            self.status_task = Some(tokio::spawn(reporter.run(shutdown)));
        }
    }
}
