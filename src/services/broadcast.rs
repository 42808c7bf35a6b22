//! Emergency broadcast coordination
//!
//! The coordinator owns the broadcast episode: it sends the emergency
//! message, places the voice calls, reconciles per-recipient call status
//! against the transport's call log, and retries until every recipient has
//! completed a call and the message carries real location data. There is no
//! retry cap; an emergency broadcast does not give up. Each retry round is
//! individually fault-tolerant: a failing sub-step is logged and the next
//! round proceeds.

use crate::domain::episode::BroadcastEpisode;
use crate::domain::types::{CallStatus, Recipient, SensorReading};
use crate::infra::config::Config;
use crate::io::geocode::Geocoder;
use crate::io::sensor::SensorSource;
use crate::io::transport::{NotificationTransport, TransportError};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Message sent while the GPS has no fix; a located message follows
const PLACEHOLDER_MESSAGE: &str = "Accident! Trying to get location";

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("episode already active")]
    EpisodeActive,

    #[error("no active episode")]
    NoEpisode,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Drives one emergency broadcast episode to completion
pub struct BroadcastCoordinator {
    transport: Arc<dyn NotificationTransport>,
    geocoder: Arc<dyn Geocoder>,
    /// Interval between poll-and-retry rounds
    retry_interval: Duration,
    /// Minimum spacing between consecutive call placements (transport rate limit)
    call_spacing: Duration,
    /// Minimum spacing between consecutive message sends
    message_spacing: Duration,
    /// The active episode, if a broadcast is underway
    episode: Option<BroadcastEpisode>,
}

impl BroadcastCoordinator {
    pub fn new(
        transport: Arc<dyn NotificationTransport>,
        geocoder: Arc<dyn Geocoder>,
        config: &Config,
    ) -> Self {
        Self {
            transport,
            geocoder,
            retry_interval: Duration::from_secs(config.retry_interval_secs()),
            call_spacing: Duration::from_millis(config.call_spacing_ms()),
            message_spacing: Duration::from_millis(config.message_spacing_ms()),
            episode: None,
        }
    }

    /// Begin a new episode for the given recipient set.
    /// Fails without touching existing state if an episode is still active.
    pub fn start_episode(&mut self, recipients: Vec<Recipient>) -> Result<(), BroadcastError> {
        if self.episode.is_some() {
            return Err(BroadcastError::EpisodeActive);
        }
        info!(recipients = recipients.len(), "episode_started");
        self.episode = Some(BroadcastEpisode::new(recipients));
        Ok(())
    }

    /// Discard a partially started episode so a fresh attempt can begin
    pub fn abort_episode(&mut self) {
        if self.episode.take().is_some() {
            warn!("episode_aborted");
        }
    }

    pub fn episode(&self) -> Option<&BroadcastEpisode> {
        self.episode.as_ref()
    }

    /// Compose and broadcast the emergency message to every recipient.
    ///
    /// Without a position fix the message is a placeholder and the episode
    /// is marked for an SMS retry; with a fix the message carries a map link
    /// and, when the geocoder cooperates, a street address. Also used to
    /// resend the message once coordinates resolve during the retry loop.
    pub async fn send_initial_message(
        &mut self,
        reading: &SensorReading,
    ) -> Result<(), BroadcastError> {
        let recipients = match &self.episode {
            Some(episode) => episode.recipients().to_vec(),
            None => return Err(BroadcastError::NoEpisode),
        };

        let (body, retry_pending) = match reading.position() {
            None => (PLACEHOLDER_MESSAGE.to_string(), true),
            Some((lat, lon)) => (self.compose_located_message(lat, lon).await, false),
        };

        info!(retry_pending = retry_pending, body = %body, "broadcasting_message");
        self.broadcast_message(&recipients, &body).await;

        if let Some(episode) = self.episode.as_mut() {
            episode.mark_message_sent(retry_pending);
        }
        Ok(())
    }

    /// Map link with coordinates, plus the reverse geocoded address when
    /// available. A geocoding failure degrades to coordinates only.
    async fn compose_located_message(&self, lat: &str, lon: &str) -> String {
        let mut body = format!("Accident! http://maps.google.com/maps?q={},{}", lat, lon);
        match self.geocoder.reverse_lookup(lat, lon).await {
            Ok(address) if !address.is_empty() => {
                body.push(' ');
                body.push_str(&address);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "reverse_geocode_failed"),
        }
        body
    }

    async fn broadcast_message(&self, recipients: &[Recipient], body: &str) {
        for (i, recipient) in recipients.iter().enumerate() {
            if i > 0 {
                sleep(self.message_spacing).await;
            }
            match self.transport.send_message(recipient, body).await {
                Ok(()) => info!(to = %recipient, "message_sent"),
                Err(e) => warn!(to = %recipient, error = %e, "message_send_failed"),
            }
        }
    }

    /// Place one call per target, spaced to respect the transport rate
    /// limit. A successful placement resets the recipient to Queued; a
    /// failed placement records Unknown so the status map stays total and
    /// the recipient stays in the retry set.
    pub async fn place_calls(&mut self, targets: &[Recipient]) -> Result<(), BroadcastError> {
        if self.episode.is_none() {
            return Err(BroadcastError::NoEpisode);
        }

        for (i, recipient) in targets.iter().enumerate() {
            if i > 0 {
                sleep(self.call_spacing).await;
            }
            let status = match self.transport.place_call(recipient).await {
                Ok(()) => {
                    info!(to = %recipient, "call_placed");
                    CallStatus::Queued
                }
                Err(e) => {
                    warn!(to = %recipient, error = %e, "call_place_failed");
                    CallStatus::Unknown
                }
            };
            if let Some(episode) = self.episode.as_mut() {
                episode.record_attempt(recipient, status);
            }
        }
        Ok(())
    }

    /// Pull the transport call log and reconcile per-recipient status.
    /// Only records strictly newer than the episode start are applied, so
    /// stale calls from a prior episode never leak in. Returns the set of
    /// recipients still needing a retry.
    pub async fn poll_and_reconcile(&mut self) -> Result<Vec<Recipient>, BroadcastError> {
        let started_at = match &self.episode {
            Some(episode) => episode.started_at(),
            None => return Err(BroadcastError::NoEpisode),
        };

        let records = self.transport.list_calls_since(started_at).await?;

        let episode = self.episode.as_mut().ok_or(BroadcastError::NoEpisode)?;
        for record in &records {
            if episode.apply_record(record) {
                debug!(to = %record.recipient, status = %record.status, "call_status_updated");
            }
        }
        Ok(episode.retry_set())
    }

    /// Retry until every recipient has a completed call and any pending SMS
    /// location retry has resolved. Runs forever if a recipient stays
    /// unreachable; each round's failures are contained and logged.
    pub async fn run_retry_loop<S: SensorSource>(
        &mut self,
        sensor: &mut S,
    ) -> Result<(), BroadcastError> {
        if self.episode.is_none() {
            return Err(BroadcastError::NoEpisode);
        }

        loop {
            if self.episode.as_ref().map(BroadcastEpisode::is_complete).unwrap_or(true) {
                break;
            }

            sleep(self.retry_interval).await;

            if self.episode.as_ref().is_some_and(BroadcastEpisode::sms_retry_pending) {
                self.retry_location_message(sensor).await;
            }

            match self.poll_and_reconcile().await {
                Ok(retry) if !retry.is_empty() => {
                    info!(count = retry.len(), "retrying_calls");
                    self.place_calls(&retry).await?;
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "call_status_poll_failed"),
            }
        }

        self.episode = None;
        info!("broadcast_resolved");
        Ok(())
    }

    /// Re-read the sensor looking for a position fix; once one appears the
    /// located message goes out and the SMS retry is cleared.
    async fn retry_location_message<S: SensorSource>(&mut self, sensor: &mut S) {
        match sensor.read().await {
            Ok(reading) => {
                if reading.position().is_some() {
                    if let Err(e) = self.send_initial_message(&reading).await {
                        warn!(error = %e, "located_message_resend_failed");
                    }
                } else {
                    debug!("location_still_unavailable");
                }
            }
            Err(e) => warn!(error = %e, "location_retry_sensor_error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::CallRecord;
    use crate::io::geocode::GeocodeError;
    use crate::io::sensor::SensorError;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct MockTransport {
        placed_calls: Mutex<Vec<Recipient>>,
        sent_messages: Mutex<Vec<(Recipient, String)>>,
        /// Scripted call-log pages, consumed one per poll; reads past the
        /// script return an empty page
        call_log_pages: Mutex<VecDeque<Vec<CallRecord>>>,
        /// Numbers whose place_call should fail
        failing_numbers: Vec<Recipient>,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                placed_calls: Mutex::new(Vec::new()),
                sent_messages: Mutex::new(Vec::new()),
                call_log_pages: Mutex::new(VecDeque::new()),
                failing_numbers: Vec::new(),
            }
        }

        fn with_failing_number(mut self, recipient: Recipient) -> Self {
            self.failing_numbers.push(recipient);
            self
        }

        fn push_page(&self, records: Vec<CallRecord>) {
            self.call_log_pages.lock().unwrap().push_back(records);
        }

        fn placed(&self) -> Vec<Recipient> {
            self.placed_calls.lock().unwrap().clone()
        }

        fn messages(&self) -> Vec<(Recipient, String)> {
            self.sent_messages.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationTransport for MockTransport {
        async fn send_message(&self, to: &Recipient, body: &str) -> Result<(), TransportError> {
            self.sent_messages.lock().unwrap().push((to.clone(), body.to_string()));
            Ok(())
        }

        async fn place_call(&self, to: &Recipient) -> Result<(), TransportError> {
            if self.failing_numbers.contains(to) {
                return Err(TransportError::Api { status: 500, body: "unavailable".to_string() });
            }
            self.placed_calls.lock().unwrap().push(to.clone());
            Ok(())
        }

        async fn list_calls_since(
            &self,
            _since: DateTime<Utc>,
        ) -> Result<Vec<CallRecord>, TransportError> {
            Ok(self.call_log_pages.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    struct MockGeocoder {
        address: Option<String>,
    }

    #[async_trait]
    impl Geocoder for MockGeocoder {
        async fn reverse_lookup(&self, _lat: &str, _lon: &str) -> Result<String, GeocodeError> {
            self.address.clone().ok_or(GeocodeError::NoResult)
        }
    }

    struct MockSensor {
        readings: VecDeque<SensorReading>,
    }

    #[async_trait]
    impl SensorSource for MockSensor {
        async fn read(&mut self) -> Result<SensorReading, SensorError> {
            self.readings.pop_front().ok_or(SensorError::Timeout)
        }

        fn flush(&mut self) -> Result<(), SensorError> {
            Ok(())
        }
    }

    fn recipients() -> Vec<Recipient> {
        vec![Recipient::from("+15550001"), Recipient::from("+15550002"), Recipient::from("+15550003")]
    }

    fn record(to: &str, status: CallStatus, offset_secs: i64) -> CallRecord {
        CallRecord {
            recipient: Recipient::from(to),
            status,
            started_at: Utc::now() + ChronoDuration::seconds(offset_secs),
        }
    }

    fn coordinator(
        transport: Arc<MockTransport>,
        geocoder: MockGeocoder,
    ) -> BroadcastCoordinator {
        BroadcastCoordinator::new(transport, Arc::new(geocoder), &Config::default())
    }

    #[tokio::test]
    async fn test_start_episode_twice_fails_without_resetting() {
        let transport = Arc::new(MockTransport::new());
        let mut coord = coordinator(transport, MockGeocoder { address: None });

        coord.start_episode(recipients()).unwrap();
        coord.place_calls(&[Recipient::from("+15550001")]).await.unwrap();

        let result = coord.start_episode(vec![Recipient::from("+15559999")]);
        assert!(matches!(result, Err(BroadcastError::EpisodeActive)));

        // Existing state untouched
        let episode = coord.episode().unwrap();
        assert_eq!(episode.recipients().len(), 3);
        assert_eq!(
            episode.status_of(&Recipient::from("+15550001")),
            Some(CallStatus::Queued)
        );
    }

    #[tokio::test]
    async fn test_operations_require_episode() {
        let transport = Arc::new(MockTransport::new());
        let mut coord = coordinator(transport, MockGeocoder { address: None });

        let reading = SensorReading::new(30000, "1.0", "2.0");
        assert!(matches!(
            coord.send_initial_message(&reading).await,
            Err(BroadcastError::NoEpisode)
        ));
        assert!(matches!(
            coord.place_calls(&recipients()).await,
            Err(BroadcastError::NoEpisode)
        ));
        assert!(matches!(coord.poll_and_reconcile().await, Err(BroadcastError::NoEpisode)));

        let mut sensor = MockSensor { readings: VecDeque::new() };
        assert!(matches!(
            coord.run_retry_loop(&mut sensor).await,
            Err(BroadcastError::NoEpisode)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_message_without_fix_is_placeholder() {
        let transport = Arc::new(MockTransport::new());
        let mut coord =
            coordinator(transport.clone(), MockGeocoder { address: Some("Main St 1".into()) });

        coord.start_episode(recipients()).unwrap();
        coord
            .send_initial_message(&SensorReading::new(30000, "0.0", "0.0"))
            .await
            .unwrap();

        let episode = coord.episode().unwrap();
        assert!(episode.message_sent());
        assert!(episode.sms_retry_pending());

        let messages = transport.messages();
        assert_eq!(messages.len(), 3);
        for (_, body) in &messages {
            assert_eq!(body.as_str(), PLACEHOLDER_MESSAGE);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_message_with_fix_and_address() {
        let transport = Arc::new(MockTransport::new());
        let mut coord =
            coordinator(transport.clone(), MockGeocoder { address: Some("Main St 1".into()) });

        coord.start_episode(recipients()).unwrap();
        coord
            .send_initial_message(&SensorReading::new(30000, "12.34", "56.78"))
            .await
            .unwrap();

        let episode = coord.episode().unwrap();
        assert!(!episode.sms_retry_pending());

        let (_, body) = &transport.messages()[0];
        assert!(body.contains("12.34"));
        assert!(body.contains("56.78"));
        assert!(body.contains("Main St 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_geocode_failure_degrades_to_coordinates() {
        let transport = Arc::new(MockTransport::new());
        let mut coord = coordinator(transport.clone(), MockGeocoder { address: None });

        coord.start_episode(recipients()).unwrap();
        coord
            .send_initial_message(&SensorReading::new(30000, "12.34", "56.78"))
            .await
            .unwrap();

        let episode = coord.episode().unwrap();
        assert!(!episode.sms_retry_pending());

        let (_, body) = &transport.messages()[0];
        assert!(body.contains("12.34"));
        assert!(body.contains("56.78"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_place_calls_sets_queued_and_unknown() {
        let transport = Arc::new(
            MockTransport::new().with_failing_number(Recipient::from("+15550002")),
        );
        let mut coord = coordinator(transport.clone(), MockGeocoder { address: None });

        coord.start_episode(recipients()).unwrap();
        coord.place_calls(&recipients()).await.unwrap();

        let episode = coord.episode().unwrap();
        assert_eq!(episode.status_of(&Recipient::from("+15550001")), Some(CallStatus::Queued));
        assert_eq!(episode.status_of(&Recipient::from("+15550002")), Some(CallStatus::Unknown));
        assert_eq!(episode.status_of(&Recipient::from("+15550003")), Some(CallStatus::Queued));

        // The failing number never reached the transport log
        assert_eq!(
            transport.placed(),
            vec![Recipient::from("+15550001"), Recipient::from("+15550003")]
        );
    }

    #[tokio::test]
    async fn test_poll_ignores_stale_records() {
        let transport = Arc::new(MockTransport::new());
        transport.push_page(vec![
            record("+15550001", CallStatus::Completed, -60),
            record("+15550002", CallStatus::Completed, 60),
        ]);
        let mut coord = coordinator(transport, MockGeocoder { address: None });

        coord.start_episode(recipients()).unwrap();
        let retry = coord.poll_and_reconcile().await.unwrap();

        let episode = coord.episode().unwrap();
        // Stale record dropped, fresh record applied
        assert_eq!(episode.status_of(&Recipient::from("+15550001")), None);
        assert_eq!(
            episode.status_of(&Recipient::from("+15550002")),
            Some(CallStatus::Completed)
        );
        assert_eq!(
            retry,
            vec![Recipient::from("+15550001"), Recipient::from("+15550003")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_loop_retries_only_unreached_recipients() {
        let transport = Arc::new(MockTransport::new());
        // First poll: one completed, two unanswered. Second poll: all done.
        transport.push_page(vec![
            record("+15550001", CallStatus::Completed, 60),
            record("+15550002", CallStatus::NoAnswer, 60),
            record("+15550003", CallStatus::NoAnswer, 60),
        ]);
        transport.push_page(vec![
            record("+15550002", CallStatus::Completed, 120),
            record("+15550003", CallStatus::Completed, 120),
        ]);
        let mut coord = coordinator(transport.clone(), MockGeocoder { address: None });

        coord.start_episode(recipients()).unwrap();
        coord
            .send_initial_message(&SensorReading::new(30000, "12.34", "56.78"))
            .await
            .unwrap();
        coord.place_calls(&recipients()).await.unwrap();

        let mut sensor = MockSensor { readings: VecDeque::new() };
        coord.run_retry_loop(&mut sensor).await.unwrap();

        // Initial round called all three; the retry round skipped +15550001
        assert_eq!(
            transport.placed(),
            vec![
                Recipient::from("+15550001"),
                Recipient::from("+15550002"),
                Recipient::from("+15550003"),
                Recipient::from("+15550002"),
                Recipient::from("+15550003"),
            ]
        );
        // Episode resolved and released
        assert!(coord.episode().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_loop_resends_message_once_located() {
        let targets = vec![Recipient::from("+15550001")];
        let transport = Arc::new(MockTransport::new());
        transport.push_page(vec![record("+15550001", CallStatus::Completed, 60)]);
        let mut coord =
            coordinator(transport.clone(), MockGeocoder { address: Some("Main St 1".into()) });

        coord.start_episode(targets.clone()).unwrap();
        coord
            .send_initial_message(&SensorReading::new(30000, "0.0", "0.0"))
            .await
            .unwrap();
        coord.place_calls(&targets).await.unwrap();

        // First retry read still has no fix; the second resolves
        let mut sensor = MockSensor {
            readings: VecDeque::from(vec![
                SensorReading::new(0, "0.0", "0.0"),
                SensorReading::new(0, "12.34", "56.78"),
            ]),
        };
        coord.run_retry_loop(&mut sensor).await.unwrap();

        let messages = transport.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].1, PLACEHOLDER_MESSAGE);
        assert!(messages[1].1.contains("12.34"));
        assert!(messages[1].1.contains("Main St 1"));
        assert!(coord.episode().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_loop_continues_when_log_lags() {
        // A poll round with no visible records must re-place the call, not
        // terminate or stall
        let targets = vec![Recipient::from("+15550001")];
        let transport = Arc::new(MockTransport::new());
        transport.push_page(Vec::new());
        transport.push_page(vec![record("+15550001", CallStatus::Completed, 60)]);
        let mut coord = coordinator(transport.clone(), MockGeocoder { address: None });

        coord.start_episode(targets.clone()).unwrap();
        coord
            .send_initial_message(&SensorReading::new(30000, "1.0", "2.0"))
            .await
            .unwrap();
        coord.place_calls(&targets).await.unwrap();

        let mut sensor = MockSensor { readings: VecDeque::new() };
        coord.run_retry_loop(&mut sensor).await.unwrap();

        // Round one saw no records and re-placed the call; round two completed
        assert_eq!(transport.placed().len(), 2);
        assert!(coord.episode().is_none());
    }
}
