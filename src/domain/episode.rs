//! Broadcast episode state
//!
//! One episode covers a single impact-to-resolution broadcast cycle: the
//! fixed recipient set, the per-recipient call status map, and the pending
//! SMS location retry. The episode is owned exclusively by the
//! BroadcastCoordinator; nothing else mutates it.

use crate::domain::types::{CallRecord, CallStatus, Recipient};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Per-recipient delivery state for one emergency broadcast
#[derive(Debug)]
pub struct BroadcastEpisode {
    /// Episode start; call records at or before this instant belong to a
    /// previous episode and are ignored
    started_at: DateTime<Utc>,
    /// Recipient set, fixed for the lifetime of the episode
    recipients: Vec<Recipient>,
    /// Latest known call status per recipient. Total over `recipients` once
    /// a call attempt has been issued for each.
    call_status: HashMap<Recipient, CallStatus>,
    /// Whether the initial emergency message went out
    message_sent: bool,
    /// Set when the message was sent without a position fix and must be
    /// resent once coordinates resolve
    sms_retry_pending: bool,
}

impl BroadcastEpisode {
    pub fn new(recipients: Vec<Recipient>) -> Self {
        Self {
            started_at: Utc::now(),
            recipients,
            call_status: HashMap::new(),
            message_sent: false,
            sms_retry_pending: false,
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    pub fn status_of(&self, recipient: &Recipient) -> Option<CallStatus> {
        self.call_status.get(recipient).copied()
    }

    pub fn message_sent(&self) -> bool {
        self.message_sent
    }

    pub fn sms_retry_pending(&self) -> bool {
        self.sms_retry_pending
    }

    pub fn mark_message_sent(&mut self, retry_pending: bool) {
        self.message_sent = true;
        self.sms_retry_pending = retry_pending;
    }

    /// Record the outcome of a call attempt for a known recipient.
    /// Unknown recipients are ignored to keep the map keyed by `recipients`.
    pub fn record_attempt(&mut self, recipient: &Recipient, status: CallStatus) {
        if self.recipients.contains(recipient) {
            self.call_status.insert(recipient.clone(), status);
        }
    }

    /// Apply one transport call record. Returns true if it updated the map.
    ///
    /// Records started at or before the episode start are stale entries from
    /// an earlier episode and are dropped; so are records for numbers outside
    /// the recipient set.
    pub fn apply_record(&mut self, record: &CallRecord) -> bool {
        if record.started_at <= self.started_at {
            return false;
        }
        if !self.recipients.contains(&record.recipient) {
            return false;
        }
        self.call_status.insert(record.recipient.clone(), record.status);
        true
    }

    /// Recipients still needing a call retry: everyone whose latest status is
    /// not Completed. A recipient with no status yet (call never surfaced in
    /// the log, or placement failed) counts as needing retry.
    pub fn retry_set(&self) -> Vec<Recipient> {
        self.recipients
            .iter()
            .filter(|r| !self.call_status.get(r).map(CallStatus::is_terminal).unwrap_or(false))
            .cloned()
            .collect()
    }

    /// The episode is done when every recipient completed a call and no SMS
    /// retry is outstanding.
    pub fn is_complete(&self) -> bool {
        self.retry_set().is_empty() && !self.sms_retry_pending
    }

    /// Builder method for tests to pin the episode start time
    #[cfg(test)]
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }
}
