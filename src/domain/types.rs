//! Shared types for the crash monitor

use chrono::{DateTime, Utc};

/// Coordinate value the sensor firmware emits before the GPS has a fix
const NO_FIX_SENTINEL: &str = "0.0";

/// One acceleration + position sample from the vehicle sensor
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// Signed acceleration magnitude on the monitored axis
    pub accel: i32,
    /// Latitude as reported by the GPS, decimal string
    pub lat: String,
    /// Longitude as reported by the GPS, decimal string
    pub lon: String,
}

impl SensorReading {
    pub fn new(accel: i32, lat: impl Into<String>, lon: impl Into<String>) -> Self {
        Self { accel, lat: lat.into(), lon: lon.into() }
    }

    /// Coordinates, or None while the GPS has no fix.
    ///
    /// The firmware reports "0.0 0.0" until the first fix; a single "0.0"
    /// axis is a valid position (the equator / prime meridian).
    pub fn position(&self) -> Option<(&str, &str)> {
        if self.lat == NO_FIX_SENTINEL && self.lon == NO_FIX_SENTINEL {
            None
        } else {
            Some((&self.lat, &self.lon))
        }
    }
}

/// Newtype wrapper for recipient phone numbers to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Recipient(pub String);

impl Recipient {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Recipient {
    fn from(s: &str) -> Self {
        Recipient(s.to_string())
    }
}

/// Delivery state of one voice call, as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Queued,
    Ringing,
    InProgress,
    Completed,
    Failed,
    NoAnswer,
    Unknown,
}

impl CallStatus {
    /// Parse a transport status string. Unrecognized values map to Unknown
    /// so a new transport-side status never aborts reconciliation.
    pub fn from_api(s: &str) -> Self {
        match s {
            "queued" => CallStatus::Queued,
            "ringing" => CallStatus::Ringing,
            "in-progress" => CallStatus::InProgress,
            "completed" => CallStatus::Completed,
            "failed" => CallStatus::Failed,
            "no-answer" => CallStatus::NoAnswer,
            _ => CallStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Queued => "queued",
            CallStatus::Ringing => "ringing",
            CallStatus::InProgress => "in-progress",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
            CallStatus::NoAnswer => "no-answer",
            CallStatus::Unknown => "unknown",
        }
    }

    /// Only a completed call counts as reached; everything else is retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Completed)
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call log entry returned by the transport
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub recipient: Recipient,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
}

/// Human-visible phase of the monitor, published to the display boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Monitoring,
    EmergencyDetected,
    Countdown(u32),
    CallingForHelp,
    HelpOnTheWay,
    ManualRestartRequired,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Monitoring => f.write_str("monitoring"),
            Phase::EmergencyDetected => f.write_str("emergency_detected"),
            Phase::Countdown(n) => write!(f, "countdown_{}", n),
            Phase::CallingForHelp => f.write_str("calling_for_help"),
            Phase::HelpOnTheWay => f.write_str("help_on_the_way"),
            Phase::ManualRestartRequired => f.write_str("manual_restart_required"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_no_fix() {
        let reading = SensorReading::new(100, "0.0", "0.0");
        assert_eq!(reading.position(), None);
    }

    #[test]
    fn test_position_with_fix() {
        let reading = SensorReading::new(100, "12.34", "56.78");
        assert_eq!(reading.position(), Some(("12.34", "56.78")));
    }

    #[test]
    fn test_position_single_zero_axis_is_a_fix() {
        // A point on the equator is a real position, not the sentinel
        let reading = SensorReading::new(100, "0.0", "56.78");
        assert_eq!(reading.position(), Some(("0.0", "56.78")));
    }

    #[test]
    fn test_call_status_from_api() {
        assert_eq!(CallStatus::from_api("queued"), CallStatus::Queued);
        assert_eq!(CallStatus::from_api("ringing"), CallStatus::Ringing);
        assert_eq!(CallStatus::from_api("in-progress"), CallStatus::InProgress);
        assert_eq!(CallStatus::from_api("completed"), CallStatus::Completed);
        assert_eq!(CallStatus::from_api("failed"), CallStatus::Failed);
        assert_eq!(CallStatus::from_api("no-answer"), CallStatus::NoAnswer);
        // busy and canceled exist transport-side but are not tracked distinctly
        assert_eq!(CallStatus::from_api("busy"), CallStatus::Unknown);
        assert_eq!(CallStatus::from_api("canceled"), CallStatus::Unknown);
    }

    #[test]
    fn test_only_completed_is_terminal() {
        assert!(CallStatus::Completed.is_terminal());
        assert!(!CallStatus::Queued.is_terminal());
        assert!(!CallStatus::Ringing.is_terminal());
        assert!(!CallStatus::InProgress.is_terminal());
        assert!(!CallStatus::Failed.is_terminal());
        assert!(!CallStatus::NoAnswer.is_terminal());
        assert!(!CallStatus::Unknown.is_terminal());
    }
}
