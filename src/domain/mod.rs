//! Domain models - core types for crash detection and broadcast tracking
//!
//! This module contains the canonical data types used throughout the system:
//! - `SensorReading` - one acceleration + position sample
//! - `Recipient` - a phone-number endpoint for the emergency broadcast
//! - `CallStatus` / `CallRecord` - per-call delivery state from the transport
//! - `Phase` - human-visible monitor phase for the display boundary
//! - `BroadcastEpisode` - per-episode delivery state owned by the coordinator

pub mod episode;
pub mod types;

// Re-export commonly used types
pub use episode::BroadcastEpisode;
pub use types::{CallRecord, CallStatus, Phase, Recipient, SensorReading};
