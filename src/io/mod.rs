//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `sensor` - Serial reader for the acceleration + GPS sensor
//! - `transport` - Twilio REST client for messages, calls, and call logs
//! - `geocode` - Reverse geocoding of crash coordinates
//! - `status` - Phase channel and background status heartbeat

pub mod geocode;
pub mod sensor;
pub mod status;
pub mod transport;

// Re-export commonly used types
pub use geocode::{GeocodeError, Geocoder, ReverseGeocoder};
pub use sensor::{SensorError, SensorSource, SerialSensor};
pub use status::{create_status_channel, StatusReporter, StatusSender};
pub use transport::{NotificationTransport, RecipientDirectory, TransportError, TwilioClient};
