//! Impact classification from raw acceleration readings

use crate::domain::types::SensorReading;
use crate::infra::config::Config;

/// Stateless threshold classifier for crash impacts
pub struct ImpactDetector {
    /// Absolute acceleration that must be exceeded (strictly) to count
    threshold: u32,
}

impl ImpactDetector {
    pub fn new(config: &Config) -> Self {
        Self { threshold: config.impact_threshold() }
    }

    /// True iff the reading's acceleration magnitude exceeds the threshold.
    /// Exactly at the threshold is not an impact.
    pub fn classify(&self, reading: &SensorReading) -> bool {
        reading.accel.unsigned_abs() > self.threshold
    }
}
