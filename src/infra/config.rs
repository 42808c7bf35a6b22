//! Configuration loading from TOML files
//!
//! Config file is selected via the --config command line argument,
//! default: config/dev.toml. A missing or unparsable file falls back to
//! built-in defaults with a warning.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    #[serde(default = "default_sensor_device")]
    pub device: String,
    #[serde(default = "default_sensor_baud")]
    pub baud: u32,
    /// Upper bound on one full line read from the sensor
    #[serde(default = "default_sensor_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Pause between reads after a recoverable sensor error
    #[serde(default = "default_sensor_poll_pacing_ms")]
    pub poll_pacing_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            device: default_sensor_device(),
            baud: default_sensor_baud(),
            read_timeout_ms: default_sensor_read_timeout_ms(),
            poll_pacing_ms: default_sensor_poll_pacing_ms(),
        }
    }
}

fn default_sensor_device() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_sensor_baud() -> u32 {
    9600
}

fn default_sensor_read_timeout_ms() -> u64 {
    2000
}

fn default_sensor_poll_pacing_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Absolute acceleration above which a reading counts as an impact
    #[serde(default = "default_impact_threshold")]
    pub threshold: u32,
    /// Seconds of confirmation countdown before the broadcast starts
    #[serde(default = "default_countdown_secs")]
    pub countdown_secs: u32,
    /// Hold on the emergency-detected phase before the countdown begins
    #[serde(default = "default_alert_hold_ms")]
    pub alert_hold_ms: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: default_impact_threshold(),
            countdown_secs: default_countdown_secs(),
            alert_hold_ms: default_alert_hold_ms(),
        }
    }
}

fn default_impact_threshold() -> u32 {
    28000
}

fn default_countdown_secs() -> u32 {
    10
}

fn default_alert_hold_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// REST API base, overridable for tests
    #[serde(default = "default_transport_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub auth_token: String,
    /// Caller ID for outgoing messages and calls
    #[serde(default)]
    pub from_number: String,
    /// TwiML URL played when a recipient picks up
    #[serde(default = "default_call_url")]
    pub call_url: String,
    /// Ring timeout passed to the transport per call
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            api_base: default_transport_api_base(),
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: String::new(),
            call_url: default_call_url(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_transport_api_base() -> String {
    "https://api.twilio.com".to_string()
}

fn default_call_url() -> String {
    "http://twimlets.com/holdmusic?Bucket=com.twilio.music.ambient".to_string()
}

fn default_call_timeout_secs() -> u32 {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// Interval between poll-and-retry rounds
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    /// Minimum spacing between consecutive call placements
    #[serde(default = "default_call_spacing_ms")]
    pub call_spacing_ms: u64,
    /// Minimum spacing between consecutive message sends
    #[serde(default = "default_message_spacing_ms")]
    pub message_spacing_ms: u64,
    /// Pause after a resolved episode before monitoring resumes
    #[serde(default = "default_resume_delay_secs")]
    pub resume_delay_secs: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: default_retry_interval_secs(),
            call_spacing_ms: default_call_spacing_ms(),
            message_spacing_ms: default_message_spacing_ms(),
            resume_delay_secs: default_resume_delay_secs(),
        }
    }
}

fn default_retry_interval_secs() -> u64 {
    30
}

fn default_call_spacing_ms() -> u64 {
    2000
}

fn default_message_spacing_ms() -> u64 {
    1000
}

fn default_resume_delay_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeocodeConfig {
    #[serde(default = "default_geocode_api_base")]
    pub api_base: String,
    /// Empty key disables reverse geocoding (messages carry raw coordinates)
    #[serde(default)]
    pub api_key: String,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self { api_base: default_geocode_api_base(), api_key: String::new() }
    }
}

fn default_geocode_api_base() -> String {
    "https://maps.googleapis.com".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    /// Heartbeat interval for the background phase reporter
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self { heartbeat_interval_secs: default_heartbeat_interval_secs() }
    }
}

fn default_heartbeat_interval_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    pub transport: TransportConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub geocode: GeocodeConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    sensor_device: String,
    sensor_baud: u32,
    sensor_read_timeout_ms: u64,
    sensor_poll_pacing_ms: u64,
    impact_threshold: u32,
    countdown_secs: u32,
    alert_hold_ms: u64,
    transport_api_base: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
    call_url: String,
    call_timeout_secs: u32,
    retry_interval_secs: u64,
    call_spacing_ms: u64,
    message_spacing_ms: u64,
    resume_delay_secs: u64,
    geocode_api_base: String,
    geocode_api_key: String,
    heartbeat_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig {
            sensor: SensorConfig::default(),
            detection: DetectionConfig::default(),
            transport: TransportConfig::default(),
            broadcast: BroadcastConfig::default(),
            geocode: GeocodeConfig::default(),
            status: StatusConfig::default(),
        })
        .with_config_file("default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig) -> Self {
        Self {
            sensor_device: toml_config.sensor.device,
            sensor_baud: toml_config.sensor.baud,
            sensor_read_timeout_ms: toml_config.sensor.read_timeout_ms,
            sensor_poll_pacing_ms: toml_config.sensor.poll_pacing_ms,
            impact_threshold: toml_config.detection.threshold,
            countdown_secs: toml_config.detection.countdown_secs,
            alert_hold_ms: toml_config.detection.alert_hold_ms,
            transport_api_base: toml_config.transport.api_base,
            account_sid: toml_config.transport.account_sid,
            auth_token: toml_config.transport.auth_token,
            from_number: toml_config.transport.from_number,
            call_url: toml_config.transport.call_url,
            call_timeout_secs: toml_config.transport.call_timeout_secs,
            retry_interval_secs: toml_config.broadcast.retry_interval_secs,
            call_spacing_ms: toml_config.broadcast.call_spacing_ms,
            message_spacing_ms: toml_config.broadcast.message_spacing_ms,
            resume_delay_secs: toml_config.broadcast.resume_delay_secs,
            geocode_api_base: toml_config.geocode.api_base,
            geocode_api_key: toml_config.geocode.api_key,
            heartbeat_interval_secs: toml_config.status.heartbeat_interval_secs,
            config_file: "default".to_string(),
        }
    }

    fn with_config_file(mut self, path: &str) -> Self {
        self.config_file = path.to_string();
        self
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config).with_config_file(&path.display().to_string()))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn sensor_device(&self) -> &str {
        &self.sensor_device
    }

    pub fn sensor_baud(&self) -> u32 {
        self.sensor_baud
    }

    pub fn sensor_read_timeout_ms(&self) -> u64 {
        self.sensor_read_timeout_ms
    }

    pub fn sensor_poll_pacing_ms(&self) -> u64 {
        self.sensor_poll_pacing_ms
    }

    pub fn impact_threshold(&self) -> u32 {
        self.impact_threshold
    }

    pub fn countdown_secs(&self) -> u32 {
        self.countdown_secs
    }

    pub fn alert_hold_ms(&self) -> u64 {
        self.alert_hold_ms
    }

    pub fn transport_api_base(&self) -> &str {
        &self.transport_api_base
    }

    pub fn account_sid(&self) -> &str {
        &self.account_sid
    }

    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    pub fn from_number(&self) -> &str {
        &self.from_number
    }

    pub fn call_url(&self) -> &str {
        &self.call_url
    }

    pub fn call_timeout_secs(&self) -> u32 {
        self.call_timeout_secs
    }

    pub fn retry_interval_secs(&self) -> u64 {
        self.retry_interval_secs
    }

    pub fn call_spacing_ms(&self) -> u64 {
        self.call_spacing_ms
    }

    pub fn message_spacing_ms(&self) -> u64 {
        self.message_spacing_ms
    }

    pub fn resume_delay_secs(&self) -> u64 {
        self.resume_delay_secs
    }

    pub fn geocode_api_base(&self) -> &str {
        &self.geocode_api_base
    }

    pub fn geocode_api_key(&self) -> &str {
        &self.geocode_api_key
    }

    pub fn heartbeat_interval_secs(&self) -> u64 {
        self.heartbeat_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the impact threshold
    #[cfg(test)]
    pub fn with_impact_threshold(mut self, threshold: u32) -> Self {
        self.impact_threshold = threshold;
        self
    }

    /// Builder method for tests to set the countdown length
    #[cfg(test)]
    pub fn with_countdown_secs(mut self, secs: u32) -> Self {
        self.countdown_secs = secs;
        self
    }

    /// Builder method for tests to set the retry interval
    #[cfg(test)]
    pub fn with_retry_interval_secs(mut self, secs: u64) -> Self {
        self.retry_interval_secs = secs;
        self
    }

    /// Builder method for tests to set transport credentials
    #[cfg(test)]
    pub fn with_transport_credentials(mut self, sid: &str, token: &str, from: &str) -> Self {
        self.account_sid = sid.to_string();
        self.auth_token = token.to_string();
        self.from_number = from.to_string();
        self
    }
}
