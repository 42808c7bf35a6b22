//! Integration tests for configuration loading

use crashguard::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[sensor]
device = "/dev/ttyACM0"
baud = 115200
read_timeout_ms = 1500

[detection]
threshold = 31000
countdown_secs = 15
alert_hold_ms = 1000

[transport]
account_sid = "ACtest"
auth_token = "token"
from_number = "+15550100"
call_timeout_secs = 25

[broadcast]
retry_interval_secs = 20
call_spacing_ms = 1500
message_spacing_ms = 500
resume_delay_secs = 3

[geocode]
api_key = "test-key"

[status]
heartbeat_interval_secs = 7
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.sensor_device(), "/dev/ttyACM0");
    assert_eq!(config.sensor_baud(), 115200);
    assert_eq!(config.sensor_read_timeout_ms(), 1500);
    assert_eq!(config.impact_threshold(), 31000);
    assert_eq!(config.countdown_secs(), 15);
    assert_eq!(config.alert_hold_ms(), 1000);
    assert_eq!(config.account_sid(), "ACtest");
    assert_eq!(config.auth_token(), "token");
    assert_eq!(config.from_number(), "+15550100");
    assert_eq!(config.call_timeout_secs(), 25);
    assert_eq!(config.retry_interval_secs(), 20);
    assert_eq!(config.call_spacing_ms(), 1500);
    assert_eq!(config.message_spacing_ms(), 500);
    assert_eq!(config.resume_delay_secs(), 3);
    assert_eq!(config.geocode_api_key(), "test-key");
    assert_eq!(config.heartbeat_interval_secs(), 7);
}

#[test]
fn test_section_defaults_fill_in() {
    let mut temp_file = NamedTempFile::new().unwrap();

    // Only the transport section is present; everything else defaults
    let config_content = r#"
[transport]
account_sid = "ACtest"
auth_token = "token"
from_number = "+15550100"
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.sensor_device(), "/dev/ttyUSB0");
    assert_eq!(config.impact_threshold(), 28000);
    assert_eq!(config.countdown_secs(), 10);
    assert_eq!(config.retry_interval_secs(), 30);
    assert_eq!(config.call_spacing_ms(), 2000);
    assert_eq!(config.call_timeout_secs(), 20);
    assert!(config.geocode_api_key().is_empty());
    assert_eq!(config.transport_api_base(), "https://api.twilio.com");
}

#[test]
fn test_load_from_path_fallback() {
    // Nonexistent file falls back to defaults instead of failing
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.sensor_device(), "/dev/ttyUSB0");
    assert_eq!(config.impact_threshold(), 28000);
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_missing_transport_section_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[sensor]\nbaud = 9600\n").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
}
