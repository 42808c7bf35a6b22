//! Serial acceleration sensor
//!
//! Protocol: the microcontroller streams newline-terminated frames at
//! 9600 baud, 8N1:
//!
//! ```text
//! Acc:<i32> Lat:<decimal> Lon:<decimal>\r\n
//! ```
//!
//! Latitude/longitude are "0.0 0.0" until the GPS has a fix.

use crate::domain::types::SensorReading;
use crate::infra::config::Config;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{info, warn};

/// Per-chunk read timeout while assembling a line
const CHUNK_TIMEOUT: Duration = Duration::from_millis(50);

/// Longest sensor frame we accept before declaring the stream garbled
const MAX_LINE_LEN: usize = 256;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("failed to open sensor port {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: tokio_serial::Error,
    },

    #[error("sensor port control failed: {0}")]
    Port(#[from] tokio_serial::Error),

    #[error("sensor read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("sensor read timed out")]
    Timeout,

    #[error("malformed sensor frame: {0}")]
    Parse(String),
}

/// Source of periodic acceleration + position samples
#[async_trait]
pub trait SensorSource: Send {
    /// Read the next complete sample. Expected to return promptly; a slow or
    /// silent sensor surfaces as `SensorError::Timeout`.
    async fn read(&mut self) -> Result<SensorReading, SensorError>;

    /// Discard any buffered samples so monitoring resumes on fresh data.
    fn flush(&mut self) -> Result<(), SensorError>;
}

/// Sensor connected over a serial port (Arduino-class microcontroller)
pub struct SerialSensor {
    port: SerialStream,
    device: String,
    read_timeout: Duration,
    /// Persistent buffer that accumulates bytes across reads. Frames can
    /// arrive in chunks, so partial data is kept for the next read.
    line_buffer: Vec<u8>,
}

impl SerialSensor {
    /// Open the serial port and reset the microcontroller.
    ///
    /// The DTR pulse restarts the board so its output begins at a frame
    /// boundary; input buffered during the pulse is discarded.
    pub async fn open(config: &Config) -> Result<Self, SensorError> {
        let mut port = tokio_serial::new(config.sensor_device(), config.sensor_baud())
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .map_err(|e| SensorError::Open {
                device: config.sensor_device().to_string(),
                source: e,
            })?;

        port.write_data_terminal_ready(false)?;
        tokio::time::sleep(Duration::from_secs(1)).await;
        port.clear(ClearBuffer::Input)?;
        port.write_data_terminal_ready(true)?;
        port.clear(ClearBuffer::All)?;

        info!(
            device = %config.sensor_device(),
            baud = %config.sensor_baud(),
            "sensor_port_opened"
        );

        Ok(Self {
            port,
            device: config.sensor_device().to_string(),
            read_timeout: Duration::from_millis(config.sensor_read_timeout_ms()),
            line_buffer: Vec::with_capacity(64),
        })
    }

    /// Pop one complete line off the buffer, if present
    fn take_line(&mut self) -> Option<String> {
        let newline_idx = self.line_buffer.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.line_buffer.drain(..=newline_idx).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }

    /// Parse one frame line into a reading
    pub(crate) fn parse_frame(line: &str) -> Result<SensorReading, SensorError> {
        let mut accel: Option<i32> = None;
        let mut lat: Option<&str> = None;
        let mut lon: Option<&str> = None;

        for token in line.split_whitespace() {
            if let Some(value) = token.strip_prefix("Acc:") {
                accel = Some(
                    value
                        .parse::<i32>()
                        .map_err(|_| SensorError::Parse(format!("bad accel in {:?}", line)))?,
                );
            } else if let Some(value) = token.strip_prefix("Lat:") {
                lat = Some(value);
            } else if let Some(value) = token.strip_prefix("Lon:") {
                lon = Some(value);
            }
        }

        match (accel, lat, lon) {
            (Some(accel), Some(lat), Some(lon)) => Ok(SensorReading::new(accel, lat, lon)),
            _ => Err(SensorError::Parse(format!("incomplete frame {:?}", line))),
        }
    }
}

#[async_trait]
impl SensorSource for SerialSensor {
    async fn read(&mut self) -> Result<SensorReading, SensorError> {
        let deadline = tokio::time::Instant::now() + self.read_timeout;
        let mut chunk = [0u8; 64];

        loop {
            // Consume a buffered line first; empty lines are keep-alives
            while let Some(line) = self.take_line() {
                if !line.is_empty() {
                    return Self::parse_frame(&line);
                }
            }

            if self.line_buffer.len() > MAX_LINE_LEN {
                let discarded = self.line_buffer.len();
                self.line_buffer.clear();
                warn!(device = %self.device, discarded = discarded, "sensor_stream_garbled");
                return Err(SensorError::Parse("no frame boundary found".to_string()));
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(SensorError::Timeout);
            }

            match tokio::time::timeout(CHUNK_TIMEOUT, self.port.read(&mut chunk)).await {
                Ok(Ok(n)) if n > 0 => {
                    self.line_buffer.extend_from_slice(&chunk[..n]);
                }
                Ok(Ok(_)) => {
                    // Zero bytes read, keep waiting
                }
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
                    // Port-level timeout, keep waiting until the deadline
                }
                Ok(Err(e)) => return Err(SensorError::Io(e)),
                Err(_) => {
                    // Chunk timeout, keep waiting until the deadline
                }
            }
        }
    }

    fn flush(&mut self) -> Result<(), SensorError> {
        self.line_buffer.clear();
        self.port.clear(ClearBuffer::All)?;
        Ok(())
    }
}
