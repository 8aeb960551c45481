//! Acquisition configuration.
//!
//! All values have defaults matching the TCD1304 board and its firmware, so an
//! empty JSON object is a valid configuration. Tool binaries load a file with
//! [`AcquisitionConfig::from_json_file`] and then override single fields from
//! the command line.

use std::ops::Range;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationPoint;
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::peaks::PeakParams;
use crate::serial::RECORD_LEN;

/// Number of pixels on the TCD1304 linear CCD.
pub const CCD_PIXEL_COUNT: usize = 3694;

/// Default baud rate of the USB serial link.
pub const SERIAL_BAUD_RATE: u32 = 1_000_000;

/// Default UDP listening port.
pub const UDP_PORT: u16 = 8080;

/// Sensor geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Pixels per frame. Buffers are sized from this once, at construction.
    pub pixel_count: usize,
    /// First light-sensitive pixel
    pub active_start: usize,
    /// One past the last light-sensitive pixel
    pub active_end: usize,
}

impl SensorConfig {
    /// Light-sensitive pixels, excluding the dummy pixels at both ends.
    pub fn active_range(&self) -> Range<usize> {
        self.active_start..self.active_end
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            pixel_count: CCD_PIXEL_COUNT,
            active_start: 32,
            active_end: 3679,
        }
    }
}

/// Serial transport settings and framing bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port name (`/dev/ttyACM0`, `COM3`, ...)
    pub port: String,
    pub baud_rate: u32,
    /// Read timeout; also the stop-signal polling interval.
    pub read_timeout_ms: u64,
    /// Byte that ends the previous frame and starts a new one
    pub frame_start: u8,
    /// First byte of a pixel envelope
    pub pixel_start: u8,
    /// Last byte of a pixel envelope
    pub pixel_end: u8,
    /// Maximum bytes held while resynchronizing
    pub window_capacity: usize,
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Check what the serial decoder and read loop rely on.
    pub fn validate(&self) -> AcquisitionResult<()> {
        if self.read_timeout_ms == 0 {
            return config_error("serial.read_timeout_ms must be > 0".to_string());
        }
        if self.window_capacity < RECORD_LEN {
            return config_error(format!(
                "serial.window_capacity {} cannot hold a {RECORD_LEN}-byte pixel record",
                self.window_capacity
            ));
        }
        let markers = [self.frame_start, self.pixel_start, self.pixel_end];
        if markers[0] == markers[1] || markers[0] == markers[2] || markers[1] == markers[2] {
            return config_error(format!(
                "serial markers must be distinct, got {:#04x}/{:#04x}/{:#04x}",
                markers[0], markers[1], markers[2]
            ));
        }
        Ok(())
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: SERIAL_BAUD_RATE,
            read_timeout_ms: 10,
            frame_start: 0x11,
            pixel_start: 0xA5,
            pixel_end: 0x5A,
            window_capacity: 64,
        }
    }
}

/// UDP transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    pub bind_addr: String,
    /// Port to bind; 0 lets the OS pick one.
    pub port: u16,
    /// Receive timeout; also the stop-signal polling interval.
    pub recv_timeout_ms: u64,
    /// Expected first byte of every datagram
    pub magic: u8,
}

impl UdpConfig {
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    /// `bind_addr:port` as passed to the socket.
    pub fn bind_target(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn validate(&self) -> AcquisitionResult<()> {
        // A zero timeout would make the socket block forever
        if self.recv_timeout_ms == 0 {
            return config_error("udp.recv_timeout_ms must be > 0".to_string());
        }
        Ok(())
    }
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: UDP_PORT,
            recv_timeout_ms: 10,
            magic: 0xAA,
        }
    }
}

/// Complete configuration of one acquisition context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub sensor: SensorConfig,
    pub serial: SerialConfig,
    pub udp: UdpConfig,
    pub peaks: PeakParams,
    /// Reference points applied when the context is created
    pub calibration: Option<[CalibrationPoint; 2]>,
}

impl AcquisitionConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> AcquisitionResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| AcquisitionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> AcquisitionResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check the invariants the decoders rely on.
    pub fn validate(&self) -> AcquisitionResult<()> {
        if self.sensor.pixel_count == 0 {
            return config_error("sensor.pixel_count must be > 0".to_string());
        }
        if self.sensor.active_start >= self.sensor.active_end
            || self.sensor.active_end > self.sensor.pixel_count
        {
            return config_error(format!(
                "sensor active range {}..{} does not fit {} pixels",
                self.sensor.active_start, self.sensor.active_end, self.sensor.pixel_count
            ));
        }
        self.serial.validate()?;
        self.udp.validate()
    }
}

fn config_error(msg: String) -> AcquisitionResult<()> {
    Err(AcquisitionError::Config(msg))
}
