//! Serial framing bytes and the 4-byte pixel envelope.
//!
//! ```text
//! [FRAME_START] [PIXEL_START lo hi PIXEL_END] [PIXEL_START lo hi PIXEL_END] ... [FRAME_START] ...
//!      0x11          0xA5          0x5A
//! ```
//!
//! There is no length prefix and no checksum. The next frame-start byte is
//! the only end-of-frame delimiter.

use crate::config::SerialConfig;

/// Size of one pixel record in bytes.
pub const RECORD_LEN: usize = 4;

/// The three distinguished bytes of the serial protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMarkers {
    pub frame_start: u8,
    pub pixel_start: u8,
    pub pixel_end: u8,
}

impl Default for FrameMarkers {
    fn default() -> Self {
        Self {
            frame_start: 0x11,
            pixel_start: 0xA5,
            pixel_end: 0x5A,
        }
    }
}

impl From<&SerialConfig> for FrameMarkers {
    fn from(config: &SerialConfig) -> Self {
        Self {
            frame_start: config.frame_start,
            pixel_start: config.pixel_start,
            pixel_end: config.pixel_end,
        }
    }
}

impl FrameMarkers {
    /// Intensity carried by `record`, or `None` if the envelope bytes don't match.
    pub fn decode_record(&self, record: [u8; RECORD_LEN]) -> Option<u16> {
        if record[0] != self.pixel_start || record[3] != self.pixel_end {
            return None;
        }
        Some(u16::from_le_bytes([record[1], record[2]]))
    }

    /// Wrap one intensity in its envelope.
    pub fn encode_record(&self, value: u16) -> [u8; RECORD_LEN] {
        let [lo, hi] = value.to_le_bytes();
        [self.pixel_start, lo, hi, self.pixel_end]
    }
}

/// Encode a complete frame: the frame-start byte followed by one record per sample.
///
/// The receiver only publishes a frame when the *next* frame-start arrives,
/// so a sender streams these back to back.
pub fn encode_frame(markers: &FrameMarkers, samples: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + samples.len() * RECORD_LEN);
    out.push(markers.frame_start);
    for &value in samples {
        out.extend_from_slice(&markers.encode_record(value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_is_little_endian() {
        let markers = FrameMarkers::default();
        assert_eq!(markers.encode_record(0x0FFF), [0xA5, 0xFF, 0x0F, 0x5A]);
        assert_eq!(markers.decode_record([0xA5, 0x34, 0x12, 0x5A]), Some(0x1234));
    }

    #[test]
    fn test_bad_envelope_rejected() {
        let markers = FrameMarkers::default();
        assert_eq!(markers.decode_record([0xA5, 0x01, 0x00, 0x5B]), None);
        assert_eq!(markers.decode_record([0xA4, 0x01, 0x00, 0x5A]), None);
    }

    #[test]
    fn test_encode_frame_layout() {
        let bytes = encode_frame(&FrameMarkers::default(), &[1, 2]);
        assert_eq!(
            bytes,
            vec![0x11, 0xA5, 0x01, 0x00, 0x5A, 0xA5, 0x02, 0x00, 0x5A]
        );
    }

    #[test]
    fn test_markers_from_config() {
        let config = SerialConfig {
            frame_start: 0x7E,
            ..SerialConfig::default()
        };
        let markers = FrameMarkers::from(&config);
        assert_eq!(markers.frame_start, 0x7E);
        assert_eq!(markers.pixel_start, 0xA5);
    }
}
