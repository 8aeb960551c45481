//! UDP datagram layout.
//!
//! ```text
//! offset  size  field
//!      0     1  magic (0xAA)
//!      1     4  sequence      u32 LE, monotonic per sender
//!      5     4  timestamp_us  u32 LE
//!      9     2  pixel_count   u16 LE
//!     11     2  checksum      u16 LE, reserved, never verified
//!     13   2*n  samples       u16 LE x pixel_count
//! ```

use bytemuck::{bytes_of, pod_read_unaligned, Pod, Zeroable};
use thiserror::Error;

/// Size of [`UdpPacketHeader`] on the wire.
pub const HEADER_LEN: usize = 13;

/// Fixed header at the start of every datagram.
///
/// Fields hold the raw little-endian wire bits; use the accessor methods to
/// read them in host order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, packed)]
pub struct UdpPacketHeader {
    /// Start byte (1 byte)
    pub magic: u8,

    /// Sender sequence number (4 bytes)
    pub sequence: u32,

    /// Sender timestamp in microseconds (4 bytes)
    pub timestamp_us: u32,

    /// Number of samples following the header (2 bytes)
    pub pixel_count: u16,

    /// Reserved checksum (2 bytes)
    pub checksum: u16,
}

// SAFETY: UdpPacketHeader is repr(C, packed) and all fields are Pod
unsafe impl Pod for UdpPacketHeader {}
// SAFETY: UdpPacketHeader is repr(C, packed) and all fields are Zeroable
unsafe impl Zeroable for UdpPacketHeader {}

impl UdpPacketHeader {
    pub fn new(magic: u8, sequence: u32, timestamp_us: u32, pixel_count: u16) -> Self {
        Self {
            magic,
            sequence: sequence.to_le(),
            timestamp_us: timestamp_us.to_le(),
            pixel_count: pixel_count.to_le(),
            checksum: 0,
        }
    }

    pub fn sequence(&self) -> u32 {
        u32::from_le(self.sequence)
    }

    pub fn timestamp_us(&self) -> u32 {
        u32::from_le(self.timestamp_us)
    }

    pub fn pixel_count(&self) -> u16 {
        u16::from_le(self.pixel_count)
    }
}

/// Why a datagram was dropped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketRejected {
    #[error("datagram of {len} bytes is shorter than the header")]
    TooShort { len: usize },

    #[error("magic byte {found:#04x}, expected {expected:#04x}")]
    BadMagic { found: u8, expected: u8 },

    #[error("pixel count {count} exceeds sensor size {max}")]
    PixelCountOutOfRange { count: usize, max: usize },

    #[error("header declares {declared} samples but only {available} are present")]
    Truncated { declared: usize, available: usize },
}

/// A validated datagram borrowing its payload.
#[derive(Debug, Clone, Copy)]
pub struct UdpPacket<'a> {
    pub header: UdpPacketHeader,
    payload: &'a [u8],
}

impl<'a> UdpPacket<'a> {
    /// Validate `datagram` against the expected magic byte and sensor size.
    pub fn parse(datagram: &'a [u8], magic: u8, max_pixels: usize) -> Result<Self, PacketRejected> {
        if datagram.len() < HEADER_LEN {
            return Err(PacketRejected::TooShort {
                len: datagram.len(),
            });
        }
        let header: UdpPacketHeader = pod_read_unaligned(&datagram[..HEADER_LEN]);
        if header.magic != magic {
            return Err(PacketRejected::BadMagic {
                found: header.magic,
                expected: magic,
            });
        }
        let count = header.pixel_count() as usize;
        if count > max_pixels {
            return Err(PacketRejected::PixelCountOutOfRange {
                count,
                max: max_pixels,
            });
        }
        let body = &datagram[HEADER_LEN..];
        if body.len() < count * 2 {
            return Err(PacketRejected::Truncated {
                declared: count,
                available: body.len() / 2,
            });
        }
        Ok(Self {
            header,
            payload: &body[..count * 2],
        })
    }

    /// Samples in pixel order.
    pub fn samples(&self) -> impl Iterator<Item = u16> + 'a {
        let payload: &'a [u8] = self.payload;
        payload
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
    }

    pub fn pixel_count(&self) -> usize {
        self.payload.len() / 2
    }
}

/// Build a complete datagram. The checksum field is written as 0.
///
/// At most `u16::MAX` samples fit the header's count field; any beyond that
/// are left out.
pub fn encode_packet(magic: u8, sequence: u32, timestamp_us: u32, samples: &[u16]) -> Vec<u8> {
    let samples = &samples[..samples.len().min(u16::MAX as usize)];
    let header = UdpPacketHeader::new(magic, sequence, timestamp_us, samples.len() as u16);

    let mut out = Vec::with_capacity(HEADER_LEN + samples.len() * 2);
    out.extend_from_slice(bytes_of(&header));
    for &value in samples {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size() {
        assert_eq!(std::mem::size_of::<UdpPacketHeader>(), HEADER_LEN);
    }

    #[test]
    fn test_wire_layout() {
        let bytes = encode_packet(0xAA, 0x0102_0304, 0x0A0B_0C0D, &[0x1234]);
        assert_eq!(
            bytes,
            vec![
                0xAA, // magic
                0x04, 0x03, 0x02, 0x01, // sequence
                0x0D, 0x0C, 0x0B, 0x0A, // timestamp
                0x01, 0x00, // pixel_count
                0x00, 0x00, // checksum
                0x34, 0x12, // sample
            ]
        );
    }

    #[test]
    fn test_parse_valid_packet() {
        let bytes = encode_packet(0xAA, 77, 123_456, &[1, 2, 3]);
        let packet = UdpPacket::parse(&bytes, 0xAA, 3694).unwrap();
        assert_eq!(packet.header.sequence(), 77);
        assert_eq!(packet.header.timestamp_us(), 123_456);
        assert_eq!(packet.pixel_count(), 3);
        assert_eq!(packet.samples().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_rejections() {
        assert_eq!(
            UdpPacket::parse(&[0xAA; 5], 0xAA, 10).unwrap_err(),
            PacketRejected::TooShort { len: 5 }
        );

        let bytes = encode_packet(0xAB, 1, 0, &[1]);
        assert_eq!(
            UdpPacket::parse(&bytes, 0xAA, 10).unwrap_err(),
            PacketRejected::BadMagic {
                found: 0xAB,
                expected: 0xAA
            }
        );

        let bytes = encode_packet(0xAA, 1, 0, &[0; 11]);
        assert_eq!(
            UdpPacket::parse(&bytes, 0xAA, 10).unwrap_err(),
            PacketRejected::PixelCountOutOfRange { count: 11, max: 10 }
        );

        let mut bytes = encode_packet(0xAA, 1, 0, &[5, 6, 7]);
        bytes.truncate(bytes.len() - 1);
        assert_eq!(
            UdpPacket::parse(&bytes, 0xAA, 10).unwrap_err(),
            PacketRejected::Truncated {
                declared: 3,
                available: 2
            }
        );
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut bytes = encode_packet(0xAA, 9, 0, &[4, 5]);
        bytes.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
        let packet = UdpPacket::parse(&bytes, 0xAA, 10).unwrap();
        assert_eq!(packet.samples().collect::<Vec<_>>(), vec![4, 5]);
    }

    #[test]
    fn test_header_only_packet() {
        let bytes = encode_packet(0xAA, 3, 0, &[]);
        let packet = UdpPacket::parse(&bytes, 0xAA, 10).unwrap();
        assert_eq!(packet.pixel_count(), 0);
    }
}
