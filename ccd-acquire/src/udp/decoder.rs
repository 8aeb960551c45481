//! Commits validated UDP datagrams to the spectrum buffer.

use std::time::Instant;

use super::packet::{PacketRejected, UdpPacket, UdpPacketHeader};
use crate::buffer::SpectrumBuffer;
use crate::stats::StatsRecorder;

/// Stateless apart from a scratch buffer: each datagram stands alone.
///
/// There is no reordering or duplicate detection. The most recent datagram
/// always wins, which is what a live display wants.
#[derive(Debug)]
pub struct UdpPacketDecoder {
    magic: u8,
    pixel_count: usize,
    scratch: Vec<f32>,
}

impl UdpPacketDecoder {
    pub fn new(magic: u8, pixel_count: usize) -> Self {
        Self {
            magic,
            pixel_count,
            scratch: Vec::with_capacity(pixel_count),
        }
    }

    /// Validate `datagram` and, if it passes, commit its samples.
    ///
    /// A rejected datagram leaves the buffer and statistics untouched.
    pub fn apply(
        &mut self,
        datagram: &[u8],
        buffer: &SpectrumBuffer,
        recorder: &mut StatsRecorder,
    ) -> Result<UdpPacketHeader, PacketRejected> {
        let packet = UdpPacket::parse(datagram, self.magic, self.pixel_count)?;

        self.scratch.clear();
        self.scratch.extend(packet.samples().map(f32::from));
        buffer.commit_frame(&self.scratch);

        let header = packet.header;
        recorder.record_packet(header.sequence(), header.timestamp_us(), Instant::now());
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::ReceiverStats;
    use crate::udp::packet::encode_packet;
    use std::sync::Arc;

    fn setup(pixel_count: usize) -> (UdpPacketDecoder, SpectrumBuffer, StatsRecorder, Arc<ReceiverStats>) {
        let stats = Arc::new(ReceiverStats::new());
        (
            UdpPacketDecoder::new(0xAA, pixel_count),
            SpectrumBuffer::new(pixel_count),
            StatsRecorder::new(stats.clone()),
            stats,
        )
    }

    #[test]
    fn test_valid_packet_committed() {
        let (mut dec, buffer, mut recorder, stats) = setup(4);
        let header = dec
            .apply(&encode_packet(0xAA, 41, 1000, &[7, 8, 9, 10]), &buffer, &mut recorder)
            .unwrap();
        assert_eq!(header.sequence(), 41);
        assert_eq!(buffer.read_live().samples(), &[7.0, 8.0, 9.0, 10.0]);
        assert_eq!(stats.last_sequence(), 41);
        assert_eq!(stats.frames_received(), 1);
    }

    #[test]
    fn test_partial_packet_leaves_tail() {
        let (mut dec, buffer, mut recorder, _) = setup(4);
        buffer.commit_frame(&[1.0, 1.0, 1.0, 1.0]);
        dec.apply(&encode_packet(0xAA, 1, 0, &[5, 6]), &buffer, &mut recorder)
            .unwrap();
        assert_eq!(buffer.read_live().samples(), &[5.0, 6.0, 1.0, 1.0]);
    }

    #[test]
    fn test_bad_magic_dropped_without_mutation() {
        let (mut dec, buffer, mut recorder, stats) = setup(4);
        buffer.commit_frame(&[3.0; 4]);

        let result = dec.apply(&encode_packet(0x55, 1, 0, &[9, 9, 9, 9]), &buffer, &mut recorder);
        assert!(matches!(result, Err(PacketRejected::BadMagic { .. })));
        assert_eq!(buffer.read_live().samples(), &[3.0; 4]);
        assert_eq!(buffer.commit_count(), 1);
        assert_eq!(stats.frames_received(), 0);
    }

    #[test]
    fn test_oversized_pixel_count_dropped_without_mutation() {
        let (mut dec, buffer, mut recorder, stats) = setup(4);
        buffer.commit_frame(&[3.0; 4]);

        let result = dec.apply(&encode_packet(0xAA, 1, 0, &[9; 5]), &buffer, &mut recorder);
        assert!(matches!(
            result,
            Err(PacketRejected::PixelCountOutOfRange { count: 5, max: 4 })
        ));
        assert_eq!(buffer.read_live().samples(), &[3.0; 4]);
        assert_eq!(stats.frames_received(), 0);
    }

    #[test]
    fn test_out_of_order_packets_last_writer_wins() {
        let (mut dec, buffer, mut recorder, stats) = setup(2);
        dec.apply(&encode_packet(0xAA, 10, 0, &[10, 10]), &buffer, &mut recorder)
            .unwrap();
        dec.apply(&encode_packet(0xAA, 9, 0, &[9, 9]), &buffer, &mut recorder)
            .unwrap();
        assert_eq!(buffer.read_live().samples(), &[9.0, 9.0]);
        assert_eq!(stats.last_sequence(), 9);
    }
}
