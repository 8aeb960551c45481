//! Byte-stream state machine for the serial CCD protocol.
//!
//! States:
//! - `AwaitingFrameStart`: everything except the frame-start byte is discarded.
//! - `AwaitingPixelRecord`: bytes accumulate in a bounded [`ByteWindow`]. When
//!   the head of the window is not `PIXEL_START`, or four bytes are present but
//!   the envelope doesn't close with `PIXEL_END`, exactly one byte is slipped
//!   and the scan retries. A single stray byte therefore costs nothing but
//!   itself.
//!
//! A frame-start byte ends the current frame. If at least one pixel was
//! decoded the frame is handed out; an empty frame is silently dropped.
//! While a record is half-received a frame-start value is taken as record
//! data (pixel bytes can legitimately be `0x11`); if the record then fails its
//! envelope check the rescan still honours the frame-start once it reaches the
//! head of the window.

use std::time::Instant;

use tracing::trace;

use super::record::{FrameMarkers, RECORD_LEN};
use crate::buffer::SpectrumBuffer;
use crate::config::SerialConfig;
use crate::stats::StatsRecorder;
use crate::window::ByteWindow;

/// Decoder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    AwaitingFrameStart,
    AwaitingPixelRecord,
}

/// Incremental decoder for the serial pixel stream.
#[derive(Debug)]
pub struct SerialFrameDecoder {
    markers: FrameMarkers,
    state: DecoderState,
    window: ByteWindow,
    /// Frame being assembled
    pixels: Vec<f32>,
    /// Last completed frame, swapped with `pixels` on completion
    completed: Vec<f32>,
    pixel_index: usize,
    malformed_bytes: u64,
    overflow_records: u64,
}

impl SerialFrameDecoder {
    /// Create a decoder for frames of `pixel_count` samples.
    ///
    /// # Panics
    /// Panics if `window_capacity` cannot hold one record.
    pub fn new(markers: FrameMarkers, pixel_count: usize, window_capacity: usize) -> Self {
        assert!(
            window_capacity >= RECORD_LEN,
            "window capacity must hold at least one record"
        );
        Self {
            markers,
            state: DecoderState::AwaitingFrameStart,
            window: ByteWindow::new(window_capacity),
            pixels: vec![0.0; pixel_count],
            completed: vec![0.0; pixel_count],
            pixel_index: 0,
            malformed_bytes: 0,
            overflow_records: 0,
        }
    }

    pub fn from_config(config: &SerialConfig, pixel_count: usize) -> Self {
        Self::new(
            FrameMarkers::from(config),
            pixel_count,
            config.window_capacity,
        )
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Pixels decoded so far in the frame being assembled.
    pub fn pixel_index(&self) -> usize {
        self.pixel_index
    }

    /// Bytes discarded while resynchronizing inside frames.
    pub fn malformed_bytes(&self) -> u64 {
        self.malformed_bytes
    }

    /// Well-formed records that arrived after the frame was already full.
    pub fn overflow_records(&self) -> u64 {
        self.overflow_records
    }

    /// Feed one byte. Returns the completed frame when this byte closed one.
    pub fn push(&mut self, byte: u8) -> Option<&[f32]> {
        let completed = match self.state {
            DecoderState::AwaitingFrameStart => {
                if byte == self.markers.frame_start {
                    self.finish_frame();
                }
                None
            }
            DecoderState::AwaitingPixelRecord => {
                if byte == self.markers.frame_start && self.window.is_empty() {
                    self.finish_frame()
                } else {
                    if self.window.push(byte).is_some() {
                        self.malformed_bytes += 1;
                    }
                    self.scan()
                }
            }
        };
        completed.map(|count| &self.completed[..count])
    }

    /// Feed a chunk, committing every completed frame to `buffer`.
    ///
    /// Returns the number of frames committed.
    pub fn feed(
        &mut self,
        bytes: &[u8],
        buffer: &SpectrumBuffer,
        recorder: &mut StatsRecorder,
    ) -> usize {
        let mut frames = 0;
        for &byte in bytes {
            if let Some(frame) = self.push(byte) {
                let count = frame.len();
                buffer.commit_frame(frame);
                recorder.record_frame(count as u32, Instant::now());
                trace!(pixels = count, "serial frame committed");
                frames += 1;
            }
        }
        frames
    }

    /// Consume whole records from the window, slipping one byte on mismatch.
    ///
    /// Stops early when a frame completes so the caller sees it before the
    /// next one can overwrite it; any bytes left are scanned on the next push.
    fn scan(&mut self) -> Option<usize> {
        while let Some(head) = self.window.front() {
            if head == self.markers.frame_start {
                self.window.slip();
                if let Some(count) = self.finish_frame() {
                    return Some(count);
                }
                continue;
            }
            if head != self.markers.pixel_start {
                self.window.slip();
                self.malformed_bytes += 1;
                continue;
            }
            let Some(record) = self.window.peek::<RECORD_LEN>() else {
                break;
            };
            match self.markers.decode_record(record) {
                Some(value) => {
                    self.store(value);
                    self.window.consume(RECORD_LEN);
                }
                None => {
                    self.window.slip();
                    self.malformed_bytes += 1;
                }
            }
        }
        None
    }

    fn store(&mut self, value: u16) {
        if self.pixel_index < self.pixels.len() {
            self.pixels[self.pixel_index] = f32::from(value);
            self.pixel_index += 1;
        } else {
            self.overflow_records += 1;
        }
    }

    /// Close the current frame and open a new one.
    ///
    /// Returns the pixel count when the closed frame had any pixels.
    fn finish_frame(&mut self) -> Option<usize> {
        let count = self.pixel_index;
        self.pixel_index = 0;
        self.state = DecoderState::AwaitingPixelRecord;
        if count == 0 {
            return None;
        }
        std::mem::swap(&mut self.pixels, &mut self.completed);
        Some(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::record::encode_frame;
    use crate::stats::ReceiverStats;
    use std::sync::Arc;

    fn decoder(pixel_count: usize) -> SerialFrameDecoder {
        SerialFrameDecoder::new(FrameMarkers::default(), pixel_count, 64)
    }

    fn sink(pixel_count: usize) -> (SpectrumBuffer, StatsRecorder, Arc<ReceiverStats>) {
        let stats = Arc::new(ReceiverStats::new());
        (
            SpectrumBuffer::new(pixel_count),
            StatsRecorder::new(stats.clone()),
            stats,
        )
    }

    #[test]
    fn test_two_pixel_frame_committed_once_at_next_frame_start() {
        let mut dec = decoder(8);
        let (buffer, mut recorder, stats) = sink(8);
        buffer.commit_frame(&[9.0; 8]);

        let head = [0x11, 0xA5, 0x01, 0x00, 0x5A, 0xA5, 0x02, 0x00, 0x5A];
        assert_eq!(dec.feed(&head, &buffer, &mut recorder), 0);
        assert_eq!(buffer.read_live().samples(), &[9.0; 8]);

        assert_eq!(dec.feed(&[0x11], &buffer, &mut recorder), 1);
        assert_eq!(
            buffer.read_live().samples(),
            &[1.0, 2.0, 9.0, 9.0, 9.0, 9.0, 9.0, 9.0]
        );
        assert_eq!(stats.frames_received(), 1);
        assert_eq!(stats.last_sequence(), 2);
    }

    #[test]
    fn test_resync_after_stray_byte() {
        let mut dec = decoder(4);
        let (buffer, mut recorder, _) = sink(4);

        let bytes = [0x11, 0xFF, 0xA5, 0x05, 0x00, 0x5A, 0x11];
        assert_eq!(dec.feed(&bytes, &buffer, &mut recorder), 1);
        assert_eq!(buffer.read_live()[0], 5.0);
        assert_eq!(dec.malformed_bytes(), 1);
    }

    #[test]
    fn test_bytes_before_first_frame_start_discarded() {
        let mut dec = decoder(4);
        for byte in [0xA5, 0x07, 0x00, 0x5A, 0x42] {
            assert!(dec.push(byte).is_none());
        }
        assert_eq!(dec.state(), DecoderState::AwaitingFrameStart);
        assert_eq!(dec.pixel_index(), 0);

        dec.push(0x11);
        assert_eq!(dec.state(), DecoderState::AwaitingPixelRecord);
    }

    #[test]
    fn test_empty_frame_not_committed() {
        let mut dec = decoder(4);
        let (buffer, mut recorder, stats) = sink(4);
        assert_eq!(dec.feed(&[0x11, 0x11, 0x11], &buffer, &mut recorder), 0);
        assert_eq!(buffer.commit_count(), 0);
        assert_eq!(stats.frames_received(), 0);
    }

    #[test]
    fn test_records_past_pixel_count_dropped() {
        let mut dec = decoder(2);
        let (buffer, mut recorder, stats) = sink(2);
        let mut bytes = encode_frame(&FrameMarkers::default(), &[10, 20, 30, 40]);
        bytes.push(0x11);

        assert_eq!(dec.feed(&bytes, &buffer, &mut recorder), 1);
        assert_eq!(buffer.read_live().samples(), &[10.0, 20.0]);
        assert_eq!(dec.overflow_records(), 2);
        assert_eq!(stats.last_sequence(), 2);
    }

    #[test]
    fn test_frame_start_value_inside_record_is_data() {
        let mut dec = decoder(4);
        // 0x1111 = 4369: both data bytes equal the frame-start marker
        let frame = dec.push(0x11).map(<[f32]>::to_vec);
        assert!(frame.is_none());
        for byte in [0xA5, 0x11, 0x11, 0x5A] {
            assert!(dec.push(byte).is_none());
        }
        assert_eq!(dec.pixel_index(), 1);
        let frame = dec.push(0x11).unwrap();
        assert_eq!(frame, &[4369.0]);
    }

    #[test]
    fn test_truncated_record_then_frame_start_recovers() {
        let mut dec = decoder(4);
        let (buffer, mut recorder, _) = sink(4);
        // One good pixel, then a record cut short by the next frame
        let bytes = [
            0x11, 0xA5, 0x03, 0x00, 0x5A, // pixel 3
            0xA5, 0x04, // truncated
            0x11, // next frame starts
            0xA5, 0x08, 0x00, 0x5A, // pixel 8
            0x11,
        ];
        assert_eq!(dec.feed(&bytes, &buffer, &mut recorder), 2);
        assert_eq!(buffer.read_live()[0], 8.0);
    }

    #[test]
    fn test_consecutive_frames_reuse_buffers() {
        let markers = FrameMarkers::default();
        let mut dec = decoder(3);
        let (buffer, mut recorder, stats) = sink(3);

        let mut stream = encode_frame(&markers, &[1, 2, 3]);
        stream.extend(encode_frame(&markers, &[4, 5, 6]));
        stream.extend(encode_frame(&markers, &[7]));
        stream.push(markers.frame_start);

        assert_eq!(dec.feed(&stream, &buffer, &mut recorder), 3);
        assert_eq!(buffer.read_live().samples(), &[7.0, 5.0, 6.0]);
        assert_eq!(stats.frames_received(), 3);
        assert_eq!(stats.last_sequence(), 1);
    }

    #[test]
    fn test_garbage_never_grows_window_past_capacity() {
        let mut dec = SerialFrameDecoder::new(FrameMarkers::default(), 4, 4);
        dec.push(0x11);
        for i in 0..1000u32 {
            // never a valid record
            dec.push(if i % 2 == 0 { 0xA5 } else { 0x00 });
        }
        assert!(dec.window.len() < RECORD_LEN);
        assert!(dec.malformed_bytes() > 0);
        assert_eq!(dec.pixel_index(), 0);
    }
}
