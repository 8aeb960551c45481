//! Receiver statistics.
//!
//! Counters are plain atomics written by the active decoding task and read by
//! anyone. Readers may see fields from slightly different instants; the values
//! are display-only so no cross-field consistency is attempted.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Length of the packets-per-second window.
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Live counters of the current (or most recent) receiver session.
#[derive(Debug, Default)]
pub struct ReceiverStats {
    frames: AtomicU64,
    last_sequence: AtomicU32,
    last_timestamp_us: AtomicU32,
    rate_bits: AtomicU32,
    sequence_gaps: AtomicU64,
}

/// Point-in-time copy of [`ReceiverStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Frames committed to the live buffer
    pub frames_received: u64,
    /// UDP: header sequence number. Serial: pixel count of the last frame,
    /// since the serial protocol carries no sequence field.
    pub last_sequence: u32,
    /// UDP header timestamp of the last accepted packet (0 on serial)
    pub last_timestamp_us: u32,
    /// Frames per second over the last completed one-second window
    pub packets_per_second: f32,
    /// Forward jumps larger than one in the UDP sequence
    pub sequence_gaps: u64,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_received(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn last_sequence(&self) -> u32 {
        self.last_sequence.load(Ordering::Relaxed)
    }

    pub fn packets_per_second(&self) -> f32 {
        f32::from_bits(self.rate_bits.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received(),
            last_sequence: self.last_sequence(),
            last_timestamp_us: self.last_timestamp_us.load(Ordering::Relaxed),
            packets_per_second: self.packets_per_second(),
            sequence_gaps: self.sequence_gaps.load(Ordering::Relaxed),
        }
    }

    /// Zero all counters. Called when a new session starts.
    pub fn reset(&self) {
        self.frames.store(0, Ordering::Relaxed);
        self.last_sequence.store(0, Ordering::Relaxed);
        self.last_timestamp_us.store(0, Ordering::Relaxed);
        self.rate_bits.store(0.0f32.to_bits(), Ordering::Relaxed);
        self.sequence_gaps.store(0, Ordering::Relaxed);
    }
}

/// Counts events and turns them into a rate once per window.
#[derive(Debug, Clone)]
pub struct RateWindow {
    window: Duration,
    started: Instant,
    count: u32,
}

impl RateWindow {
    pub fn new(window: Duration, now: Instant) -> Self {
        Self {
            window,
            started: now,
            count: 0,
        }
    }

    pub fn record(&mut self) {
        self.count += 1;
    }

    /// If a full window has elapsed, return events per second and start a new window.
    pub fn poll(&mut self, now: Instant) -> Option<f32> {
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed < self.window {
            return None;
        }
        let rate = self.count as f32 / elapsed.as_secs_f32();
        self.count = 0;
        self.started = now;
        Some(rate)
    }
}

/// Write side of [`ReceiverStats`], owned by the decoding task.
#[derive(Debug)]
pub struct StatsRecorder {
    stats: Arc<ReceiverStats>,
    window: RateWindow,
    last_sequence: Option<u32>,
}

impl StatsRecorder {
    pub fn new(stats: Arc<ReceiverStats>) -> Self {
        Self {
            stats,
            window: RateWindow::new(RATE_WINDOW, Instant::now()),
            last_sequence: None,
        }
    }

    /// Count one committed frame and record its sequence proxy.
    pub fn record_frame(&mut self, sequence: u32, now: Instant) {
        self.stats.frames.fetch_add(1, Ordering::Relaxed);
        self.stats.last_sequence.store(sequence, Ordering::Relaxed);
        self.window.record();
        self.tick(now);
    }

    /// Count one accepted UDP packet, tracking sequence gaps.
    pub fn record_packet(&mut self, sequence: u32, timestamp_us: u32, now: Instant) {
        if let Some(prev) = self.last_sequence {
            let step = sequence.wrapping_sub(prev);
            // Large steps are backwards moves (restart, reorder), not gaps
            if step > 1 && step < u32::MAX / 2 {
                self.stats.sequence_gaps.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.last_sequence = Some(sequence);
        self.stats
            .last_timestamp_us
            .store(timestamp_us, Ordering::Relaxed);
        self.record_frame(sequence, now);
    }

    /// Publish the rate if the current window is complete.
    pub fn tick(&mut self, now: Instant) {
        if let Some(rate) = self.window.poll(now) {
            self.stats.rate_bits.store(rate.to_bits(), Ordering::Relaxed);
        }
    }

    /// Publish a rate of zero. Called when the link is gone for good.
    pub fn mark_idle(&self) {
        self.stats.rate_bits.store(0.0f32.to_bits(), Ordering::Relaxed);
    }
}
