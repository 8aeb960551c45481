//! Acquisition and decoding engine for linear CCD spectrometers.
//!
//! This crate receives intensity frames from a linear CCD (TCD1304-class,
//! ~3700 pixels) over one of two transports and keeps the most recent frame
//! available for display, calibration and export.
//!
//! # Transports
//! - [`serial`] - byte stream at 1 Mbaud. `0x11` starts a frame, every pixel
//!   is wrapped in a `[0xA5][lo][hi][0x5A]` envelope.
//! - [`udp`] - one datagram per frame with a fixed 13-byte header followed by
//!   little-endian `u16` samples.
//!
//! # Components
//! - [`buffer::SpectrumBuffer`] - live and frozen frame slots behind one lock
//! - [`receiver::Receiver`] - starts/stops exactly one background decoding task
//! - [`calibration::Calibration`] - two-point pixel to wavelength mapping
//! - [`peaks`] - local maximum search on a captured frame
//! - [`spectrometer::Spectrometer`] - the owned context tying it all together

pub mod buffer;
pub mod calibration;
pub mod config;
pub mod error;
pub mod peaks;
pub mod receiver;
pub mod serial;
pub mod spectrometer;
pub mod stats;
pub mod udp;
pub mod window;

pub use buffer::{Frame, SpectrumBuffer};
pub use calibration::{Calibration, CalibrationPoint};
pub use config::AcquisitionConfig;
pub use error::{AcquisitionError, AcquisitionResult};
pub use peaks::{detect_peaks, Peak, PeakParams};
pub use receiver::{Receiver, ReceiverState, TaskExit, TransportConfig, TransportKind};
pub use spectrometer::Spectrometer;
pub use stats::{ReceiverStats, StatsSnapshot};
