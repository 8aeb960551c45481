//! The acquisition context.
//!
//! A [`Spectrometer`] owns everything one instrument needs: the shared buffer,
//! the statistics, the receiver and the calibration. Nothing is global, so
//! several contexts can coexist (tests create one per case).

use std::io::Read;
use std::sync::Arc;

use tracing::info;

use crate::buffer::{Frame, SpectrumBuffer};
use crate::calibration::{Calibration, CalibrationPoint};
use crate::config::AcquisitionConfig;
use crate::error::AcquisitionResult;
use crate::peaks::{self, Peak, PeakParams};
use crate::receiver::{Receiver, ReceiverState, TaskExit, TransportConfig, TransportKind};
use crate::stats::{ReceiverStats, StatsSnapshot};

pub struct Spectrometer {
    config: AcquisitionConfig,
    buffer: Arc<SpectrumBuffer>,
    stats: Arc<ReceiverStats>,
    receiver: Receiver,
    calibration: Calibration,
    peak_params: PeakParams,
}

impl Spectrometer {
    /// Validate `config`, allocate the buffers and apply any configured calibration.
    pub fn new(config: AcquisitionConfig) -> AcquisitionResult<Self> {
        config.validate()?;

        let calibration = match config.calibration {
            Some([p1, p2]) => Calibration::from_points(p1, p2)?,
            None => Calibration::Unset,
        };
        let buffer = Arc::new(SpectrumBuffer::new(config.sensor.pixel_count));
        let stats = Arc::new(ReceiverStats::new());
        let receiver = Receiver::new(buffer.clone(), stats.clone());

        Ok(Self {
            peak_params: config.peaks,
            config,
            buffer,
            stats,
            receiver,
            calibration,
        })
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    pub fn pixel_count(&self) -> usize {
        self.buffer.pixel_count()
    }

    /// Shared buffer handle, for consumers living on other threads.
    pub fn buffer(&self) -> Arc<SpectrumBuffer> {
        self.buffer.clone()
    }

    // Frames

    pub fn read_live_frame(&self) -> Frame {
        self.buffer.read_live()
    }

    /// Snapshot the live frame; later commits leave the snapshot untouched.
    pub fn freeze(&self) -> Frame {
        self.buffer.freeze()
    }

    pub fn unfreeze(&self) {
        self.buffer.unfreeze();
    }

    pub fn is_frozen(&self) -> bool {
        self.buffer.is_frozen()
    }

    pub fn read_frozen_frame(&self) -> Option<Frame> {
        self.buffer.read_frozen()
    }

    /// Frozen frame while frozen, live frame otherwise, `None` before any data.
    pub fn current_frame(&self) -> Option<Frame> {
        self.buffer.current()
    }

    // Calibration

    pub fn current_calibration(&self) -> Calibration {
        self.calibration
    }

    /// Replace the calibration. On error the previous calibration stays in effect.
    pub fn set_calibration(
        &mut self,
        p1: CalibrationPoint,
        p2: CalibrationPoint,
    ) -> AcquisitionResult<Calibration> {
        let calibration = Calibration::from_points(p1, p2)?;
        if let Calibration::Linear { slope, offset } = calibration {
            info!("Calibrated: {slope:.6} nm/px, {offset:.3} nm at pixel 0");
        }
        self.calibration = calibration;
        Ok(calibration)
    }

    pub fn clear_calibration(&mut self) {
        self.calibration = Calibration::Unset;
    }

    /// Wavelength axis of `frame` under the current calibration.
    pub fn wavelengths(&self, frame: &Frame) -> Vec<f64> {
        frame.wavelengths(&self.calibration)
    }

    // Peaks

    pub fn peak_params(&self) -> PeakParams {
        self.peak_params
    }

    pub fn set_peak_params(&mut self, params: PeakParams) {
        self.peak_params = params;
    }

    /// Peaks of `frame`, labelled with the current calibration.
    pub fn detect_peaks(&self, frame: &Frame, threshold: f32, min_distance: usize) -> Vec<Peak> {
        peaks::detect_peaks(frame, threshold, min_distance, &self.calibration)
    }

    /// Freeze, then detect peaks on the snapshot with the configured parameters.
    pub fn freeze_and_detect(&self) -> (Frame, Vec<Peak>) {
        let frame = self.freeze();
        let found = peaks::detect_with(&frame, &self.peak_params, &self.calibration);
        info!("Frozen frame has {} peaks", found.len());
        (frame, found)
    }

    // Receiver

    /// Start `kind` with the transport settings from the configuration.
    pub fn start(&mut self, kind: TransportKind) -> AcquisitionResult<()> {
        let transport = match kind {
            TransportKind::Serial => TransportConfig::Serial(self.config.serial.clone()),
            TransportKind::Udp => TransportConfig::Udp(self.config.udp.clone()),
        };
        self.receiver.start(&transport)
    }

    /// Start with explicit transport settings.
    pub fn start_with(&mut self, transport: &TransportConfig) -> AcquisitionResult<()> {
        self.receiver.start(transport)
    }

    /// Decode the serial protocol from an already-open byte stream.
    pub fn start_stream<R>(&mut self, reader: R) -> AcquisitionResult<()>
    where
        R: Read + Send + 'static,
    {
        let config = self.config.serial.clone();
        self.receiver.start_stream(reader, &config)
    }

    pub fn stop(&mut self) -> Option<TaskExit> {
        self.receiver.stop()
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    pub fn receiver_state(&self) -> ReceiverState {
        self.receiver.state()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}
