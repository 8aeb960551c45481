//! Two-point wavelength calibration.
//!
//! A spectrometer disperses light linearly enough across the CCD that two
//! known lines (e.g. mercury 404.66 nm and 546.07 nm) pin down the mapping:
//!
//! ```text
//! wavelength_nm = A * pixel + B
//! A = (wl2 - wl1) / (px2 - px1)
//! B = wl1 - A * px1
//! ```
//!
//! The mapping is extrapolated outside the reference points without clamping.

use serde::{Deserialize, Serialize};

use crate::error::{AcquisitionError, AcquisitionResult};

/// A pixel with a known wavelength.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub pixel_index: usize,
    pub wavelength_nm: f64,
}

impl CalibrationPoint {
    pub fn new(pixel_index: usize, wavelength_nm: f64) -> Self {
        Self {
            pixel_index,
            wavelength_nm,
        }
    }
}

/// Pixel to wavelength mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum Calibration {
    /// No calibration; every wavelength query returns 0.
    #[default]
    Unset,
    /// `wavelength = slope * pixel + offset`
    Linear {
        /// nm per pixel (dispersion, A)
        slope: f64,
        /// nm at pixel 0 (B)
        offset: f64,
    },
}

impl Calibration {
    /// Fit the affine mapping through two reference points.
    ///
    /// # Errors
    /// [`AcquisitionError::CalibrationInvalid`] when both points share a pixel
    /// index; the division is never attempted.
    pub fn from_points(p1: CalibrationPoint, p2: CalibrationPoint) -> AcquisitionResult<Self> {
        if p1.pixel_index == p2.pixel_index {
            return Err(AcquisitionError::CalibrationInvalid {
                pixel: p1.pixel_index,
            });
        }
        let dp = p2.pixel_index as f64 - p1.pixel_index as f64;
        let slope = (p2.wavelength_nm - p1.wavelength_nm) / dp;
        let offset = p1.wavelength_nm - slope * p1.pixel_index as f64;
        Ok(Calibration::Linear { slope, offset })
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Calibration::Linear { .. })
    }

    /// Wavelength in nm of `pixel`, or 0 when unset.
    pub fn wavelength_of(&self, pixel: usize) -> f64 {
        match *self {
            Calibration::Unset => 0.0,
            Calibration::Linear { slope, offset } => slope * pixel as f64 + offset,
        }
    }

    /// Fractional pixel position of `wavelength_nm`.
    ///
    /// `None` when unset or when the slope is zero (both points at the same wavelength).
    pub fn pixel_of(&self, wavelength_nm: f64) -> Option<f64> {
        match *self {
            Calibration::Linear { slope, offset } if slope != 0.0 => {
                Some((wavelength_nm - offset) / slope)
            }
            _ => None,
        }
    }
}

/// Free-function form of [`Calibration::from_points`].
pub fn calibrate(p1: CalibrationPoint, p2: CalibrationPoint) -> AcquisitionResult<Calibration> {
    Calibration::from_points(p1, p2)
}

/// Free-function form of [`Calibration::wavelength_of`].
pub fn wavelength_of(pixel: usize, calibration: &Calibration) -> f64 {
    calibration.wavelength_of(pixel)
}
