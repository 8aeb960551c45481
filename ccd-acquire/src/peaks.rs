//! Peak detection on a captured frame.
//!
//! A pixel `i` is a peak when it reaches the threshold and is strictly greater
//! than every other pixel within `min_distance` on either side. Neighbours of
//! equal height disqualify each other, so a flat-topped plateau yields no peak.
//!
//! Cost is `O(N * min_distance)`. At a few thousand pixels and the usual
//! distances of tens of pixels this is negligible.
// TODO: switch to a monotonic-deque sliding maximum if min_distance ever gets into the hundreds.

use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;

/// Detection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakParams {
    /// Minimum intensity for a candidate
    pub threshold: f32,
    /// Half-width of the exclusion window, in pixels
    pub min_distance: usize,
}

impl Default for PeakParams {
    fn default() -> Self {
        Self {
            threshold: 500.0,
            min_distance: 50,
        }
    }
}

/// A detected local maximum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Peak {
    pub pixel_index: usize,
    /// Wavelength under the calibration current at detection time (0 when unset)
    pub wavelength_nm: f64,
    pub intensity: f32,
}

/// Find peaks in `samples`, in ascending pixel order.
///
/// Only indices in `[min_distance, N - min_distance)` are candidates, so the
/// full comparison window always lies inside the frame.
pub fn detect_peaks(
    samples: &[f32],
    threshold: f32,
    min_distance: usize,
    calibration: &Calibration,
) -> Vec<Peak> {
    let n = samples.len();
    let end = n.saturating_sub(min_distance);
    if min_distance >= end {
        return Vec::new();
    }

    (min_distance..end)
        .filter(|&i| is_peak(samples, i, threshold, min_distance))
        .map(|i| Peak {
            pixel_index: i,
            wavelength_nm: calibration.wavelength_of(i),
            intensity: samples[i],
        })
        .collect()
}

/// [`detect_peaks`] with parameters bundled.
pub fn detect_with(samples: &[f32], params: &PeakParams, calibration: &Calibration) -> Vec<Peak> {
    detect_peaks(samples, params.threshold, params.min_distance, calibration)
}

fn is_peak(samples: &[f32], i: usize, threshold: f32, min_distance: usize) -> bool {
    let value = samples[i];
    if value < threshold {
        return false;
    }
    let window = &samples[i - min_distance..=i + min_distance];
    window
        .iter()
        .enumerate()
        .all(|(offset, &other)| offset == min_distance || other < value)
}
