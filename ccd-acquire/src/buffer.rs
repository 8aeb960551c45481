//! Shared spectrum buffer: the single source of truth for current intensities.
//!
//! Two fixed-length slots exist. The *live* slot is overwritten by whichever
//! receiver is active; the *frozen* slot is a point-in-time copy taken by
//! [`SpectrumBuffer::freeze`] and left untouched until the next freeze.
//!
//! Both slots sit behind one [`Mutex`]. Each commit, freeze and read holds the
//! lock for the whole operation, so a reader sees either the previous frame or
//! the new one, never a half-written array. No lock is held across I/O: the
//! decoders assemble a frame privately and only lock to copy it in.

use std::ops::Deref;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::calibration::Calibration;

/// One sensor read: exactly `pixel_count` intensity samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    samples: Vec<f32>,
}

impl Frame {
    pub fn from_samples(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Wavelength of every pixel under `calibration` (all zero when unset).
    pub fn wavelengths(&self, calibration: &Calibration) -> Vec<f64> {
        (0..self.samples.len())
            .map(|pixel| calibration.wavelength_of(pixel))
            .collect()
    }

    /// Largest sample and its pixel index; the first one wins on ties.
    pub fn max(&self) -> Option<(usize, f32)> {
        self.samples
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best, (i, v)| match best {
                Some((_, b)) if b >= v => best,
                _ => Some((i, v)),
            })
    }
}

impl Deref for Frame {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.samples
    }
}

#[derive(Debug)]
struct Slots {
    live: Vec<f32>,
    frozen: Option<Vec<f32>>,
    frozen_active: bool,
    commits: u64,
}

/// Live and frozen frame storage shared between a receiver task and consumers.
#[derive(Debug)]
pub struct SpectrumBuffer {
    pixel_count: usize,
    slots: Mutex<Slots>,
}

impl SpectrumBuffer {
    /// Allocate both slots for `pixel_count` samples. Sizes never change afterwards.
    pub fn new(pixel_count: usize) -> Self {
        Self {
            pixel_count,
            slots: Mutex::new(Slots {
                live: vec![0.0; pixel_count],
                frozen: None,
                frozen_active: false,
                commits: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pixel_count(&self) -> usize {
        self.pixel_count
    }

    /// Overwrite the first `samples.len()` entries of the live frame.
    ///
    /// Entries past the end of `samples` keep their previous values; samples
    /// beyond `pixel_count` are ignored. Returns the number of entries written.
    pub fn commit_frame(&self, samples: &[f32]) -> usize {
        let count = samples.len().min(self.pixel_count);
        let mut slots = self.lock();
        slots.live[..count].copy_from_slice(&samples[..count]);
        slots.commits += 1;
        count
    }

    /// Copy of the live frame.
    pub fn read_live(&self) -> Frame {
        Frame::from_samples(self.lock().live.clone())
    }

    /// Copy of the frozen frame, `None` until the first [`freeze`](Self::freeze).
    pub fn read_frozen(&self) -> Option<Frame> {
        self.lock().frozen.clone().map(Frame::from_samples)
    }

    /// Copy the live frame into the frozen slot and switch display to it.
    ///
    /// Runs under the same lock as [`commit_frame`](Self::commit_frame), so the
    /// snapshot is always a fully committed frame. Returns the snapshot.
    pub fn freeze(&self) -> Frame {
        let mut slots = self.lock();
        let snapshot = slots.live.clone();
        slots.frozen = Some(snapshot.clone());
        slots.frozen_active = true;
        Frame::from_samples(snapshot)
    }

    /// Return display to the live slot. The frozen copy is kept until the next freeze.
    pub fn unfreeze(&self) {
        self.lock().frozen_active = false;
    }

    pub fn is_frozen(&self) -> bool {
        self.lock().frozen_active
    }

    /// Frame that display should show: frozen while frozen, otherwise live.
    ///
    /// `None` while nothing has been committed or frozen yet.
    pub fn current(&self) -> Option<Frame> {
        let slots = self.lock();
        if slots.frozen_active {
            return slots.frozen.clone().map(Frame::from_samples);
        }
        if slots.commits == 0 {
            return None;
        }
        Some(Frame::from_samples(slots.live.clone()))
    }

    /// Number of commits since construction.
    pub fn commit_count(&self) -> u64 {
        self.lock().commits
    }
}
