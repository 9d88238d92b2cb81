//! Acoustic Echo Cancellation
//!
//! NLMS adaptive filter that predicts the echo of the reference (far-end)
//! signal in each capture channel and subtracts it, followed by a frame-level
//! residual suppressor.
//!
//! # Architecture
//!
//! The reference history is one contiguous buffer: `taps - 1` past samples
//! followed by the current frame, so every filter window is a plain slice.
//! Weights are stored oldest-first to match that slice order, which keeps the
//! inner loop a straight dot product.

use crate::format::ChannelPlanes;
use crate::limiter::db_to_linear;

/// Default echo tail covered by the filter
pub const DEFAULT_TAIL_MS: u32 = 32;

/// NLMS step size
const STEP_SIZE: f32 = 0.5;

/// Reference energy per tap below which the filter does not adapt
const MIN_REFERENCE_POWER: f32 = 1.0;

pub struct EchoCanceller {
    taps: usize,
    /// `taps - 1` past reference samples followed by the current frame
    history: Vec<f32>,
    weights: Vec<Vec<f32>>,
    residual_floor: f32,
    enabled: bool,
}

impl EchoCanceller {
    pub fn new(sample_rate: u32, channels: usize, tail_ms: u32) -> Self {
        let taps = ((sample_rate as u64 * tail_ms as u64 / 1000) as usize).max(1);
        Self {
            taps,
            history: vec![0.0; taps - 1],
            weights: vec![vec![0.0; taps]; channels],
            residual_floor: db_to_linear(-40.0),
            enabled: false,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled && !self.enabled {
            self.reset();
        }
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn taps(&self) -> usize {
        self.taps
    }

    /// Deepest attenuation the residual suppressor applies (dB, clamped to ≤ 0)
    pub fn set_max_attenuation_db(&mut self, db: f32) {
        self.residual_floor = db_to_linear(db.min(0.0));
    }

    /// Remove the echo of `reference` from every plane in place
    ///
    /// `reference` must hold one mono sample per plane sample.
    ///
    /// # Real-time Safety
    /// Allocation-free once the history buffer has grown to the frame size.
    pub fn process(&mut self, planes: &mut ChannelPlanes, reference: &[f32]) {
        if !self.enabled {
            return;
        }

        let keep = self.taps - 1;
        self.history.truncate(keep);
        self.history.extend_from_slice(reference);

        for channel in 0..planes.channels().min(self.weights.len()) {
            let weights = &mut self.weights[channel];
            let samples = planes.plane_mut(channel);
            let len = samples.len().min(reference.len());

            let mut near_energy = 0.0f32;
            let mut echo_energy = 0.0f32;

            for n in 0..len {
                let window = &self.history[n..n + self.taps];
                let estimate: f32 = weights.iter().zip(window).map(|(w, x)| w * x).sum();
                let near = samples[n];
                let error = near - estimate;

                let power: f32 = window.iter().map(|x| x * x).sum();
                if power > MIN_REFERENCE_POWER * self.taps as f32 {
                    let step = STEP_SIZE * error / power;
                    for (w, x) in weights.iter_mut().zip(window) {
                        *w += step * x;
                    }
                }

                near_energy += near * near;
                echo_energy += estimate * estimate;
                samples[n] = error;
            }

            if near_energy > 0.0 {
                let gain = (1.0 - echo_energy / near_energy).clamp(self.residual_floor, 1.0);
                for sample in samples[..len].iter_mut() {
                    *sample *= gain;
                }
            }
        }

        let len = self.history.len();
        self.history.copy_within(len - keep.., 0);
        self.history.truncate(keep);
    }

    /// Clear filter taps and reference history
    pub fn reset(&mut self) {
        self.history.clear();
        self.history.resize(self.taps - 1, 0.0);
        for weights in &mut self.weights {
            weights.iter_mut().for_each(|w| *w = 0.0);
        }
    }
}
