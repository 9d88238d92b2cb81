//! Spectral Noise Suppression
//!
//! Short-time spectral subtraction used by the preprocess engine.
//!
//! # Algorithm
//!
//! Each channel runs an STFT with a sqrt-Hann window at 50% overlap (the
//! squared window sums to one, so unmodified spectra reconstruct exactly).
//! Per bin, a noise power estimate falls quickly towards the (smoothed) bin
//! power when it drops below and creeps up slowly otherwise, so it follows
//! the noise floor rather than speech. The bin gain is the
//! spectral-subtraction gain, floored at the configured maximum attenuation
//! and smoothed across blocks to avoid musical noise.
//!
//! Blocks do not line up with pipeline frames, so each channel carries input
//! and output FIFOs. The output FIFO starts with one hop of silence, which is
//! the suppressor's latency.

use std::collections::VecDeque;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::limiter::db_to_linear;

/// Default maximum attenuation in dB
pub const DEFAULT_MAX_ATTENUATION_DB: f32 = -15.0;

/// Blocks used to seed the noise estimate before suppression starts adapting
const WARMUP_BLOCKS: u32 = 8;

/// Over-subtraction factor applied to the noise estimate
const OVER_SUBTRACTION: f32 = 3.0;

/// Weight of the previous block when smoothing bin power for noise tracking
const POWER_SMOOTHING: f32 = 0.8;

/// Weight of the previous block's gain when smoothing
const GAIN_SMOOTHING: f32 = 0.5;

/// Noise estimate smoothing when the spectrum drops below it
const NOISE_FALL: f32 = 0.9;

/// Noise estimate smoothing when the spectrum is above it
const NOISE_RISE: f32 = 0.998;

/// FFT size: smallest power of two covering 20 ms
fn fft_size_for(sample_rate: u32) -> usize {
    ((sample_rate / 50).max(64) as usize).next_power_of_two()
}

struct ChannelState {
    /// Sliding analysis window (last `fft_size` samples)
    window_buf: Vec<f32>,
    /// Second half of the previous synthesis block
    overlap: Vec<f32>,
    pending_in: VecDeque<f32>,
    pending_out: VecDeque<f32>,
    smoothed: Vec<f32>,
    noise: Vec<f32>,
    gains: Vec<f32>,
    blocks: u32,
}

impl ChannelState {
    fn new(fft_size: usize) -> Self {
        let hop = fft_size / 2;
        let bins = fft_size / 2 + 1;
        Self {
            window_buf: vec![0.0; fft_size],
            overlap: vec![0.0; hop],
            pending_in: VecDeque::with_capacity(fft_size * 2),
            pending_out: std::iter::repeat(0.0).take(hop).collect(),
            smoothed: vec![0.0; bins],
            noise: vec![0.0; bins],
            gains: vec![1.0; bins],
            blocks: 0,
        }
    }
}

/// Multi-channel spectral subtraction noise suppressor
pub struct SpectralDenoiser {
    fft_size: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    channels: Vec<ChannelState>,
    gain_floor: f32,
    enabled: bool,
}

impl SpectralDenoiser {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        let fft_size = fft_size_for(sample_rate);
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);

        let window = (0..fft_size)
            .map(|n| (std::f32::consts::PI * n as f32 / fft_size as f32).sin())
            .collect();

        Self {
            fft_size,
            forward,
            inverse,
            window,
            spectrum: vec![Complex::new(0.0, 0.0); fft_size],
            channels: (0..channels).map(|_| ChannelState::new(fft_size)).collect(),
            gain_floor: db_to_linear(DEFAULT_MAX_ATTENUATION_DB),
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

    /// Set the deepest attenuation applied to any bin (dB, clamped to ≤ 0)
    pub fn set_max_attenuation_db(&mut self, db: f32) {
        self.gain_floor = db_to_linear(db.min(0.0));
    }

    pub fn max_attenuation_db(&self) -> f32 {
        20.0 * self.gain_floor.log10()
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Latency in samples introduced while enabled
    pub fn latency(&self) -> usize {
        self.fft_size / 2
    }

    /// Suppress noise in one channel plane in place
    ///
    /// # Real-time Safety
    /// Allocation-free once the FIFOs have grown to the frame size.
    pub fn process(&mut self, channel: usize, samples: &mut [f32]) {
        if !self.enabled || channel >= self.channels.len() {
            return;
        }

        self.channels[channel].pending_in.extend(samples.iter().copied());

        let hop = self.fft_size / 2;
        while self.channels[channel].pending_in.len() >= hop {
            self.process_block(channel);
        }

        let state = &mut self.channels[channel];
        for sample in samples.iter_mut() {
            *sample = state.pending_out.pop_front().unwrap_or(0.0);
        }
    }

    fn process_block(&mut self, channel: usize) {
        let size = self.fft_size;
        let hop = size / 2;
        let gain_floor = self.gain_floor;
        let state = &mut self.channels[channel];

        state.window_buf.copy_within(hop.., 0);
        for slot in state.window_buf[size - hop..].iter_mut() {
            *slot = state.pending_in.pop_front().unwrap_or(0.0);
        }

        for ((bin, sample), w) in self.spectrum.iter_mut().zip(&state.window_buf).zip(&self.window) {
            *bin = Complex::new(sample * w, 0.0);
        }
        self.forward.process(&mut self.spectrum);

        let warming_up = state.blocks < WARMUP_BLOCKS;
        for k in 0..=size / 2 {
            let power = self.spectrum[k].norm_sqr();
            let smoothed = &mut state.smoothed[k];
            let noise = &mut state.noise[k];

            if warming_up {
                *noise += (power - *noise) / (state.blocks + 1) as f32;
                *smoothed = *noise;
            } else {
                *smoothed = POWER_SMOOTHING * *smoothed + (1.0 - POWER_SMOOTHING) * power;
                if *smoothed < *noise {
                    *noise = NOISE_FALL * *noise + (1.0 - NOISE_FALL) * *smoothed;
                } else {
                    *noise = NOISE_RISE * *noise + (1.0 - NOISE_RISE) * *smoothed;
                }
            }

            let target = if power > f32::EPSILON {
                ((power - OVER_SUBTRACTION * *noise).max(0.0) / power).sqrt()
            } else {
                0.0
            };
            let gain = (GAIN_SMOOTHING * state.gains[k] + (1.0 - GAIN_SMOOTHING) * target)
                .clamp(gain_floor, 1.0);
            state.gains[k] = gain;

            self.spectrum[k] *= gain;
            if k != 0 && k != size / 2 {
                self.spectrum[size - k] *= gain;
            }
        }
        state.blocks = state.blocks.saturating_add(1);

        self.inverse.process(&mut self.spectrum);

        let scale = 1.0 / size as f32;
        for n in 0..hop {
            let first = self.spectrum[n].re * scale * self.window[n];
            state.pending_out.push_back(state.overlap[n] + first);
            state.overlap[n] = self.spectrum[n + hop].re * scale * self.window[n + hop];
        }
    }

    /// Forget noise estimates and buffered audio
    pub fn reset(&mut self) {
        let size = self.fft_size;
        for state in &mut self.channels {
            *state = ChannelState::new(size);
        }
    }
}
