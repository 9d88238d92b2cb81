//! Hush DSP - Digital Signal Processing Module
//!
//! This crate provides the signal side of Hush, including:
//! - PCM format and frame model (`AudioFormat`, `AudioBuffer`)
//! - Per-channel peak level metering in dBFS
//! - The `AudioEffect` trait every processing engine implements
//! - Two voice engines (25 ms "preprocess", 10 ms "apm") plus a bypass
//!
//! # Architecture
//!
//! Engines consume fixed-duration frames of 16-bit PCM and an equally long
//! echo reference frame. Each engine declares its interval up front; the
//! pipeline in `hush_core` slices its input to match and swaps engines
//! wholesale through [`create_backend`].

mod agc;
mod apm;
mod backend;
mod denoise;
mod echo;
mod effect;
mod error;
mod format;
mod highpass;
mod level;
mod limiter;
mod preprocess;
mod vad;

pub use agc::GainController;
pub use apm::{ApmEngine, APM_INTERVAL_MS, APM_PARAMETERS, APM_SAMPLE_RATE};
pub use backend::{create_backend, BackendKind, Passthrough, PASSTHROUGH_INTERVAL_MS};
pub use denoise::SpectralDenoiser;
pub use echo::EchoCanceller;
pub use effect::{
    check_frame_pair, frame_size_for, AudioEffect, ParamValue, VoiceActivity,
    VoiceActivityListener,
};
pub use error::DspError;
pub use format::{AudioBuffer, AudioFormat, ByteOrder, ChannelPlanes, SampleType};
pub use highpass::HighPassFilter;
pub use level::{amplitude_to_db, audio_levels, peak_value, LEVEL_FLOOR_DB};
pub use limiter::Limiter;
pub use preprocess::{PreprocessEngine, PREPROCESS_INTERVAL_MS, PREPROCESS_PARAMETERS};
pub use vad::{EnergyEstimator, VoiceDetector};
