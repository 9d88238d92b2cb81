//! Hush Core - Voice Pipeline and Audio Engine
//!
//! This crate provides the runtime side of Hush, including:
//! - The frame-quantized `AudioPipeline` with hot-swappable backends
//! - WAV archiving of raw and processed audio
//! - Audio device enumeration and cpal stream management
//! - An `AudioEngine` controller with persistent settings
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Caller / CLI                           │
//! │        ──commands──▶ AudioEngine ◀──events──                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ crossbeam-channel
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  capture ──▶ input queue ──▶ hush-processing ──▶ output     │
//! │  monitor ──▶ aux queue  ──┘        │              queue     │
//! │                              backend + WAV sinks   │        │
//! │  playback ◀────────────────────────────────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod device;
mod engine;
mod error;
mod message;
mod pipeline;
mod queue;
mod settings;
mod stream;
mod wav;

pub use config::{ArchiveConfig, EngineConfig, PipelineConfig};
pub use device::{resolve_device, AudioDevice, DeviceType};
pub use engine::AudioEngine;
pub use error::{EngineError, EngineResult};
pub use message::{Command, Event};
pub use pipeline::{AudioPipeline, PipelineStats, EVENT_CHANNEL_CAPACITY};
pub use queue::ByteQueue;
pub use settings::{HushSettings, UserPreset};
pub use stream::DeviceStreams;
pub use wav::{is_supported_format, WavFileWriter, WAV_HEADER_LEN};

// Re-export DSP types for convenience
pub use hush_dsp::{AudioFormat, BackendKind, DspError, ParamValue};
