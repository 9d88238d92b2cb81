//! Backend Factory
//!
//! Names the engines the pipeline can switch between and builds them for a
//! given pair of stream formats.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::apm::{ApmEngine, APM_INTERVAL_MS, APM_PARAMETERS};
use crate::effect::{check_frame_pair, AudioEffect, ParamValue, VoiceActivityListener};
use crate::error::DspError;
use crate::format::{AudioBuffer, AudioFormat};
use crate::preprocess::{PreprocessEngine, PREPROCESS_INTERVAL_MS, PREPROCESS_PARAMETERS};

/// Processing interval of the passthrough engine
pub const PASSTHROUGH_INTERVAL_MS: u32 = 10;

/// Selectable processing engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// 25 ms spectral preprocessor
    #[default]
    Preprocess,
    /// 10 ms RNNoise-based processing module
    Apm,
    /// 10 ms bypass
    Passthrough,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Preprocess, BackendKind::Apm, BackendKind::Passthrough];

    /// Processing interval of the engine, known without building it
    pub fn required_interval_ms(&self) -> u32 {
        match self {
            BackendKind::Preprocess => PREPROCESS_INTERVAL_MS,
            BackendKind::Apm => APM_INTERVAL_MS,
            BackendKind::Passthrough => PASSTHROUGH_INTERVAL_MS,
        }
    }

    /// Parameter names the engine accepts
    pub fn parameters(&self) -> &'static [&'static str] {
        match self {
            BackendKind::Preprocess => PREPROCESS_PARAMETERS,
            BackendKind::Apm => APM_PARAMETERS,
            BackendKind::Passthrough => &[],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Preprocess => "preprocess",
            BackendKind::Apm => "apm",
            BackendKind::Passthrough => "passthrough",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = DspError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "preprocess" | "speex" => Ok(BackendKind::Preprocess),
            "apm" | "webrtc" => Ok(BackendKind::Apm),
            "passthrough" | "bypass" | "none" => Ok(BackendKind::Passthrough),
            other => Err(DspError::BackendInit(format!("unknown backend '{}'", other))),
        }
    }
}

/// Build the engine named by `kind` for the given stream formats
pub fn create_backend(
    kind: BackendKind,
    main: &AudioFormat,
    aux: &AudioFormat,
) -> Result<Box<dyn AudioEffect>, DspError> {
    Ok(match kind {
        BackendKind::Preprocess => Box::new(PreprocessEngine::new(main, aux)?),
        BackendKind::Apm => Box::new(ApmEngine::new(main, aux)?),
        BackendKind::Passthrough => Box::new(Passthrough::new()),
    })
}

/// Engine that leaves audio untouched
///
/// Accepts any format; still enforces the main/aux pairing contract.
#[derive(Debug, Default)]
pub struct Passthrough;

impl Passthrough {
    pub fn new() -> Self {
        Self
    }
}

impl AudioEffect for Passthrough {
    fn required_interval_ms(&self) -> u32 {
        PASSTHROUGH_INTERVAL_MS
    }

    fn process(&mut self, main: &mut AudioBuffer, aux: &AudioBuffer) -> Result<(), DspError> {
        check_frame_pair(main, aux)
    }

    fn set_parameter(&mut self, name: &str, _value: ParamValue) -> Result<(), DspError> {
        Err(DspError::UnsupportedParameter(name.to_string()))
    }

    // Never reports voice activity
    fn set_voice_activity_listener(&mut self, _listener: VoiceActivityListener) {}

    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn reset(&mut self) {}
}
