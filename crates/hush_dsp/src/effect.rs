//! Effect Capability
//!
//! Defines the interface every voice processing engine implements, so the
//! pipeline can hold any of them behind a `Box<dyn AudioEffect>` and swap
//! them at runtime.

use serde::{Deserialize, Serialize};

use crate::error::DspError;
use crate::format::AudioBuffer;

/// Callback fired when an engine's voice activity flag flips
pub type VoiceActivityListener = Box<dyn FnMut(bool) + Send>;

/// Per-channel sample count of one processing interval (integer truncation)
#[inline]
pub fn frame_size_for(sample_rate: u32, interval_ms: u32) -> usize {
    (sample_rate as u64 * interval_ms as u64 / 1000) as usize
}

/// Value of a named engine parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl ParamValue {
    /// Interpret as a flag; numbers are true when non-zero
    pub fn as_bool(&self) -> bool {
        match *self {
            ParamValue::Bool(b) => b,
            ParamValue::Int(i) => i != 0,
            ParamValue::Float(f) => f != 0.0,
        }
    }

    /// Interpret as an integer, rounding floats and saturating to i32
    pub fn as_i32(&self) -> i32 {
        match *self {
            ParamValue::Bool(b) => b as i32,
            ParamValue::Int(i) => i.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            ParamValue::Float(f) => f.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32,
        }
    }

    pub fn as_f32(&self) -> f32 {
        match *self {
            ParamValue::Bool(b) => b as i32 as f32,
            ParamValue::Int(i) => i as f32,
            ParamValue::Float(f) => f as f32,
        }
    }

    /// Numeric value, rejecting booleans for parameters that need a quantity
    pub fn number(&self, name: &str) -> Result<f32, DspError> {
        match self {
            ParamValue::Bool(_) => Err(DspError::InvalidParameterValue {
                name: name.to_string(),
                reason: "expected a number, got a boolean".into(),
            }),
            other => {
                let value = other.as_f32();
                if value.is_finite() {
                    Ok(value)
                } else {
                    Err(DspError::InvalidParameterValue {
                        name: name.to_string(),
                        reason: "value is not finite".into(),
                    })
                }
            }
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value as i64)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<f32> for ParamValue {
    fn from(value: f32) -> Self {
        ParamValue::Float(value as f64)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

/// A voice processing engine
///
/// Engines consume fixed-duration frames. The pipeline asks for
/// `required_interval_ms()` once per installed engine and slices its input
/// accordingly; an engine's interval never changes over its lifetime.
///
/// # Real-time Safety
///
/// `process()` runs on the pipeline's processing thread once per frame.
/// Implementors should not block, and should only allocate while their
/// scratch buffers grow to the first frame's size.
pub trait AudioEffect: Send {
    /// Processing interval in milliseconds
    fn required_interval_ms(&self) -> u32;

    /// Per-channel sample count of one frame at `sample_rate`
    fn frame_size(&self, sample_rate: u32) -> usize {
        frame_size_for(sample_rate, self.required_interval_ms())
    }

    /// Process `main` in place, using `aux` as the echo reference
    ///
    /// Both buffers must carry the same per-channel sample count, otherwise
    /// `DspError::FrameMismatch` is returned and `main` is left untouched.
    fn process(&mut self, main: &mut AudioBuffer, aux: &AudioBuffer) -> Result<(), DspError>;

    /// Set a named parameter
    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), DspError>;

    /// Connect voice activity transitions to `listener`
    fn set_voice_activity_listener(&mut self, listener: VoiceActivityListener);

    /// Human-readable name for logs and UI
    fn name(&self) -> &'static str;

    /// Voice activity as of the last processed frame
    fn is_voice_active(&self) -> bool {
        false
    }

    /// Clear adaptation state (noise estimates, filter taps, gains)
    fn reset(&mut self);
}

/// Check the main/aux pairing contract shared by all engines
pub fn check_frame_pair(main: &AudioBuffer, aux: &AudioBuffer) -> Result<(), DspError> {
    let (main_frames, aux_frames) = (main.frame_count(), aux.frame_count());
    if main_frames != aux_frames {
        return Err(DspError::FrameMismatch {
            main: main_frames,
            aux: aux_frames,
        });
    }
    Ok(())
}

/// Voice activity flag that notifies only on transitions
#[derive(Default)]
pub struct VoiceActivity {
    active: bool,
    listener: Option<VoiceActivityListener>,
}

impl VoiceActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_listener(&mut self, listener: VoiceActivityListener) {
        self.listener = Some(listener);
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Record the detector output for a frame, firing the listener on change
    pub fn update(&mut self, active: bool) {
        if active == self.active {
            return;
        }
        self.active = active;
        if let Some(listener) = self.listener.as_mut() {
            listener(active);
        }
    }

    /// Forget the current state without notifying
    pub fn reset(&mut self) {
        self.active = false;
    }
}

impl std::fmt::Debug for VoiceActivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceActivity")
            .field("active", &self.active)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::AudioFormat;
    use std::sync::{Arc, Mutex};

    /// Test engine that inverts samples (for exercising the trait defaults)
    struct Inverter {
        vad: VoiceActivity,
    }

    impl AudioEffect for Inverter {
        fn required_interval_ms(&self) -> u32 {
            20
        }

        fn process(&mut self, main: &mut AudioBuffer, aux: &AudioBuffer) -> Result<(), DspError> {
            check_frame_pair(main, aux)?;
            let samples: Vec<i16> = main.to_i16()?.iter().map(|s| s.saturating_neg()).collect();
            main.write_i16(&samples)?;
            self.vad.update(samples.iter().any(|s| *s != 0));
            Ok(())
        }

        fn set_parameter(&mut self, name: &str, _value: ParamValue) -> Result<(), DspError> {
            Err(DspError::UnsupportedParameter(name.to_string()))
        }

        fn set_voice_activity_listener(&mut self, listener: VoiceActivityListener) {
            self.vad.set_listener(listener);
        }

        fn name(&self) -> &'static str {
            "Inverter"
        }

        fn reset(&mut self) {
            self.vad.reset();
        }
    }

    #[test]
    fn test_frame_size_default() {
        let effect = Inverter { vad: VoiceActivity::new() };
        assert_eq!(effect.frame_size(48000), 960);
        assert_eq!(effect.frame_size(44100), 882);
        assert_eq!(frame_size_for(48000, 25), 1200);
        assert_eq!(frame_size_for(48000, 10), 480);
        assert_eq!(frame_size_for(11025, 10), 110);
    }

    #[test]
    fn test_mismatch_reported() {
        let mut effect = Inverter { vad: VoiceActivity::new() };
        let mut main = AudioBuffer::from_i16(&[1, 2, 3, 4], 48000, 1);
        let aux = AudioBuffer::silent(AudioFormat::pcm_s16le(48000, 1), 3);

        assert_eq!(
            effect.process(&mut main, &aux),
            Err(DspError::FrameMismatch { main: 4, aux: 3 })
        );
        assert_eq!(main.to_i16().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_aux_channels_may_differ() {
        let mut effect = Inverter { vad: VoiceActivity::new() };
        let mut main = AudioBuffer::from_i16(&[1, 2], 48000, 1);
        let aux = AudioBuffer::silent(AudioFormat::pcm_s16le(48000, 2), 2);
        assert!(effect.process(&mut main, &aux).is_ok());
        assert_eq!(main.to_i16().unwrap(), vec![-1, -2]);
    }

    #[test]
    fn test_voice_activity_fires_on_transition_only() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut vad = VoiceActivity::new();
        vad.set_listener(Box::new(move |active| sink.lock().unwrap().push(active)));

        vad.update(false);
        vad.update(true);
        vad.update(true);
        vad.update(false);
        vad.update(false);

        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn test_param_value_conversions() {
        assert!(ParamValue::Int(3).as_bool());
        assert!(!ParamValue::Float(0.0).as_bool());
        assert_eq!(ParamValue::Float(2.6).as_i32(), 3);
        assert_eq!(ParamValue::Int(i64::MAX).as_i32(), i32::MAX);
        assert_eq!(ParamValue::Bool(true).as_f32(), 1.0);
        assert!(ParamValue::Bool(true).number("level").is_err());
        assert!(ParamValue::Float(f64::NAN).number("level").is_err());
        assert_eq!(ParamValue::from(-12.0f32).number("level"), Ok(-12.0));
    }

    #[test]
    fn test_param_value_serde_untagged() {
        let values = vec![ParamValue::Bool(true), ParamValue::Int(-30), ParamValue::Float(0.5)];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, "[true,-30,0.5]");

        let parsed: Vec<ParamValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, values);
    }
}
