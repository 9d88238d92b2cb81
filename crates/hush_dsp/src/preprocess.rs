//! Preprocess Engine
//!
//! 25 ms voice preprocessor: echo cancellation against the aux reference,
//! spectral noise suppression, energy-based voice detection and automatic
//! gain control, in that order.
//!
//! Noise suppression, echo cancellation and gain control start disabled;
//! voice detection always runs.

use tracing::debug;

use crate::agc::GainController;
use crate::denoise::SpectralDenoiser;
use crate::echo::{EchoCanceller, DEFAULT_TAIL_MS};
use crate::effect::{check_frame_pair, AudioEffect, ParamValue, VoiceActivity, VoiceActivityListener};
use crate::error::DspError;
use crate::format::{AudioBuffer, AudioFormat, ChannelPlanes};
use crate::vad::{EnergyEstimator, VoiceDetector};

/// Processing interval of the preprocess engine
pub const PREPROCESS_INTERVAL_MS: u32 = 25;

/// Default residual echo suppression in dB
pub const DEFAULT_ECHO_MAX_ATTENUATION_DB: f32 = -40.0;

pub const PARAM_NOISE_REDUCTION_ENABLED: &str = "noise_reduction_enabled";
pub const PARAM_NOISE_REDUCTION_MAX_ATTENUATION: &str = "noise_reduction_max_attenuation";
pub const PARAM_ECHO_CANCELLATION_ENABLED: &str = "echo_cancellation_enabled";
pub const PARAM_ECHO_CANCELLATION_MAX_ATTENUATION: &str = "echo_cancellation_max_attenuation";
pub const PARAM_GAIN_CONTROL_ENABLED: &str = "gain_control_enabled";
pub const PARAM_GAIN_CONTROL_LEVEL: &str = "gain_control_level";
pub const PARAM_GAIN_CONTROL_MAX_GAIN: &str = "gain_control_max_gain";
pub const PARAM_GAIN_CONTROL_MAX_INCREMENT: &str = "gain_control_max_increment";
pub const PARAM_GAIN_CONTROL_MAX_DECREMENT: &str = "gain_control_max_decrement";
pub const PARAM_VOICE_PROBABILITY_START: &str = "voice_detection_probability_start";
pub const PARAM_VOICE_PROBABILITY_CONTINUE: &str = "voice_detection_probability_continue";

/// Every parameter name the preprocess engine accepts
pub const PREPROCESS_PARAMETERS: &[&str] = &[
    PARAM_NOISE_REDUCTION_ENABLED,
    PARAM_NOISE_REDUCTION_MAX_ATTENUATION,
    PARAM_ECHO_CANCELLATION_ENABLED,
    PARAM_ECHO_CANCELLATION_MAX_ATTENUATION,
    PARAM_GAIN_CONTROL_ENABLED,
    PARAM_GAIN_CONTROL_LEVEL,
    PARAM_GAIN_CONTROL_MAX_GAIN,
    PARAM_GAIN_CONTROL_MAX_INCREMENT,
    PARAM_GAIN_CONTROL_MAX_DECREMENT,
    PARAM_VOICE_PROBABILITY_START,
    PARAM_VOICE_PROBABILITY_CONTINUE,
];

pub struct PreprocessEngine {
    planes: ChannelPlanes,
    aux_planes: ChannelPlanes,
    reference: Vec<f32>,
    mono: Vec<f32>,
    echo: EchoCanceller,
    denoiser: SpectralDenoiser,
    agc: GainController,
    estimator: EnergyEstimator,
    detector: VoiceDetector,
    voice: VoiceActivity,
}

impl PreprocessEngine {
    /// Build an engine for 16-bit main and aux streams at the same rate
    pub fn new(main: &AudioFormat, aux: &AudioFormat) -> Result<Self, DspError> {
        check_formats(main, aux)?;

        let channels = main.channels as usize;
        let mut echo = EchoCanceller::new(main.sample_rate, channels, DEFAULT_TAIL_MS);
        echo.set_max_attenuation_db(DEFAULT_ECHO_MAX_ATTENUATION_DB);

        Ok(Self {
            planes: ChannelPlanes::new(channels),
            aux_planes: ChannelPlanes::new(aux.channels as usize),
            reference: Vec::new(),
            mono: Vec::new(),
            echo,
            denoiser: SpectralDenoiser::new(main.sample_rate, channels),
            agc: GainController::new(PREPROCESS_INTERVAL_MS),
            estimator: EnergyEstimator::new(),
            detector: VoiceDetector::default(),
            voice: VoiceActivity::new(),
        })
    }

    pub fn is_noise_reduction_enabled(&self) -> bool {
        self.denoiser.is_enabled()
    }

    pub fn is_echo_cancellation_enabled(&self) -> bool {
        self.echo.is_enabled()
    }

    pub fn is_gain_control_enabled(&self) -> bool {
        self.agc.is_enabled()
    }

    pub fn gain_control(&self) -> &GainController {
        &self.agc
    }

    pub fn voice_detector(&self) -> &VoiceDetector {
        &self.detector
    }
}

/// Shared format checks for the 16-bit engines
pub(crate) fn check_formats(main: &AudioFormat, aux: &AudioFormat) -> Result<(), DspError> {
    for (role, format) in [("main", main), ("aux", aux)] {
        if !format.is_s16le() || format.channels == 0 {
            return Err(DspError::UnsupportedFormat(format!(
                "{} stream must be 16-bit signed little-endian with at least one channel",
                role
            )));
        }
        if format.sample_rate == 0 {
            return Err(DspError::InvalidSampleRate(format.sample_rate));
        }
    }
    if main.sample_rate != aux.sample_rate {
        return Err(DspError::BackendInit(format!(
            "main rate {} Hz differs from aux rate {} Hz",
            main.sample_rate, aux.sample_rate
        )));
    }
    Ok(())
}

impl AudioEffect for PreprocessEngine {
    fn required_interval_ms(&self) -> u32 {
        PREPROCESS_INTERVAL_MS
    }

    fn process(&mut self, main: &mut AudioBuffer, aux: &AudioBuffer) -> Result<(), DspError> {
        check_frame_pair(main, aux)?;
        self.planes.load(main)?;

        if self.echo.is_enabled() {
            self.aux_planes.load(aux)?;
            self.aux_planes.downmix_into(&mut self.reference);
            self.echo.process(&mut self.planes, &self.reference);
        }

        for channel in 0..self.planes.channels() {
            self.denoiser.process(channel, self.planes.plane_mut(channel));
        }

        self.planes.downmix_into(&mut self.mono);
        let probability = self.estimator.probability(&self.mono);
        let active = self.detector.decide(probability);

        self.agc.process(&mut self.planes, active);
        self.planes.store(main)?;

        self.voice.update(active);
        Ok(())
    }

    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), DspError> {
        match name {
            PARAM_NOISE_REDUCTION_ENABLED => self.denoiser.set_enabled(value.as_bool()),
            PARAM_NOISE_REDUCTION_MAX_ATTENUATION => {
                self.denoiser.set_max_attenuation_db(value.number(name)?)
            }
            PARAM_ECHO_CANCELLATION_ENABLED => self.echo.set_enabled(value.as_bool()),
            PARAM_ECHO_CANCELLATION_MAX_ATTENUATION => {
                self.echo.set_max_attenuation_db(value.number(name)?)
            }
            PARAM_GAIN_CONTROL_ENABLED => self.agc.set_enabled(value.as_bool()),
            PARAM_GAIN_CONTROL_LEVEL => self.agc.set_target_level(value.number(name)?),
            PARAM_GAIN_CONTROL_MAX_GAIN => self.agc.set_max_gain_db(value.number(name)?),
            PARAM_GAIN_CONTROL_MAX_INCREMENT => self.agc.set_max_increment_db(value.number(name)?),
            PARAM_GAIN_CONTROL_MAX_DECREMENT => self.agc.set_max_decrement_db(value.number(name)?),
            PARAM_VOICE_PROBABILITY_START => {
                value.number(name)?;
                self.detector.set_prob_start(value.as_i32())
            }
            PARAM_VOICE_PROBABILITY_CONTINUE => {
                value.number(name)?;
                self.detector.set_prob_continue(value.as_i32())
            }
            _ => return Err(DspError::UnsupportedParameter(name.to_string())),
        }
        debug!("preprocess: {} = {:?}", name, value);
        Ok(())
    }

    fn set_voice_activity_listener(&mut self, listener: VoiceActivityListener) {
        self.voice.set_listener(listener);
    }

    fn name(&self) -> &'static str {
        "preprocess"
    }

    fn is_voice_active(&self) -> bool {
        self.voice.is_active()
    }

    fn reset(&mut self) {
        self.echo.reset();
        self.denoiser.reset();
        self.agc.reset();
        self.estimator.reset();
        self.detector.reset();
        self.voice.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn engine() -> PreprocessEngine {
        PreprocessEngine::new(&AudioFormat::pcm_s16le(48000, 1), &AudioFormat::pcm_s16le(48000, 2))
            .unwrap()
    }

    fn frame(amplitude: i16, len: usize) -> AudioBuffer {
        let samples: Vec<i16> = (0..len)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect();
        AudioBuffer::from_i16(&samples, 48000, 1)
    }

    #[test]
    fn test_interval_and_frame_size() {
        let engine = engine();
        assert_eq!(engine.required_interval_ms(), 25);
        assert_eq!(engine.frame_size(48000), 1200);
        assert_eq!(engine.frame_size(16000), 400);
    }

    #[test]
    fn test_defaults() {
        let engine = engine();
        assert!(!engine.is_noise_reduction_enabled());
        assert!(!engine.is_echo_cancellation_enabled());
        assert!(!engine.is_gain_control_enabled());
        assert!(!engine.is_voice_active());
    }

    #[test]
    fn test_rejects_non_s16_formats() {
        let result = PreprocessEngine::new(
            &AudioFormat::pcm_f32le(48000, 1),
            &AudioFormat::pcm_s16le(48000, 1),
        );
        assert!(matches!(result, Err(DspError::UnsupportedFormat(_))));

        let result = PreprocessEngine::new(
            &AudioFormat::pcm_s16le(48000, 1),
            &AudioFormat::pcm_s16le(44100, 1),
        );
        assert!(matches!(result, Err(DspError::BackendInit(_))));
    }

    #[test]
    fn test_defaults_pass_audio_through() {
        let mut engine = engine();
        let mut main = frame(1234, 1200);
        let aux = AudioBuffer::silent(AudioFormat::pcm_s16le(48000, 2), 1200);
        engine.process(&mut main, &aux).unwrap();
        assert_eq!(main, frame(1234, 1200));
    }

    #[test]
    fn test_frame_mismatch() {
        let mut engine = engine();
        let mut main = frame(100, 1200);
        let aux = AudioBuffer::silent(AudioFormat::pcm_s16le(48000, 2), 1199);
        assert_eq!(
            engine.process(&mut main, &aux),
            Err(DspError::FrameMismatch { main: 1200, aux: 1199 })
        );
    }

    #[test]
    fn test_unknown_parameter() {
        let mut engine = engine();
        assert_eq!(
            engine.set_parameter("reverb", ParamValue::Bool(true)),
            Err(DspError::UnsupportedParameter("reverb".into()))
        );
    }

    #[test]
    fn test_every_listed_parameter_accepted() {
        let mut engine = engine();
        for name in PREPROCESS_PARAMETERS {
            assert!(engine.set_parameter(name, ParamValue::Int(0)).is_ok(), "{}", name);
        }
    }

    #[test]
    fn test_numeric_parameter_rejects_bool() {
        let mut engine = engine();
        assert!(matches!(
            engine.set_parameter(PARAM_GAIN_CONTROL_LEVEL, ParamValue::Bool(true)),
            Err(DspError::InvalidParameterValue { .. })
        ));
    }

    #[test]
    fn test_parameters_clamped() {
        let mut engine = engine();
        engine.set_parameter(PARAM_GAIN_CONTROL_LEVEL, ParamValue::Int(100_000)).unwrap();
        engine.set_parameter(PARAM_GAIN_CONTROL_MAX_DECREMENT, ParamValue::Float(20.0)).unwrap();
        engine.set_parameter(PARAM_VOICE_PROBABILITY_START, ParamValue::Int(140)).unwrap();

        assert_eq!(engine.gain_control().target_level(), 32767.0);
        assert_eq!(engine.gain_control().max_decrement_db(), 0.0);
        assert_eq!(engine.voice_detector().prob_start(), 1.0);
    }

    #[test]
    fn test_voice_activity_notifications() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut engine = engine();
        engine.set_voice_activity_listener(Box::new(move |active| sink.lock().unwrap().push(active)));

        let aux = AudioBuffer::silent(AudioFormat::pcm_s16le(48000, 2), 1200);
        for _ in 0..20 {
            engine.process(&mut frame(20, 1200), &aux).unwrap();
        }
        engine.process(&mut frame(12000, 1200), &aux).unwrap();
        assert!(engine.is_voice_active());
        for _ in 0..5 {
            engine.process(&mut frame(0, 1200), &aux).unwrap();
        }

        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn test_gain_control_raises_quiet_speech() {
        let mut engine = engine();
        engine.set_parameter(PARAM_GAIN_CONTROL_ENABLED, true.into()).unwrap();
        engine.set_parameter(PARAM_VOICE_PROBABILITY_START, 0.into()).unwrap();
        engine.set_parameter(PARAM_VOICE_PROBABILITY_CONTINUE, 0.into()).unwrap();

        let aux = AudioBuffer::silent(AudioFormat::pcm_s16le(48000, 2), 1200);
        let mut last = frame(1000, 1200);
        for _ in 0..200 {
            last = frame(1000, 1200);
            engine.process(&mut last, &aux).unwrap();
        }
        let peak = last.to_i16().unwrap().iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak > 7000, "peak {}", peak);
    }
}
