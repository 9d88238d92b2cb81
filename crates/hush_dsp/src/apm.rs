//! APM Engine
//!
//! 10 ms audio processing module built around RNNoise (`nnnoiseless`):
//!
//! 1. Optional 80 Hz high-pass filter
//! 2. Echo cancellation against the aux reference
//! 3. RNNoise denoising, blended back with the input by suppression level
//! 4. Voice detection from the RNNoise speech probability
//! 5. Gain control towards a dBFS target, followed by a soft limiter
//!
//! RNNoise only runs at 48 kHz on 480-sample frames, which is exactly one
//! 10 ms interval, so the engine refuses other sample rates.

use nnnoiseless::DenoiseState;
use tracing::debug;

use crate::agc::GainController;
use crate::echo::{EchoCanceller, DEFAULT_TAIL_MS};
use crate::effect::{check_frame_pair, AudioEffect, ParamValue, VoiceActivity, VoiceActivityListener};
use crate::error::DspError;
use crate::format::{AudioBuffer, AudioFormat, ChannelPlanes};
use crate::highpass::{HighPassFilter, HIGH_PASS_CUTOFF_HZ};
use crate::limiter::{db_to_linear, Limiter};
use crate::preprocess::check_formats;
use crate::vad::VoiceDetector;

/// Processing interval of the APM engine
pub const APM_INTERVAL_MS: u32 = 10;

/// The only sample rate RNNoise supports
pub const APM_SAMPLE_RATE: u32 = 48000;

/// Residual noise floor per suppression level (low, moderate, high, very high)
const NOISE_SUPPRESSION_DB: [f32; 4] = [-6.0, -12.0, -18.0, -21.0];

/// Residual echo floor per suppression level (low, moderate, high)
const ECHO_SUPPRESSION_DB: [f32; 3] = [-10.0, -20.0, -30.0];

const DEFAULT_NOISE_LEVEL: i32 = 1;
const DEFAULT_ECHO_LEVEL: i32 = 1;
const DEFAULT_TARGET_DBFS: i32 = 3;
const DEFAULT_COMPRESSION_GAIN_DB: i32 = 9;

/// Speech probability thresholds (percent) for the RNNoise detector
const VAD_START_PERCENT: u8 = 50;
const VAD_CONTINUE_PERCENT: u8 = 30;

pub const PARAM_NOISE_REDUCTION_ENABLED: &str = "noise_reduction_enabled";
pub const PARAM_NOISE_SUPPRESSION_LEVEL: &str = "noise_reduction_suppression_level";
pub const PARAM_ECHO_CANCELLATION_ENABLED: &str = "echo_cancellation_enabled";
pub const PARAM_ECHO_SUPPRESSION_LEVEL: &str = "echo_cancellation_suppression_level";
pub const PARAM_GAIN_CONTROL_ENABLED: &str = "gain_control_enabled";
pub const PARAM_GAIN_CONTROL_TARGET_LEVEL: &str = "gain_control_target_level";
pub const PARAM_GAIN_CONTROL_MAX_GAIN: &str = "gain_control_max_gain";
pub const PARAM_HIGH_PASS_FILTER_ENABLED: &str = "high_pass_filter_enabled";
pub const PARAM_GAIN_CONTROL_LIMITER_ENABLED: &str = "gain_control_limiter_enabled";

/// Every parameter name the APM engine accepts
pub const APM_PARAMETERS: &[&str] = &[
    PARAM_NOISE_REDUCTION_ENABLED,
    PARAM_NOISE_SUPPRESSION_LEVEL,
    PARAM_ECHO_CANCELLATION_ENABLED,
    PARAM_ECHO_SUPPRESSION_LEVEL,
    PARAM_GAIN_CONTROL_ENABLED,
    PARAM_GAIN_CONTROL_TARGET_LEVEL,
    PARAM_GAIN_CONTROL_MAX_GAIN,
    PARAM_HIGH_PASS_FILTER_ENABLED,
    PARAM_GAIN_CONTROL_LIMITER_ENABLED,
];

pub struct ApmEngine {
    planes: ChannelPlanes,
    aux_planes: ChannelPlanes,
    reference: Vec<f32>,
    high_pass: HighPassFilter,
    echo: EchoCanceller,
    denoisers: Vec<Box<DenoiseState<'static>>>,
    rnn_in: Vec<f32>,
    rnn_out: Vec<f32>,
    noise_reduction: bool,
    noise_level: i32,
    echo_level: i32,
    agc: GainController,
    target_dbfs: i32,
    limiter: Limiter,
    detector: VoiceDetector,
    voice: VoiceActivity,
}

impl ApmEngine {
    /// Build an engine for 48 kHz 16-bit main and aux streams
    pub fn new(main: &AudioFormat, aux: &AudioFormat) -> Result<Self, DspError> {
        check_formats(main, aux)?;
        if main.sample_rate != APM_SAMPLE_RATE {
            return Err(DspError::BackendInit(format!(
                "apm requires {} Hz, got {} Hz",
                APM_SAMPLE_RATE, main.sample_rate
            )));
        }

        let channels = main.channels as usize;
        let mut echo = EchoCanceller::new(main.sample_rate, channels, DEFAULT_TAIL_MS);
        echo.set_max_attenuation_db(ECHO_SUPPRESSION_DB[DEFAULT_ECHO_LEVEL as usize]);

        let mut agc = GainController::new(APM_INTERVAL_MS);
        agc.set_target_dbfs(DEFAULT_TARGET_DBFS);
        agc.set_max_gain_db(DEFAULT_COMPRESSION_GAIN_DB as f32);

        Ok(Self {
            planes: ChannelPlanes::new(channels),
            aux_planes: ChannelPlanes::new(aux.channels as usize),
            reference: Vec::new(),
            high_pass: HighPassFilter::new(main.sample_rate, channels, HIGH_PASS_CUTOFF_HZ)?,
            echo,
            denoisers: (0..channels).map(|_| DenoiseState::new()).collect(),
            rnn_in: vec![0.0; DenoiseState::FRAME_SIZE],
            rnn_out: vec![0.0; DenoiseState::FRAME_SIZE],
            noise_reduction: false,
            noise_level: DEFAULT_NOISE_LEVEL,
            echo_level: DEFAULT_ECHO_LEVEL,
            agc,
            target_dbfs: DEFAULT_TARGET_DBFS,
            limiter: Limiter::default(),
            detector: VoiceDetector::new(VAD_START_PERCENT, VAD_CONTINUE_PERCENT),
            voice: VoiceActivity::new(),
        })
    }

    pub fn noise_suppression_level(&self) -> i32 {
        self.noise_level
    }

    pub fn echo_suppression_level(&self) -> i32 {
        self.echo_level
    }

    pub fn gain_control_target_level(&self) -> i32 {
        self.target_dbfs
    }

    pub fn gain_control(&self) -> &GainController {
        &self.agc
    }

    pub fn is_high_pass_enabled(&self) -> bool {
        self.high_pass.is_enabled()
    }

    /// Run RNNoise over one plane, returning its speech probability
    ///
    /// The plane is only overwritten when noise reduction is enabled.
    fn denoise_plane(&mut self, channel: usize) -> f32 {
        let frame_size = DenoiseState::FRAME_SIZE;
        let keep = db_to_linear(NOISE_SUPPRESSION_DB[self.noise_level as usize]);
        let mut probability = 0.0f32;

        let plane = self.planes.plane_mut(channel);
        for chunk in plane.chunks_mut(frame_size) {
            self.rnn_in[..chunk.len()].copy_from_slice(chunk);
            self.rnn_in[chunk.len()..].iter_mut().for_each(|s| *s = 0.0);

            let vad = self.denoisers[channel].process_frame(&mut self.rnn_out, &self.rnn_in);
            probability = probability.max(vad);

            if self.noise_reduction {
                for (sample, denoised) in chunk.iter_mut().zip(&self.rnn_out) {
                    *sample = denoised + keep * (*sample - denoised);
                }
            }
        }
        probability
    }
}

fn level_param(name: &str, value: ParamValue, max: i32) -> Result<i32, DspError> {
    value.number(name)?;
    Ok(value.as_i32().clamp(0, max))
}

impl AudioEffect for ApmEngine {
    fn required_interval_ms(&self) -> u32 {
        APM_INTERVAL_MS
    }

    fn process(&mut self, main: &mut AudioBuffer, aux: &AudioBuffer) -> Result<(), DspError> {
        check_frame_pair(main, aux)?;
        self.planes.load(main)?;

        for channel in 0..self.planes.channels() {
            self.high_pass.process(channel, self.planes.plane_mut(channel));
        }

        if self.echo.is_enabled() {
            self.aux_planes.load(aux)?;
            self.aux_planes.downmix_into(&mut self.reference);
            self.echo.process(&mut self.planes, &self.reference);
        }

        let mut probability = 0.0f32;
        for channel in 0..self.planes.channels() {
            probability = probability.max(self.denoise_plane(channel));
        }
        let active = self.detector.decide(probability);

        if self.agc.is_enabled() {
            self.agc.process(&mut self.planes, active);
            for channel in 0..self.planes.channels() {
                self.limiter.process(self.planes.plane_mut(channel));
            }
        }

        self.planes.store(main)?;
        self.voice.update(active);
        Ok(())
    }

    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), DspError> {
        match name {
            PARAM_NOISE_REDUCTION_ENABLED => self.noise_reduction = value.as_bool(),
            PARAM_NOISE_SUPPRESSION_LEVEL => {
                self.noise_level = level_param(name, value, NOISE_SUPPRESSION_DB.len() as i32 - 1)?;
            }
            PARAM_ECHO_CANCELLATION_ENABLED => self.echo.set_enabled(value.as_bool()),
            PARAM_ECHO_SUPPRESSION_LEVEL => {
                self.echo_level = level_param(name, value, ECHO_SUPPRESSION_DB.len() as i32 - 1)?;
                self.echo
                    .set_max_attenuation_db(ECHO_SUPPRESSION_DB[self.echo_level as usize]);
            }
            PARAM_GAIN_CONTROL_ENABLED => self.agc.set_enabled(value.as_bool()),
            PARAM_GAIN_CONTROL_TARGET_LEVEL => {
                self.target_dbfs = level_param(name, value, 31)?;
                self.agc.set_target_dbfs(self.target_dbfs);
            }
            PARAM_GAIN_CONTROL_MAX_GAIN => {
                self.agc.set_max_gain_db(level_param(name, value, 90)? as f32);
            }
            PARAM_HIGH_PASS_FILTER_ENABLED => self.high_pass.set_enabled(value.as_bool()),
            PARAM_GAIN_CONTROL_LIMITER_ENABLED => self.limiter.set_enabled(value.as_bool()),
            _ => return Err(DspError::UnsupportedParameter(name.to_string())),
        }
        debug!("apm: {} = {:?}", name, value);
        Ok(())
    }

    fn set_voice_activity_listener(&mut self, listener: VoiceActivityListener) {
        self.voice.set_listener(listener);
    }

    fn name(&self) -> &'static str {
        "apm"
    }

    fn is_voice_active(&self) -> bool {
        self.voice.is_active()
    }

    fn reset(&mut self) {
        self.high_pass.reset();
        self.echo.reset();
        for state in &mut self.denoisers {
            *state = DenoiseState::new();
        }
        self.agc.reset();
        self.detector.reset();
        self.voice.reset();
    }
}
