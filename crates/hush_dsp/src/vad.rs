//! Voice Activity Detection
//!
//! Turns per-frame speech probabilities into a stable on/off decision, and
//! provides the energy-based probability estimate used by engines that have
//! no neural detector.

/// Default start threshold in percent
pub const DEFAULT_PROB_START: u8 = 35;

/// Default continue threshold in percent
pub const DEFAULT_PROB_CONTINUE: u8 = 20;

/// Level assigned to digital silence
const SILENCE_DB: f32 = -100.0;

/// How quickly the noise floor follows quieter frames (per frame)
const FLOOR_FALL: f32 = 0.5;

/// How quickly the noise floor follows louder frames (per frame)
const FLOOR_RISE: f32 = 0.01;

/// SNR in dB at which speech probability reaches one half
const SNR_MIDPOINT_DB: f32 = 9.0;

/// SNR slope of the probability curve (dB per e-fold)
const SNR_SLOPE_DB: f32 = 3.0;

/// Hysteresis over a speech probability
///
/// Inactive detectors switch on once the probability reaches the start
/// threshold; active ones stay on while it is at least the continue
/// threshold.
#[derive(Debug, Clone)]
pub struct VoiceDetector {
    prob_start: f32,
    prob_continue: f32,
    active: bool,
}

impl VoiceDetector {
    /// Thresholds in percent (0..=100)
    pub fn new(prob_start: u8, prob_continue: u8) -> Self {
        let mut detector = Self {
            prob_start: 0.0,
            prob_continue: 0.0,
            active: false,
        };
        detector.set_prob_start(prob_start as i32);
        detector.set_prob_continue(prob_continue as i32);
        detector
    }

    /// Set the start threshold, clamped to 0..=100 percent
    pub fn set_prob_start(&mut self, percent: i32) {
        self.prob_start = percent.clamp(0, 100) as f32 / 100.0;
    }

    /// Set the continue threshold, clamped to 0..=100 percent
    pub fn set_prob_continue(&mut self, percent: i32) {
        self.prob_continue = percent.clamp(0, 100) as f32 / 100.0;
    }

    pub fn prob_start(&self) -> f32 {
        self.prob_start
    }

    pub fn prob_continue(&self) -> f32 {
        self.prob_continue
    }

    /// Feed one frame's speech probability (0..=1) and return the decision
    pub fn decide(&mut self, probability: f32) -> bool {
        self.active = if self.active {
            probability >= self.prob_continue
        } else {
            probability >= self.prob_start
        };
        self.active
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn reset(&mut self) {
        self.active = false;
    }
}

impl Default for VoiceDetector {
    fn default() -> Self {
        Self::new(DEFAULT_PROB_START, DEFAULT_PROB_CONTINUE)
    }
}

/// Speech probability from frame energy over a tracked noise floor
#[derive(Debug, Clone, Default)]
pub struct EnergyEstimator {
    noise_floor_db: Option<f32>,
}

impl EnergyEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Estimate the probability that `samples` (i16-ranged) contain speech
    pub fn probability(&mut self, samples: &[f32]) -> f32 {
        let level = frame_level_db(samples);
        let floor = match self.noise_floor_db {
            None => level,
            Some(floor) if level < floor => floor + FLOOR_FALL * (level - floor),
            Some(floor) => floor + FLOOR_RISE * (level - floor),
        };
        self.noise_floor_db = Some(floor);

        if level <= SILENCE_DB {
            return 0.0;
        }
        let snr = level - floor;
        1.0 / (1.0 + (-(snr - SNR_MIDPOINT_DB) / SNR_SLOPE_DB).exp())
    }

    pub fn noise_floor_db(&self) -> Option<f32> {
        self.noise_floor_db
    }

    pub fn reset(&mut self) {
        self.noise_floor_db = None;
    }
}

/// RMS level of an i16-ranged frame in dBFS
pub fn frame_level_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return SILENCE_DB;
    }
    let mean_square = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    let rms = mean_square.sqrt() / 32768.0;
    if rms <= 0.0 {
        SILENCE_DB
    } else {
        (20.0 * rms.log10()).max(SILENCE_DB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hysteresis() {
        let mut vad = VoiceDetector::new(50, 20);
        assert!(!vad.decide(0.4));
        assert!(vad.decide(0.6));
        // Stays on between the two thresholds
        assert!(vad.decide(0.3));
        assert!(!vad.decide(0.1));
        // Needs the start threshold again
        assert!(!vad.decide(0.3));
    }

    #[test]
    fn test_thresholds_clamped() {
        let mut vad = VoiceDetector::default();
        vad.set_prob_start(250);
        vad.set_prob_continue(-5);
        assert_eq!(vad.prob_start(), 1.0);
        assert_eq!(vad.prob_continue(), 0.0);
    }

    #[test]
    fn test_frame_level() {
        assert_eq!(frame_level_db(&[0.0; 10]), SILENCE_DB);
        assert_eq!(frame_level_db(&[]), SILENCE_DB);
        let full = frame_level_db(&[32768.0, -32768.0]);
        assert!(full.abs() < 0.01);
    }

    #[test]
    fn test_loud_frame_after_quiet_floor_is_speech() {
        let mut estimator = EnergyEstimator::new();
        let quiet = vec![30.0; 480];
        for _ in 0..50 {
            assert!(estimator.probability(&quiet) < 0.1);
        }

        let loud: Vec<f32> = (0..480).map(|i| if i % 2 == 0 { 8000.0 } else { -8000.0 }).collect();
        assert!(estimator.probability(&loud) > 0.9);
    }

    #[test]
    fn test_silence_has_zero_probability() {
        let mut estimator = EnergyEstimator::new();
        assert_eq!(estimator.probability(&[0.0; 160]), 0.0);
    }

    #[test]
    fn test_steady_level_becomes_floor() {
        let mut estimator = EnergyEstimator::new();
        let tone = vec![1000.0; 480];
        for _ in 0..1000 {
            estimator.probability(&tone);
        }
        let floor = estimator.noise_floor_db().unwrap();
        assert!((floor - frame_level_db(&tone)).abs() < 0.5);
    }
}
