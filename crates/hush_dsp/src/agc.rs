//! Automatic Gain Control
//!
//! Steers speech towards a target RMS level with a rate-limited gain. The
//! gain only adapts on frames flagged as voice, so pauses keep the last
//! gain instead of pumping the noise floor up.

use crate::format::ChannelPlanes;
use crate::limiter::db_to_linear;

/// Default target RMS amplitude (i16 scale)
pub const DEFAULT_TARGET_LEVEL: f32 = 8000.0;

/// Default maximum gain in dB
pub const DEFAULT_MAX_GAIN_DB: f32 = 30.0;

/// Default gain increase rate in dB per second
pub const DEFAULT_MAX_INCREMENT_DB: f32 = 12.0;

/// Default gain decrease rate in dB per second (negative)
pub const DEFAULT_MAX_DECREMENT_DB: f32 = -40.0;

/// Lowest gain the controller will apply
const MIN_GAIN_DB: f32 = -30.0;

/// Frames quieter than this RMS are not used for adaptation
const MIN_ADAPT_RMS: f32 = 1.0;

#[derive(Debug, Clone)]
pub struct GainController {
    target_level: f32,
    max_gain_db: f32,
    increment_db_per_s: f32,
    decrement_db_per_s: f32,
    gain_db: f32,
    frame_ms: u32,
    enabled: bool,
}

impl GainController {
    /// Controller for frames of `frame_ms` milliseconds
    pub fn new(frame_ms: u32) -> Self {
        Self {
            target_level: DEFAULT_TARGET_LEVEL,
            max_gain_db: DEFAULT_MAX_GAIN_DB,
            increment_db_per_s: DEFAULT_MAX_INCREMENT_DB,
            decrement_db_per_s: DEFAULT_MAX_DECREMENT_DB,
            gain_db: 0.0,
            frame_ms,
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

    /// Target RMS amplitude, clamped to 1..=32767
    pub fn set_target_level(&mut self, level: f32) {
        self.target_level = level.clamp(1.0, i16::MAX as f32);
    }

    /// Target expressed in dB below full scale (0..=31)
    pub fn set_target_dbfs(&mut self, db_below_full_scale: i32) {
        let db = db_below_full_scale.clamp(0, 31) as f32;
        self.set_target_level(32768.0 * db_to_linear(-db));
    }

    pub fn target_level(&self) -> f32 {
        self.target_level
    }

    pub fn set_max_gain_db(&mut self, db: f32) {
        self.max_gain_db = db.max(0.0);
        self.gain_db = self.gain_db.min(self.max_gain_db);
    }

    pub fn max_gain_db(&self) -> f32 {
        self.max_gain_db
    }

    pub fn set_max_increment_db(&mut self, db_per_s: f32) {
        self.increment_db_per_s = db_per_s.max(0.0);
    }

    pub fn set_max_decrement_db(&mut self, db_per_s: f32) {
        self.decrement_db_per_s = db_per_s.min(0.0);
    }

    pub fn max_decrement_db(&self) -> f32 {
        self.decrement_db_per_s
    }

    /// Gain applied to the last frame, in dB
    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    /// Adapt on voiced frames and apply the gain to every plane
    ///
    /// The gain ramps linearly across the frame from the previous value to
    /// the new one.
    ///
    /// # Real-time Safety
    /// No allocations. O(n) where n = total samples.
    pub fn process(&mut self, planes: &mut ChannelPlanes, voice_active: bool) {
        if !self.enabled {
            return;
        }

        let previous = db_to_linear(self.gain_db);

        if voice_active {
            let rms = planes_rms(planes);
            if rms >= MIN_ADAPT_RMS {
                let desired = (20.0 * (self.target_level / rms).log10())
                    .clamp(MIN_GAIN_DB, self.max_gain_db);
                let seconds = self.frame_ms as f32 / 1000.0;
                let step = (desired - self.gain_db).clamp(
                    self.decrement_db_per_s * seconds,
                    self.increment_db_per_s * seconds,
                );
                self.gain_db += step;
            }
        }

        let current = db_to_linear(self.gain_db);
        for plane in planes.iter_mut() {
            let len = plane.len().max(1) as f32;
            for (i, sample) in plane.iter_mut().enumerate() {
                let t = (i + 1) as f32 / len;
                *sample *= previous + (current - previous) * t;
            }
        }
    }

    pub fn reset(&mut self) {
        self.gain_db = 0.0;
    }
}

fn planes_rms(planes: &ChannelPlanes) -> f32 {
    let mut sum = 0.0f32;
    let mut count = 0usize;
    for channel in 0..planes.channels() {
        let plane = planes.plane(channel);
        sum += plane.iter().map(|s| s * s).sum::<f32>();
        count += plane.len();
    }
    if count == 0 {
        0.0
    } else {
        (sum / count as f32).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::AudioBuffer;

    fn square(amplitude: i16, len: usize) -> ChannelPlanes {
        let samples: Vec<i16> = (0..len)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect();
        let mut planes = ChannelPlanes::new(1);
        planes.load(&AudioBuffer::from_i16(&samples, 48000, 1)).unwrap();
        planes
    }

    #[test]
    fn test_disabled_is_unity() {
        let mut agc = GainController::new(10);
        let mut planes = square(100, 480);
        agc.process(&mut planes, true);
        assert_eq!(planes.plane(0)[0], 100.0);
    }

    #[test]
    fn test_gain_rises_at_limited_rate() {
        let mut agc = GainController::new(10);
        agc.set_enabled(true);

        let mut planes = square(100, 480);
        agc.process(&mut planes, true);
        // 12 dB/s over 10 ms
        assert!((agc.gain_db() - 0.12).abs() < 1e-4);

        for _ in 0..1000 {
            let mut planes = square(100, 480);
            agc.process(&mut planes, true);
        }
        assert!((agc.gain_db() - DEFAULT_MAX_GAIN_DB).abs() < 1e-3);
    }

    #[test]
    fn test_converges_to_target() {
        let mut agc = GainController::new(25);
        agc.set_enabled(true);
        agc.set_target_level(8000.0);

        for _ in 0..400 {
            let mut planes = square(2000, 1200);
            agc.process(&mut planes, true);
        }
        let mut planes = square(2000, 1200);
        agc.process(&mut planes, true);
        let out = planes.plane(0)[1199].abs();
        assert!((out - 8000.0).abs() < 100.0, "output amplitude {}", out);
    }

    #[test]
    fn test_loud_input_attenuated() {
        let mut agc = GainController::new(10);
        agc.set_enabled(true);
        agc.set_target_level(4000.0);
        let mut planes = square(30000, 480);
        agc.process(&mut planes, true);
        assert!((agc.gain_db() + 0.4).abs() < 1e-4);
    }

    #[test]
    fn test_unvoiced_frames_hold_gain() {
        let mut agc = GainController::new(10);
        agc.set_enabled(true);
        for _ in 0..10 {
            let mut planes = square(100, 480);
            agc.process(&mut planes, true);
        }
        let held = agc.gain_db();
        let mut planes = square(100, 480);
        agc.process(&mut planes, false);
        assert_eq!(agc.gain_db(), held);
    }

    #[test]
    fn test_target_dbfs() {
        let mut agc = GainController::new(10);
        agc.set_target_dbfs(6);
        assert!((agc.target_level() - 16422.0).abs() < 5.0);
        agc.set_target_dbfs(99);
        assert!((agc.target_level() - 32768.0 * db_to_linear(-31.0)).abs() < 1.0);
    }

    #[test]
    fn test_setters_clamp() {
        let mut agc = GainController::new(10);
        agc.set_max_decrement_db(15.0);
        assert_eq!(agc.max_decrement_db(), 0.0);
        agc.set_max_gain_db(-3.0);
        assert_eq!(agc.max_gain_db(), 0.0);
        agc.set_target_level(1.0e6);
        assert_eq!(agc.target_level(), 32767.0);
    }
}
