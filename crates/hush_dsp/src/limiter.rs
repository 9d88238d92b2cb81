//! Output Limiter
//!
//! Keeps gain-controlled speech from hitting hard digital clipping by
//! saturating peaks smoothly above a threshold.
//!
//! # Algorithm
//!
//! - Below threshold: linear (unity gain)
//! - Above threshold: the excess is squashed through tanh into the
//!   remaining headroom, so output approaches but never exceeds full scale

/// Full scale of the i16-ranged samples the engines work on
const FULL_SCALE: f32 = 32768.0;

/// Soft limiter for i16-ranged sample planes
#[derive(Debug, Clone)]
pub struct Limiter {
    /// Threshold where saturation begins (linear, 0.0 to 1.0)
    threshold: f32,
    enabled: bool,
}

impl Limiter {
    /// Create a limiter that starts saturating `threshold_db` below full scale
    pub fn new(threshold_db: f32) -> Self {
        Self {
            threshold: db_to_linear(threshold_db.min(0.0)),
            enabled: true,
        }
    }

    pub fn set_threshold_db(&mut self, db: f32) {
        self.threshold = db_to_linear(db.min(0.0));
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Limit a plane of i16-ranged samples in place
    ///
    /// # Real-time Safety
    /// No allocations, O(n) time.
    #[inline]
    pub fn process(&self, samples: &mut [f32]) {
        if !self.enabled {
            return;
        }
        for sample in samples.iter_mut() {
            *sample = soft_clip(*sample / FULL_SCALE, self.threshold) * FULL_SCALE;
        }
    }
}

impl Default for Limiter {
    fn default() -> Self {
        Self::new(-1.0)
    }
}

#[inline]
pub(crate) fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

#[inline]
fn soft_clip(sample: f32, threshold: f32) -> f32 {
    let magnitude = sample.abs();
    if magnitude <= threshold {
        return sample;
    }

    let headroom = 1.0 - threshold;
    let excess = (magnitude - threshold) / headroom.max(0.001);
    sample.signum() * (threshold + headroom * excess.tanh())
}
