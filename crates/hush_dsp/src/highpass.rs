//! High-Pass Filter
//!
//! Second-order Butterworth high-pass that strips rumble and DC offset ahead
//! of echo cancellation. One filter state per channel.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F32};

use crate::error::DspError;

/// Default corner frequency in Hz
pub const HIGH_PASS_CUTOFF_HZ: f32 = 80.0;

pub struct HighPassFilter {
    // DirectForm2Transposed: better numerical stability than DF1
    filters: Vec<DirectForm2Transposed<f32>>,
    enabled: bool,
}

impl HighPassFilter {
    /// Create a filter for `channels` channels
    ///
    /// Fails when the cutoff is not below Nyquist for the sample rate.
    pub fn new(sample_rate: u32, channels: usize, cutoff_hz: f32) -> Result<Self, DspError> {
        let coeffs = Coefficients::<f32>::from_params(
            Type::HighPass,
            (sample_rate as f32).hz(),
            cutoff_hz.hz(),
            Q_BUTTERWORTH_F32,
        )
        .map_err(|_| {
            DspError::BackendInit(format!(
                "cannot build a {} Hz high-pass filter at {} Hz",
                cutoff_hz, sample_rate
            ))
        })?;

        Ok(Self {
            filters: (0..channels)
                .map(|_| DirectForm2Transposed::<f32>::new(coeffs))
                .collect(),
            enabled: false,
        })
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

    /// Filter one channel plane in place
    ///
    /// # Real-time Safety
    /// No allocations. O(n) where n = plane length.
    #[inline]
    pub fn process(&mut self, channel: usize, samples: &mut [f32]) {
        if !self.enabled {
            return;
        }
        if let Some(filter) = self.filters.get_mut(channel) {
            for sample in samples.iter_mut() {
                *sample = filter.run(*sample);
            }
        }
    }

    /// Clear delay lines
    pub fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.reset_state();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_dc_offset() {
        let mut hpf = HighPassFilter::new(48000, 1, HIGH_PASS_CUTOFF_HZ).unwrap();
        hpf.set_enabled(true);

        let mut samples = vec![5000.0; 48000];
        hpf.process(0, &mut samples);

        let tail = &samples[samples.len() - 480..];
        let mean = tail.iter().sum::<f32>() / tail.len() as f32;
        assert!(mean.abs() < 10.0, "residual DC {}", mean);
    }

    #[test]
    fn test_passes_speech_band() {
        let mut hpf = HighPassFilter::new(48000, 1, HIGH_PASS_CUTOFF_HZ).unwrap();
        hpf.set_enabled(true);

        let mut samples: Vec<f32> = (0..4800)
            .map(|i| 10000.0 * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 48000.0).sin())
            .collect();
        hpf.process(0, &mut samples);

        let peak = samples[2400..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 9000.0, "1 kHz attenuated to {}", peak);
    }

    #[test]
    fn test_disabled_by_default() {
        let mut hpf = HighPassFilter::new(16000, 2, HIGH_PASS_CUTOFF_HZ).unwrap();
        assert!(!hpf.is_enabled());
        let mut samples = vec![1.0, 2.0, 3.0];
        hpf.process(1, &mut samples);
        assert_eq!(samples, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_cutoff_above_nyquist_rejected() {
        assert!(HighPassFilter::new(100, 1, HIGH_PASS_CUTOFF_HZ).is_err());
    }
}
