//! Level Meter
//!
//! Maps a block of interleaved PCM to one peak level per channel, in dBFS.
//! Used for input/output meters, so it must be cheap and never fail: formats
//! it cannot read yield an empty result instead of an error.

use crate::format::{AudioFormat, ByteOrder, SampleType};

/// Level reported for silence (and anything quieter)
pub const LEVEL_FLOOR_DB: f32 = -100.0;

/// Full-scale peak for a float32 sample, slightly above 1.0 for the overshoot
/// that float sources routinely produce
const FLOAT_PEAK: f64 = 1.00003;

/// Full-scale peak value for the given format, or 0 if it is unsupported
pub fn peak_value(format: &AudioFormat) -> f64 {
    match (format.sample_type, format.sample_size) {
        (SampleType::Float, 32) => FLOAT_PEAK,
        (SampleType::SignedInt, 8) => i8::MAX as f64,
        (SampleType::SignedInt, 16) => i16::MAX as f64,
        (SampleType::SignedInt, 32) => i32::MAX as f64,
        (SampleType::UnsignedInt, 8) => u8::MAX as f64,
        (SampleType::UnsignedInt, 16) => u16::MAX as f64,
        (SampleType::UnsignedInt, 32) => u32::MAX as f64,
        _ => 0.0,
    }
}

/// Convert a normalized amplitude (0..=1) to dBFS, floored at [`LEVEL_FLOOR_DB`]
#[inline]
pub fn amplitude_to_db(amplitude: f32) -> f32 {
    if amplitude <= 0.0 {
        return LEVEL_FLOOR_DB;
    }
    (20.0 * amplitude.log10()).max(LEVEL_FLOOR_DB)
}

/// Per-channel peak levels in dBFS
///
/// Returns an empty vector when the format is big-endian, has no channels,
/// or has an unknown or unsupported sample encoding.
///
/// # Real-time Safety
/// Allocates only the result vector (one entry per channel).
pub fn audio_levels(data: &[u8], format: &AudioFormat) -> Vec<f32> {
    if format.byte_order != ByteOrder::LittleEndian || format.channels == 0 {
        return Vec::new();
    }
    let peak = peak_value(format);
    if peak == 0.0 {
        return Vec::new();
    }

    let channels = format.channels as usize;
    let width = format.bytes_per_sample();
    let mut maxima = vec![0.0_f64; channels];

    for frame in data.chunks_exact(width * channels) {
        for (ch, bytes) in frame.chunks_exact(width).enumerate() {
            let magnitude = sample_magnitude(bytes, format.sample_type, peak);
            if magnitude > maxima[ch] {
                maxima[ch] = magnitude;
            }
        }
    }

    let scale = match format.sample_type {
        SampleType::UnsignedInt => peak / 2.0,
        _ => peak,
    };

    maxima
        .into_iter()
        .map(|max| amplitude_to_db((max / scale).clamp(0.0, 1.0) as f32))
        .collect()
}

/// Distance of one sample from the format's zero point
#[inline]
fn sample_magnitude(bytes: &[u8], sample_type: SampleType, peak: f64) -> f64 {
    match sample_type {
        SampleType::Float => {
            f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).abs() as f64
        }
        SampleType::SignedInt => match bytes.len() {
            1 => (bytes[0] as i8 as f64).abs(),
            2 => (i16::from_le_bytes([bytes[0], bytes[1]]) as f64).abs(),
            _ => (i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64).abs(),
        },
        SampleType::UnsignedInt => {
            let value = match bytes.len() {
                1 => bytes[0] as f64,
                2 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
                _ => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            };
            (value - peak / 2.0).abs()
        }
        SampleType::Unknown => 0.0,
    }
}
