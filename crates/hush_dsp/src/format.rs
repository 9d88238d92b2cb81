//! Audio Formats and Buffers
//!
//! Describes raw PCM byte streams and wraps them in frame-sized buffers.
//! Frame duration is the unit of negotiation between the pipeline and the
//! engines; byte counts are always derived from a duration and a format.

use serde::{Deserialize, Serialize};

use crate::error::DspError;
use crate::level;

/// How a single sample is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleType {
    SignedInt,
    UnsignedInt,
    Float,
    Unknown,
}

/// Byte order of multi-byte samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

/// Description of an interleaved PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g., 16000, 48000)
    pub sample_rate: u32,

    /// Number of interleaved channels
    pub channels: u16,

    /// Sample width in bits (8, 16 or 32)
    pub sample_size: u16,

    pub sample_type: SampleType,

    pub byte_order: ByteOrder,
}

impl AudioFormat {
    /// 16-bit signed little-endian PCM
    pub const fn pcm_s16le(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            sample_size: 16,
            sample_type: SampleType::SignedInt,
            byte_order: ByteOrder::LittleEndian,
        }
    }

    /// 32-bit float little-endian PCM
    pub const fn pcm_f32le(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            sample_size: 32,
            sample_type: SampleType::Float,
            byte_order: ByteOrder::LittleEndian,
        }
    }

    /// 8-bit unsigned PCM
    pub const fn pcm_u8(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            sample_size: 8,
            sample_type: SampleType::UnsignedInt,
            byte_order: ByteOrder::LittleEndian,
        }
    }

    /// Bytes occupied by one sample of one channel
    pub fn bytes_per_sample(&self) -> usize {
        self.sample_size as usize / 8
    }

    /// Bytes occupied by one sample of every channel
    pub fn block_align(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// Per-channel sample count spanning `duration_ms` (integer truncation)
    pub fn frames_for_duration(&self, duration_ms: u32) -> usize {
        (self.sample_rate as u64 * duration_ms as u64 / 1000) as usize
    }

    /// Byte count of a block spanning `duration_ms`
    pub fn bytes_for_duration(&self, duration_ms: u32) -> usize {
        self.frames_for_duration(duration_ms) * self.block_align()
    }

    /// Duration in milliseconds of `bytes` worth of audio
    pub fn duration_ms(&self, bytes: usize) -> u32 {
        let block = self.block_align();
        if block == 0 || self.sample_rate == 0 {
            return 0;
        }
        ((bytes / block) as u64 * 1000 / self.sample_rate as u64) as u32
    }

    /// Whether this is 16-bit signed little-endian PCM
    pub fn is_s16le(&self) -> bool {
        self.sample_size == 16
            && self.sample_type == SampleType::SignedInt
            && self.byte_order == ByteOrder::LittleEndian
    }

    /// Whether this is a little-endian linear PCM layout the crate understands
    pub fn is_supported(&self) -> bool {
        if self.byte_order != ByteOrder::LittleEndian || self.channels == 0 {
            return false;
        }
        match self.sample_type {
            SampleType::SignedInt | SampleType::UnsignedInt => {
                matches!(self.sample_size, 8 | 16 | 32)
            }
            SampleType::Float => self.sample_size == 32,
            SampleType::Unknown => false,
        }
    }

    /// Validate the format for use in a pipeline
    pub fn validate(&self) -> Result<(), DspError> {
        if self.sample_rate == 0 {
            return Err(DspError::InvalidSampleRate(self.sample_rate));
        }
        if !self.is_supported() {
            return Err(DspError::UnsupportedFormat(format!(
                "{}-bit {:?} {:?} with {} channel(s)",
                self.sample_size, self.sample_type, self.byte_order, self.channels
            )));
        }
        Ok(())
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm_s16le(48000, 1)
    }
}

/// A block of interleaved PCM bytes tagged with its format
///
/// `frame_count()` is the per-channel sample count, the quantity engines
/// compare when pairing a main frame with its echo reference.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    data: Vec<u8>,
    format: AudioFormat,
}

impl AudioBuffer {
    pub fn new(data: Vec<u8>, format: AudioFormat) -> Self {
        Self { data, format }
    }

    /// Zero-filled buffer of `frames` samples per channel
    pub fn silent(format: AudioFormat, frames: usize) -> Self {
        Self {
            data: vec![0; frames * format.block_align()],
            format,
        }
    }

    /// Build a 16-bit signed little-endian buffer from samples
    pub fn from_i16(samples: &[i16], sample_rate: u32, channels: u16) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Self::new(data, AudioFormat::pcm_s16le(sample_rate, channels))
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn byte_count(&self) -> usize {
        self.data.len()
    }

    /// Per-channel sample count
    pub fn frame_count(&self) -> usize {
        match self.format.block_align() {
            0 => 0,
            block => self.data.len() / block,
        }
    }

    pub fn duration_ms(&self) -> u32 {
        self.format.duration_ms(self.data.len())
    }

    /// Per-channel peak levels in dBFS (empty for unsupported formats)
    pub fn levels(&self) -> Vec<f32> {
        level::audio_levels(&self.data, &self.format)
    }

    /// Decode as 16-bit signed little-endian samples
    pub fn to_i16(&self) -> Result<Vec<i16>, DspError> {
        self.ensure_s16le()?;
        Ok(self
            .data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect())
    }

    /// Overwrite the buffer contents with 16-bit samples
    pub fn write_i16(&mut self, samples: &[i16]) -> Result<(), DspError> {
        self.ensure_s16le()?;
        if samples.len() * 2 != self.data.len() {
            return Err(DspError::BufferSizeMismatch {
                expected: self.data.len(),
                got: samples.len() * 2,
            });
        }
        for (dst, sample) in self.data.chunks_exact_mut(2).zip(samples) {
            dst.copy_from_slice(&sample.to_le_bytes());
        }
        Ok(())
    }

    fn ensure_s16le(&self) -> Result<(), DspError> {
        if !self.format.is_s16le() {
            return Err(DspError::UnsupportedFormat(format!(
                "expected 16-bit signed little-endian, got {}-bit {:?}",
                self.format.sample_size, self.format.sample_type
            )));
        }
        if self.data.len() % self.format.block_align().max(1) != 0 {
            return Err(DspError::BufferSizeMismatch {
                expected: self.format.block_align(),
                got: self.data.len(),
            });
        }
        Ok(())
    }
}

/// Reusable de-interleaved scratch space for 16-bit frames
///
/// Samples are held as f32 in the i16 range so engines can work in place
/// without per-frame allocation once the planes have grown to frame size.
#[derive(Debug, Default)]
pub struct ChannelPlanes {
    planes: Vec<Vec<f32>>,
}

impl ChannelPlanes {
    pub fn new(channels: usize) -> Self {
        Self {
            planes: vec![Vec::new(); channels],
        }
    }

    /// Fill the planes from an interleaved 16-bit buffer
    pub fn load(&mut self, buffer: &AudioBuffer) -> Result<(), DspError> {
        buffer.ensure_s16le()?;
        let channels = buffer.format().channels as usize;
        if self.planes.len() != channels {
            self.planes.resize(channels, Vec::new());
        }
        let frames = buffer.frame_count();
        for plane in &mut self.planes {
            plane.clear();
            plane.reserve(frames);
        }
        for frame in buffer.data().chunks_exact(channels * 2) {
            for (ch, bytes) in frame.chunks_exact(2).enumerate() {
                self.planes[ch].push(i16::from_le_bytes([bytes[0], bytes[1]]) as f32);
            }
        }
        Ok(())
    }

    /// Write the planes back into an interleaved 16-bit buffer, clamping
    pub fn store(&self, buffer: &mut AudioBuffer) -> Result<(), DspError> {
        buffer.ensure_s16le()?;
        let channels = self.planes.len();
        for (i, frame) in buffer.data_mut().chunks_exact_mut(channels * 2).enumerate() {
            for (ch, bytes) in frame.chunks_exact_mut(2).enumerate() {
                let value = self.planes[ch].get(i).copied().unwrap_or(0.0);
                let sample = value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                bytes.copy_from_slice(&sample.to_le_bytes());
            }
        }
        Ok(())
    }

    /// Average all channels into `out` (mono reference signal)
    pub fn downmix_into(&self, out: &mut Vec<f32>) {
        out.clear();
        let Some(first) = self.planes.first() else {
            return;
        };
        let scale = 1.0 / self.planes.len() as f32;
        out.extend((0..first.len()).map(|i| {
            self.planes.iter().map(|plane| plane[i]).sum::<f32>() * scale
        }));
    }

    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    pub fn plane(&self, channel: usize) -> &[f32] {
        &self.planes[channel]
    }

    pub fn plane_mut(&mut self, channel: usize) -> &mut [f32] {
        &mut self.planes[channel]
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Vec<f32>> {
        self.planes.iter_mut()
    }
}
