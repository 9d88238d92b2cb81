//! Device Streams
//!
//! Bridges cpal callbacks to an [`AudioPipeline`]:
//!
//! ```text
//!   capture device ──▶ pipeline.write()
//!   monitor device ──▶ pipeline.write_aux()     (optional echo reference)
//!   playback device ◀── pipeline.read()         (silence on shortfall)
//! ```
//!
//! Streams carry 16-bit signed PCM in the pipeline's formats. The callbacks
//! only copy bytes; processing happens on the pipeline's own thread.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleRate, Stream, StreamConfig};
use crossbeam_channel::Sender;
use hush_dsp::AudioFormat;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::message::Event;
use crate::pipeline::AudioPipeline;

/// Running capture, monitor and playback streams
///
/// The streams stop when this is dropped.
pub struct DeviceStreams {
    // Held to keep the callbacks alive
    _capture: Stream,
    _monitor: Option<Stream>,
    _playback: Stream,
}

impl DeviceStreams {
    /// Build and start all streams for `pipeline`
    pub fn start(
        pipeline: Arc<AudioPipeline>,
        capture: &Device,
        monitor: Option<&Device>,
        playback: &Device,
        events: Sender<Event>,
    ) -> EngineResult<Self> {
        let config = pipeline.config();
        let main = stream_config(&config.main_format)?;

        let capture_stream = build_capture(capture, &main, Arc::clone(&pipeline), false, events.clone())?;
        let monitor_stream = match monitor {
            Some(device) => {
                let aux = stream_config(&config.aux_format)?;
                Some(build_capture(device, &aux, Arc::clone(&pipeline), true, events.clone())?)
            }
            None => None,
        };
        let playback_stream = build_playback(playback, &main, pipeline, events)?;

        for stream in [Some(&capture_stream), monitor_stream.as_ref(), Some(&playback_stream)]
            .into_iter()
            .flatten()
        {
            stream
                .play()
                .map_err(|e| EngineError::StreamPlayError(e.to_string()))?;
        }

        info!(
            "Device streams running ({} Hz, {} ch, monitor: {})",
            main.sample_rate.0,
            main.channels,
            monitor_stream.is_some()
        );

        Ok(Self {
            _capture: capture_stream,
            _monitor: monitor_stream,
            _playback: playback_stream,
        })
    }
}

fn stream_config(format: &AudioFormat) -> EngineResult<StreamConfig> {
    if !format.is_s16le() {
        return Err(EngineError::ConfigError(format!(
            "device streams require 16-bit signed PCM, got {:?}",
            format
        )));
    }
    Ok(StreamConfig {
        channels: format.channels,
        sample_rate: SampleRate(format.sample_rate),
        buffer_size: BufferSize::Default,
    })
}

fn build_capture(
    device: &Device,
    config: &StreamConfig,
    pipeline: Arc<AudioPipeline>,
    is_monitor: bool,
    events: Sender<Event>,
) -> EngineResult<Stream> {
    let err_sender = events;
    let mut scratch: Vec<u8> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                samples_to_bytes(data, &mut scratch);
                // Writes before open() are discarded
                let _ = if is_monitor {
                    pipeline.write_aux(&scratch)
                } else {
                    pipeline.write(&scratch)
                };
            },
            move |err| {
                let _ = err_sender.try_send(Event::error(err));
            },
            None,
        )
        .map_err(|e| EngineError::StreamBuildError(e.to_string()))
}

fn build_playback(
    device: &Device,
    config: &StreamConfig,
    pipeline: Arc<AudioPipeline>,
    events: Sender<Event>,
) -> EngineResult<Stream> {
    let err_sender = events.clone();
    let mut scratch: Vec<u8> = Vec::new();
    let mut underrun = UnderrunTracker::default();

    device
        .build_output_stream(
            config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len() * 2, 0);
                let read = pipeline.read(&mut scratch);
                let filled = bytes_to_samples(&scratch[..read], data);
                data[filled..].fill(0);

                if underrun.update(filled < data.len()) {
                    debug!("Playback underrun: {} of {} samples", filled, data.len());
                    let _ = events.try_send(Event::BufferUnderrun);
                }
            },
            move |err| {
                let _ = err_sender.try_send(Event::error(err));
            },
            None,
        )
        .map_err(|e| EngineError::StreamBuildError(e.to_string()))
}

/// Serialize samples as little-endian bytes into `out`, reusing its allocation
pub(crate) fn samples_to_bytes(samples: &[i16], out: &mut Vec<u8>) {
    out.clear();
    out.extend(samples.iter().flat_map(|s| s.to_le_bytes()));
}

/// Decode whole little-endian samples from `bytes` into `out`
///
/// Returns the number of samples written. A trailing odd byte is ignored.
pub(crate) fn bytes_to_samples(bytes: &[u8], out: &mut [i16]) -> usize {
    let mut count = 0;
    for (slot, pair) in out.iter_mut().zip(bytes.chunks_exact(2)) {
        *slot = i16::from_le_bytes([pair[0], pair[1]]);
        count += 1;
    }
    count
}

/// Reports only the first short callback of each underrun
#[derive(Debug, Default)]
struct UnderrunTracker {
    starved: bool,
}

impl UnderrunTracker {
    /// Returns true when a new underrun begins
    fn update(&mut self, short: bool) -> bool {
        let began = short && !self.starved;
        self.starved = short;
        began
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_byte_conversion() {
        let samples = [0i16, 1, -1, i16::MAX, i16::MIN];
        let mut bytes = Vec::new();
        samples_to_bytes(&samples, &mut bytes);
        assert_eq!(bytes.len(), 10);
        assert_eq!(&bytes[2..4], &[1, 0]);

        let mut out = [0i16; 5];
        assert_eq!(bytes_to_samples(&bytes, &mut out), 5);
        assert_eq!(out, samples);
    }

    #[test]
    fn test_short_read_decodes_prefix() {
        let mut out = [9i16; 4];
        // Three bytes: one whole sample plus a dangling byte
        assert_eq!(bytes_to_samples(&[0x10, 0x00, 0xff], &mut out), 1);
        assert_eq!(out[0], 16);
        assert_eq!(out[1], 9);
    }

    #[test]
    fn test_scratch_reused() {
        let mut bytes = Vec::with_capacity(64);
        samples_to_bytes(&[1; 8], &mut bytes);
        samples_to_bytes(&[2; 4], &mut bytes);
        assert_eq!(bytes.len(), 8);
        assert!(bytes.capacity() >= 64);
    }

    #[test]
    fn test_underrun_reported_once_per_episode() {
        let mut tracker = UnderrunTracker::default();
        assert!(tracker.update(true));
        assert!(!tracker.update(true));
        assert!(!tracker.update(false));
        assert!(tracker.update(true));
    }

    #[test]
    fn test_stream_config_requires_s16() {
        let config = stream_config(&AudioFormat::pcm_s16le(48000, 2)).unwrap();
        assert_eq!(config.channels, 2);
        assert_eq!(config.sample_rate.0, 48000);

        assert!(matches!(
            stream_config(&AudioFormat::pcm_f32le(48000, 1)),
            Err(EngineError::ConfigError(_))
        ));
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_default_devices_stream() {
        use crate::config::PipelineConfig;
        use crate::device::{resolve_device, DeviceType};

        let (pipeline, _events) = AudioPipeline::with_events(PipelineConfig::default()).unwrap();
        let pipeline = Arc::new(pipeline);
        let capture = resolve_device(DeviceType::Input, None).unwrap();
        let playback = resolve_device(DeviceType::Output, None).unwrap();

        let (sender, _receiver) = crossbeam_channel::unbounded();
        pipeline.open().unwrap();
        let streams = DeviceStreams::start(Arc::clone(&pipeline), &capture, None, &playback, sender);
        assert!(streams.is_ok());
    }
}
