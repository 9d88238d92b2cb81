//! Pipeline and Engine Configuration

use std::path::PathBuf;

use hush_dsp::{AudioFormat, BackendKind};
use serde::{Deserialize, Serialize};

/// Where and whether raw and processed audio is archived to WAV files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub enabled: bool,

    /// Directory holding both archive files
    pub directory: PathBuf,

    /// File name for the unprocessed capture
    #[serde(default = "default_source_file")]
    pub source_file: String,

    /// File name for the processed output
    #[serde(default = "default_processed_file")]
    pub processed_file: String,
}

fn default_source_file() -> String {
    "source.wav".to_string()
}

fn default_processed_file() -> String {
    "processed.wav".to_string()
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("."),
            source_file: default_source_file(),
            processed_file: default_processed_file(),
        }
    }
}

impl ArchiveConfig {
    /// Archive into `directory` with the default file names
    pub fn in_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            directory: directory.into(),
            ..Self::default()
        }
    }

    pub fn source_path(&self) -> PathBuf {
        self.directory.join(&self.source_file)
    }

    pub fn processed_path(&self) -> PathBuf {
        self.directory.join(&self.processed_file)
    }
}

/// Formats, backend and archiving for one pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Format of the main capture stream (and of the output)
    pub main_format: AudioFormat,

    /// Format of the auxiliary (echo reference) stream
    pub aux_format: AudioFormat,

    /// Engine installed when the pipeline is created
    pub backend: BackendKind,

    #[serde(default)]
    pub archive: ArchiveConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            main_format: AudioFormat::pcm_s16le(48000, 1),
            aux_format: AudioFormat::pcm_s16le(48000, 2),
            backend: BackendKind::default(),
            archive: ArchiveConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        self.main_format
            .validate()
            .map_err(|e| format!("main stream: {}", e))?;
        self.aux_format
            .validate()
            .map_err(|e| format!("aux stream: {}", e))?;

        if self.main_format.sample_rate != self.aux_format.sample_rate {
            return Err(format!(
                "aux sample rate {} Hz must match main sample rate {} Hz",
                self.aux_format.sample_rate, self.main_format.sample_rate
            ));
        }
        if self.main_format.sample_rate < 8000 || self.main_format.sample_rate > 192000 {
            return Err(format!("Invalid sample rate: {}", self.main_format.sample_rate));
        }
        if self.main_format.channels > 8 || self.aux_format.channels > 8 {
            return Err("At most 8 channels are supported".to_string());
        }
        if self.archive.enabled && self.archive.source_file == self.archive.processed_file {
            return Err("Archive source and processed files must differ".to_string());
        }
        Ok(())
    }

    /// Main-stream bytes in one frame of the given duration
    pub fn main_bytes(&self, duration_ms: u32) -> usize {
        self.main_format.bytes_for_duration(duration_ms)
    }

    /// Aux-stream bytes spanning the same duration
    pub fn aux_bytes(&self, duration_ms: u32) -> usize {
        self.aux_format.bytes_for_duration(duration_ms)
    }
}

/// Overall engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub pipeline: PipelineConfig,

    /// Capture device name (None = system default)
    pub input_device: Option<String>,

    /// Echo reference device name (None = no reference capture)
    pub monitor_device: Option<String>,

    /// Playback device name (None = system default)
    pub output_device: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::speech()
    }
}

impl EngineConfig {
    /// 48 kHz mono voice capture with a stereo monitor reference
    pub fn speech() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            input_device: None,
            monitor_device: None,
            output_device: None,
        }
    }

    /// Same layout with the APM engine installed
    pub fn low_latency() -> Self {
        let mut config = Self::speech();
        config.pipeline.backend = BackendKind::Apm;
        config
    }
}
