//! WAV Archive Writer
//!
//! Append-only PCM sink with the canonical 44-byte RIFF/WAVE header. Chunk
//! sizes are written as placeholders and backfilled on close from the final
//! file length, so a crash leaves a file with zero sizes rather than a
//! truncated header.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use hush_dsp::{AudioFormat, ByteOrder, SampleType};
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};

/// Size of the PCM WAV header
pub const WAV_HEADER_LEN: u64 = 44;

/// Whether `format` can be stored as plain PCM WAV
///
/// WAV PCM supports 8-bit unsigned samples, or 16-bit and wider signed
/// little-endian samples.
pub fn is_supported_format(format: &AudioFormat) -> bool {
    (format.sample_size == 8 && format.sample_type == SampleType::UnsignedInt)
        || (format.sample_size > 8
            && format.sample_size % 8 == 0
            && format.sample_type == SampleType::SignedInt
            && format.byte_order == ByteOrder::LittleEndian)
}

/// Build the 44-byte header with zeroed size fields
fn header(format: &AudioFormat) -> [u8; WAV_HEADER_LEN as usize] {
    let channels = format.channels;
    let bits = format.sample_size;
    let block_align = channels * (bits / 8);
    let byte_rate = format.sample_rate * block_align as u32;

    let mut header = [0u8; WAV_HEADER_LEN as usize];
    header[0..4].copy_from_slice(b"RIFF");
    // 4..8: RIFF chunk size placeholder
    header[8..12].copy_from_slice(b"WAVE");

    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    header[22..24].copy_from_slice(&channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&bits.to_le_bytes());

    header[36..40].copy_from_slice(b"data");
    // 40..44: data chunk size placeholder
    header
}

/// Sequential WAV file writer
pub struct WavFileWriter {
    path: PathBuf,
    format: AudioFormat,
    writer: Option<BufWriter<File>>,
    data_len: u64,
}

impl WavFileWriter {
    /// Create (truncating) `path` and write the header
    pub fn create(path: impl AsRef<Path>, format: AudioFormat) -> EngineResult<Self> {
        if !is_supported_format(&format) {
            return Err(EngineError::ConfigError(
                "WAV PCM supports only 8-bit unsigned samples \
                 or 16-bit (or more) signed samples (in little endian)"
                    .to_string(),
            ));
        }

        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut writer = BufWriter::new(file);
        writer.write_all(&header(&format))?;
        debug!("Archive opened at {:?}", path);

        Ok(Self {
            path,
            format,
            writer: Some(writer),
            data_len: 0,
        })
    }

    /// Append raw PCM bytes
    pub fn append(&mut self, data: &[u8]) -> EngineResult<()> {
        let writer = self.writer.as_mut().ok_or(EngineError::NotOpen)?;
        writer.write_all(data)?;
        self.data_len += data.len() as u64;
        Ok(())
    }

    /// Backfill the size fields and close the file
    ///
    /// Calling it again after the first close does nothing.
    pub fn close(&mut self) -> EngineResult<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let mut file = writer.into_inner().map_err(|e| e.into_error())?;

        let file_len = file.seek(SeekFrom::End(0))?;
        let riff_len = chunk_size(file_len.saturating_sub(8));
        let data_len = chunk_size(file_len.saturating_sub(WAV_HEADER_LEN));

        file.seek(SeekFrom::Start(4))?;
        file.write_all(&riff_len.to_le_bytes())?;
        file.seek(SeekFrom::Start(40))?;
        file.write_all(&data_len.to_le_bytes())?;
        file.flush()?;

        debug!("Archive closed at {:?} ({} data bytes)", self.path, data_len);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// PCM bytes appended so far
    pub fn data_len(&self) -> u64 {
        self.data_len
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }
}

impl Drop for WavFileWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to finalize archive {:?}: {}", self.path, e);
        }
    }
}

/// Clamp a length to the 32-bit RIFF size field
fn chunk_size(len: u64) -> u32 {
    u32::try_from(len).unwrap_or_else(|_| {
        warn!("Archive larger than 4 GiB, WAV size field clamped from {} bytes", len);
        u32::MAX
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn read_u32(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn read_u16(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
    }

    #[test]
    fn test_header_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");

        let mut writer = WavFileWriter::create(&path, AudioFormat::pcm_s16le(48000, 2)).unwrap();
        writer.append(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        writer.close().unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 52);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(read_u32(&bytes, 4), 44);
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(read_u32(&bytes, 16), 16);
        assert_eq!(read_u16(&bytes, 20), 1);
        assert_eq!(read_u16(&bytes, 22), 2);
        assert_eq!(read_u32(&bytes, 24), 48000);
        assert_eq!(read_u32(&bytes, 28), 192000);
        assert_eq!(read_u16(&bytes, 32), 4);
        assert_eq!(read_u16(&bytes, 34), 16);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(read_u32(&bytes, 40), 8);
        assert_eq!(&bytes[44..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_close_twice_keeps_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twice.wav");

        let mut writer = WavFileWriter::create(&path, AudioFormat::pcm_s16le(16000, 1)).unwrap();
        writer.append(&[0; 320]).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(!writer.is_open());
        drop(writer);

        let bytes = fs::read(&path).unwrap();
        assert_eq!(read_u32(&bytes, 4), 320 + 36);
        assert_eq!(read_u32(&bytes, 40), 320);
    }

    #[test]
    fn test_drop_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dropped.wav");
        {
            let mut writer = WavFileWriter::create(&path, AudioFormat::pcm_u8(8000, 1)).unwrap();
            writer.append(&[128; 80]).unwrap();
        }
        let bytes = fs::read(&path).unwrap();
        assert_eq!(read_u32(&bytes, 40), 80);
        assert_eq!(read_u16(&bytes, 34), 8);
    }

    #[test]
    fn test_empty_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        WavFileWriter::create(&path, AudioFormat::pcm_s16le(48000, 1))
            .unwrap()
            .close()
            .unwrap();
        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 44);
        assert_eq!(read_u32(&bytes, 4), 36);
        assert_eq!(read_u32(&bytes, 40), 0);
    }

    #[test]
    fn test_append_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            WavFileWriter::create(dir.path().join("closed.wav"), AudioFormat::pcm_s16le(48000, 1))
                .unwrap();
        writer.close().unwrap();
        assert!(matches!(writer.append(&[0, 0]), Err(EngineError::NotOpen)));
    }

    #[test]
    fn test_supported_formats() {
        assert!(is_supported_format(&AudioFormat::pcm_s16le(48000, 1)));
        assert!(is_supported_format(&AudioFormat::pcm_u8(8000, 1)));
        assert!(!is_supported_format(&AudioFormat::pcm_f32le(48000, 1)));

        let signed8 = AudioFormat {
            sample_type: SampleType::SignedInt,
            ..AudioFormat::pcm_u8(8000, 1)
        };
        assert!(!is_supported_format(&signed8));

        let big_endian = AudioFormat {
            byte_order: ByteOrder::BigEndian,
            ..AudioFormat::pcm_s16le(48000, 1)
        };
        assert!(!is_supported_format(&big_endian));

        let dir = tempfile::tempdir().unwrap();
        let result = WavFileWriter::create(dir.path().join("f.wav"), AudioFormat::pcm_f32le(48000, 1));
        assert!(matches!(result, Err(EngineError::ConfigError(_))));
    }

    #[test]
    fn test_chunk_size_saturates() {
        assert_eq!(chunk_size(0), 0);
        assert_eq!(chunk_size(960), 960);
        assert_eq!(chunk_size(u64::from(u32::MAX)), u32::MAX);
        assert_eq!(chunk_size(u64::from(u32::MAX) + 1), u32::MAX);
        assert_eq!(chunk_size(6 << 30), u32::MAX);
    }
}
