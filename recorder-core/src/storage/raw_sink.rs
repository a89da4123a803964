use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::models::error::RecorderError;
use crate::models::media::PcmFormat;
use crate::pipeline::capture_loop::PcmSink;
use crate::processing::wave_writer::WaveContainerWriter;

/// Headerless PCM file that becomes a WAV file on `finish`.
///
/// ```text
/// capture: [pcm][pcm][pcm]...         (raw, at the final path)
/// finish:  [44-byte header][pcm...]   (WaveContainerWriter, in place)
/// ```
pub struct RawFileSink {
    path: PathBuf,
    format: PcmFormat,
    writer: Option<BufWriter<File>>,
    bytes_written: u64,
}

impl RawFileSink {
    /// Create the raw file, and its directory if needed.
    pub fn create(path: impl Into<PathBuf>, format: PcmFormat) -> Result<Self, RecorderError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| RecorderError::io("failed to create directory", e))?;
        }
        let file = File::create(&path).map_err(|e| RecorderError::io("failed to create raw pcm file", e))?;
        Ok(Self {
            path,
            format,
            writer: Some(BufWriter::new(file)),
            bytes_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl PcmSink for RawFileSink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), RecorderError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(RecorderError::InvalidState("raw pcm file already finished".into()));
        };
        writer
            .write_all(frame)
            .map_err(|e| RecorderError::io("failed to write pcm", e))?;
        self.bytes_written += frame.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), RecorderError> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let file = writer
            .into_inner()
            .map_err(|e| RecorderError::io("failed to flush pcm", e.into_error()))?;
        file.sync_all().map_err(|e| RecorderError::io("failed to sync pcm", e))?;
        drop(file);

        WaveContainerWriter::new(self.format).convert(&self.path)?;
        Ok(())
    }
}
