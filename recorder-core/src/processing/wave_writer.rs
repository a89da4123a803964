use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::models::error::RecorderError;
use crate::models::media::PcmFormat;
use crate::processing::wav_format::{self, MAX_WAV_DATA_SIZE};

/// Wraps a raw PCM byte stream into a self-contained WAV file, in place.
///
/// Two passes: the capture loop records headerless PCM, then `convert`
/// writes `header + body` to `<path>.tmp` and renames it over `<path>`.
/// A failed conversion leaves the raw file untouched so it can be retried.
#[derive(Debug, Clone, Copy)]
pub struct WaveContainerWriter {
    format: PcmFormat,
}

impl Default for WaveContainerWriter {
    fn default() -> Self {
        Self::new(PcmFormat::MIC)
    }
}

impl WaveContainerWriter {
    pub fn new(format: PcmFormat) -> Self {
        Self { format }
    }

    /// Convert the raw PCM at `raw_path` and return the WAV path (the same path).
    ///
    /// The producer must have flushed and closed the raw file.
    pub fn convert(&self, raw_path: &Path) -> Result<PathBuf, RecorderError> {
        let audio_length = fs::metadata(raw_path)
            .map_err(|e| RecorderError::io("failed to stat raw pcm", e))?
            .len();
        if audio_length > MAX_WAV_DATA_SIZE {
            return Err(RecorderError::Io(format!(
                "raw pcm too large for a RIFF container: {} bytes",
                audio_length
            )));
        }

        let tmp_path = temp_path_for(raw_path);
        if let Err(e) = self.write_wave(raw_path, &tmp_path, audio_length as u32) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        // Replaces the raw file; it is only gone once the rename succeeded.
        if let Err(e) = fs::rename(&tmp_path, raw_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(RecorderError::io("failed to replace raw pcm with wav", e));
        }

        log::info!(
            "Converted {} ({} bytes of pcm) to wav",
            raw_path.display(),
            audio_length
        );
        Ok(raw_path.to_path_buf())
    }

    fn write_wave(&self, raw_path: &Path, tmp_path: &Path, audio_length: u32) -> Result<(), RecorderError> {
        let input = File::open(raw_path).map_err(|e| RecorderError::io("failed to open raw pcm", e))?;
        let output = File::create(tmp_path).map_err(|e| RecorderError::io("failed to create temp wav", e))?;

        let mut reader = BufReader::new(input);
        let mut writer = BufWriter::new(output);

        let header = wav_format::generate_wav_header(self.format, audio_length);
        writer
            .write_all(&header)
            .map_err(|e| RecorderError::io("failed to write wav header", e))?;

        let copied = io::copy(&mut reader, &mut writer).map_err(|e| RecorderError::io("failed to copy pcm body", e))?;
        if copied != audio_length as u64 {
            return Err(RecorderError::Io(format!(
                "raw pcm changed during conversion: expected {} bytes, copied {}",
                audio_length, copied
            )));
        }

        let file = writer
            .into_inner()
            .map_err(|e| RecorderError::io("failed to flush wav", e.into_error()))?;
        file.sync_all().map_err(|e| RecorderError::io("failed to sync wav", e))?;
        Ok(())
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::wav_format::parse_wav_header;

    fn write_raw(dir: &Path, name: &str, len: usize) -> PathBuf {
        let path = dir.join(name);
        let body: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn convert_prepends_header_for_various_lengths() {
        let dir = tempfile::tempdir().unwrap();
        for len in [0usize, 1, 2, 1023, 5120, 44_100] {
            let raw = write_raw(dir.path(), &format!("raw_{}.wav", len), len);
            let out = WaveContainerWriter::default().convert(&raw).unwrap();
            assert_eq!(out, raw);

            let data = fs::read(&out).unwrap();
            assert_eq!(data.len(), 44 + len);

            let header = parse_wav_header(&data).unwrap();
            assert_eq!(header.riff_chunk_size as usize, len + 36);
            assert_eq!(header.data_size as usize, len);
            assert_eq!(header.format.sample_rate, 44100);
            assert_eq!(header.format.channels, 1);
            assert_eq!(header.format.bits_per_sample, 16);

            let expected: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            assert_eq!(&data[44..], &expected[..]);
        }
    }

    #[test]
    fn convert_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let raw = write_raw(dir.path(), "clip.wav", 64);
        WaveContainerWriter::default().convert(&raw).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![OsString::from("clip.wav")]);
    }

    #[test]
    fn missing_source_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = WaveContainerWriter::default()
            .convert(&dir.path().join("absent.wav"))
            .unwrap_err();
        assert!(matches!(err, RecorderError::Io(_)));
    }

    #[test]
    fn failed_conversion_keeps_raw_file() {
        let dir = tempfile::tempdir().unwrap();
        let raw = write_raw(dir.path(), "stuck.wav", 128);
        // A directory squatting on the temp path makes the temp file uncreatable.
        fs::create_dir(temp_path_for(&raw)).unwrap();

        let err = WaveContainerWriter::default().convert(&raw).unwrap_err();
        assert!(matches!(err, RecorderError::Io(_)));
        assert_eq!(fs::read(&raw).unwrap().len(), 128);
    }
}
