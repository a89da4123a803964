use std::sync::Arc;
use std::time::Instant;

use crate::models::error::RecorderError;
use crate::models::media::AudioEncoderConfig;
use crate::pipeline::capture_loop::{FaultHandler, PcmSink};
use crate::pipeline::drain;
use crate::pipeline::mux::MuxSynchronizer;
use crate::traits::encoder::AudioEncoderDevice;

/// Feeds captured PCM into the compressed audio encoder.
///
/// Input timestamps come from a monotonic clock started with the sink.
pub struct EncoderSink {
    encoder: Arc<dyn AudioEncoderDevice>,
    clock: Instant,
    finished: bool,
}

impl EncoderSink {
    fn now_us(&self) -> i64 {
        self.clock.elapsed().as_micros() as i64
    }
}

impl PcmSink for EncoderSink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), RecorderError> {
        let pts = self.now_us();
        self.encoder.queue_input(frame, pts)
    }

    fn finish(&mut self) -> Result<(), RecorderError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let pts = self.now_us();
        self.encoder.signal_end_of_input(pts)
    }
}

/// Compressed audio path: capture loop → encoder → mux.
///
/// The encoder is configured and started on construction so that both
/// producers exist before any drain thread runs.
pub struct AudioEncodeLoop {
    encoder: Arc<dyn AudioEncoderDevice>,
    on_fault: Option<FaultHandler>,
}

impl AudioEncodeLoop {
    pub fn new(encoder: Arc<dyn AudioEncoderDevice>, config: &AudioEncoderConfig) -> Result<Self, RecorderError> {
        encoder.configure(config)?;
        if let Err(e) = encoder.start() {
            encoder.release();
            return Err(e);
        }
        log::info!(
            "Audio encoder started ({} @ {} Hz, {} bps)",
            config.mime,
            config.sample_rate,
            config.bitrate
        );
        Ok(Self { encoder, on_fault: None })
    }

    pub fn with_fault_handler(mut self, handler: FaultHandler) -> Self {
        self.on_fault = Some(handler);
        self
    }

    /// Sink to hand to `AudioCaptureLoop`. Its `finish` signals end of input.
    pub fn input_sink(&self) -> Box<dyn PcmSink> {
        Box::new(EncoderSink {
            encoder: Arc::clone(&self.encoder),
            clock: Instant::now(),
            finished: false,
        })
    }

    /// Spawn the drain thread and hand its handle to `mux`.
    pub fn start_drain(&self, mux: Arc<MuxSynchronizer>) -> Result<(), RecorderError> {
        let encoder = Arc::clone(&self.encoder);
        let release = Arc::clone(&self.encoder);
        drain::spawn_drain(
            "audio-drain",
            mux,
            self.on_fault.clone(),
            move || encoder.dequeue_output(),
            move || release.release(),
        )
    }

    /// Release the encoder. Idempotent; also done by the drain thread on exit.
    pub fn release(&self) {
        self.encoder.release();
    }
}

impl Drop for AudioEncodeLoop {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::memory::PassthroughAudioEncoder;
    use crate::storage::mp4_writer::Mp4Writer;
    use std::time::Duration;

    #[test]
    fn sink_stamps_monotonic_input_and_signals_end() {
        let encoder = Arc::new(PassthroughAudioEncoder::new());
        let audio = AudioEncodeLoop::new(encoder.clone(), &AudioEncoderConfig::aac(64 * 1024)).unwrap();
        let mut sink = audio.input_sink();

        sink.write_frame(&[1, 2, 3, 4]).unwrap();
        sink.write_frame(&[5, 6]).unwrap();
        sink.finish().unwrap();
        sink.finish().unwrap();

        let queued = encoder.queued_timestamps();
        assert_eq!(queued.len(), 2);
        assert!(queued[0] <= queued[1]);
        assert!(encoder.end_of_input_signalled());
    }

    #[test]
    fn drain_registers_track_and_writes_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SoundRecord.m4a");
        let mux = Arc::new(MuxSynchronizer::new(Box::new(Mp4Writer::new(&path)), 1, Duration::from_secs(1)));

        let encoder = Arc::new(PassthroughAudioEncoder::new());
        let audio = AudioEncodeLoop::new(encoder.clone(), &AudioEncoderConfig::aac(64 * 1024)).unwrap();
        let mut sink = audio.input_sink();
        audio.start_drain(Arc::clone(&mux)).unwrap();

        for _ in 0..4 {
            sink.write_frame(&[0u8; 2048]).unwrap();
        }
        sink.finish().unwrap();

        let out = mux.finish(Duration::from_secs(2)).unwrap();
        assert_eq!(out, path);
        assert!(encoder.is_released());
        assert!(std::fs::metadata(&path).unwrap().len() > 4 * 2048);
    }

    #[test]
    fn encoder_failure_before_format_unblocks_mux() {
        let dir = tempfile::tempdir().unwrap();
        let mux = Arc::new(MuxSynchronizer::new(
            Box::new(Mp4Writer::new(dir.path().join("x.mp4"))),
            2,
            Duration::from_secs(5),
        ));

        let encoder = Arc::new(PassthroughAudioEncoder::new());
        let audio = AudioEncodeLoop::new(encoder.clone(), &AudioEncoderConfig::aac(64 * 1024)).unwrap();
        encoder.fail_next_dequeue();
        audio.start_drain(Arc::clone(&mux)).unwrap();

        // Only one track is left to wait for.
        let mut tries = 0;
        while mux.expected_tracks() != 1 && tries < 200 {
            std::thread::sleep(Duration::from_millis(5));
            tries += 1;
        }
        assert_eq!(mux.expected_tracks(), 1);
    }
}
