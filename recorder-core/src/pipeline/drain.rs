use std::sync::Arc;
use std::time::Instant;

use crate::models::error::RecorderError;
use crate::models::media::{EncodedSample, EncoderOutput};
use crate::pipeline::capture_loop::FaultHandler;
use crate::pipeline::mux::MuxSynchronizer;
use crate::pipeline::threads;

/// Spawn the thread `name` moving encoder output into `mux`, and hand its
/// handle to `mux` so `finish` can join it.
///
/// `release` runs once the loop ends, whatever the outcome. A failure is
/// logged and passed to `on_fault`.
pub(crate) fn spawn_drain<D, R>(
    name: &'static str,
    mux: Arc<MuxSynchronizer>,
    on_fault: Option<FaultHandler>,
    mut dequeue: D,
    release: R,
) -> Result<(), RecorderError>
where
    D: FnMut() -> Result<EncoderOutput, RecorderError> + Send + 'static,
    R: FnOnce() + Send + 'static,
{
    let drain_mux = Arc::clone(&mux);
    let handle = threads::spawn_named(name, move || {
        let result = drain_to_mux(name, &drain_mux, &mut dequeue);
        release();
        match result {
            Ok(samples) => log::info!("{} done ({} samples)", name, samples),
            Err(e) => {
                log::error!("{} failed: {}", name, e);
                if let Some(handler) = on_fault {
                    handler(e);
                }
            }
        }
    })?;
    mux.attach_drain(name, handle);
    Ok(())
}

/// Dequeue until end of stream. Returns the number of samples written.
///
/// The format change registers the track and codec-config samples are
/// dropped, since the format already carried that data. Timestamps are
/// rewritten relative to the first dequeue, so they never decrease. A
/// stream that ends or fails before its format is known declares its track
/// unavailable, so the other producer is not left at the barrier.
pub(crate) fn drain_to_mux<D>(name: &str, mux: &MuxSynchronizer, dequeue: &mut D) -> Result<u64, RecorderError>
where
    D: FnMut() -> Result<EncoderOutput, RecorderError>,
{
    let mut track: Option<usize> = None;
    let mut clock: Option<Instant> = None;
    let mut written = 0u64;

    loop {
        let output = match dequeue() {
            Ok(output) => output,
            Err(e) => {
                if track.is_none() {
                    mux.mark_track_unavailable();
                }
                return Err(e);
            }
        };
        let start = *clock.get_or_insert_with(Instant::now);

        match output {
            EncoderOutput::FormatChanged(format) => {
                if track.is_some() {
                    return Err(RecorderError::MuxerSequence(format!("{}: format changed twice", name)));
                }
                track = Some(mux.register_track(&format)?);
            }
            EncoderOutput::Sample(sample) => {
                let end_of_stream = sample.is_end_of_stream();
                if !sample.is_codec_config() && !sample.data.is_empty() {
                    let Some(index) = track else {
                        return Err(RecorderError::MuxerSequence(format!("{}: muxer hasn't started", name)));
                    };
                    let pts_us = start.elapsed().as_micros() as i64;
                    mux.write_sample(index, &EncodedSample { pts_us, ..sample })?;
                    written += 1;
                }
                if end_of_stream {
                    if track.is_none() {
                        log::warn!("{} ended before its format was known", name);
                        mux.mark_track_unavailable();
                    }
                    return Ok(written);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::media::{SampleFlags, TrackFormat};
    use crate::models::state::MuxState;
    use crate::traits::container::ContainerWriter;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};
    use std::thread;
    use std::time::Duration;

    /// Records `(track, pts)` of every written sample.
    struct PtsContainer {
        path: PathBuf,
        tracks: usize,
        written: Arc<Mutex<Vec<(usize, i64)>>>,
    }

    impl ContainerWriter for PtsContainer {
        fn add_track(&mut self, _format: &TrackFormat) -> Result<usize, RecorderError> {
            self.tracks += 1;
            Ok(self.tracks - 1)
        }

        fn start(&mut self) -> Result<(), RecorderError> {
            Ok(())
        }

        fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> Result<(), RecorderError> {
            self.written.lock().push((track, sample.pts_us));
            Ok(())
        }

        fn stop(&mut self) -> Result<(), RecorderError> {
            Ok(())
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }

    fn audio_format() -> TrackFormat {
        TrackFormat::Audio {
            mime: "audio/mp4a-latm".into(),
            sample_rate: 44_100,
            channels: 1,
            bitrate: 65_536,
            codec_config: vec![0x12, 0x08],
        }
    }

    fn video_format() -> TrackFormat {
        TrackFormat::Video {
            mime: "video/avc".into(),
            width: 640,
            height: 480,
            frame_rate: 30,
            bitrate: 2_000_000,
            codec_config: Vec::new(),
        }
    }

    /// A dequeue that plays `outputs` with a short delay between them.
    fn scripted(outputs: Vec<EncoderOutput>) -> impl FnMut() -> Result<EncoderOutput, RecorderError> + Send + 'static {
        let mut outputs: VecDeque<_> = outputs.into();
        move || {
            thread::sleep(Duration::from_millis(1));
            outputs
                .pop_front()
                .ok_or_else(|| RecorderError::DeviceUnavailable("script exhausted".into()))
        }
    }

    /// Encoder timestamps that run backwards, to show they are not trusted.
    fn stream(format: TrackFormat, frames: i64) -> Vec<EncoderOutput> {
        let mut outputs = vec![EncoderOutput::FormatChanged(format)];
        outputs.push(EncoderOutput::Sample(EncodedSample::new(
            0,
            vec![0xAA],
            SampleFlags {
                codec_config: true,
                ..Default::default()
            },
        )));
        for i in 0..frames {
            outputs.push(EncoderOutput::Sample(EncodedSample::new(
                (frames - i) * 10_000,
                vec![i as u8; 16],
                SampleFlags::default(),
            )));
        }
        outputs.push(EncoderOutput::Sample(EncodedSample::end_of_stream(0)));
        outputs
    }

    #[test]
    fn timestamps_never_decrease_per_track() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let mux = Arc::new(MuxSynchronizer::new(
            Box::new(PtsContainer {
                path: PathBuf::from("pts.mp4"),
                tracks: 0,
                written: Arc::clone(&written),
            }),
            2,
            Duration::from_secs(5),
        ));

        spawn_drain("video-drain", Arc::clone(&mux), None, scripted(stream(video_format(), 30)), || {}).unwrap();
        spawn_drain("audio-drain", Arc::clone(&mux), None, scripted(stream(audio_format(), 20)), || {}).unwrap();
        mux.finish(Duration::from_secs(5)).unwrap();

        let written = written.lock().clone();
        assert_eq!(written.len(), 50);
        for track in 0..2 {
            let pts: Vec<i64> = written.iter().filter(|(t, _)| *t == track).map(|(_, p)| *p).collect();
            assert!(!pts.is_empty());
            assert!(pts.windows(2).all(|w| w[0] <= w[1]), "track {} went backwards: {:?}", track, pts);
        }
    }

    #[test]
    fn end_of_stream_before_format_releases_the_other_track() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let mux = Arc::new(MuxSynchronizer::new(
            Box::new(PtsContainer {
                path: PathBuf::from("eos.mp4"),
                tracks: 0,
                written,
            }),
            2,
            Duration::from_secs(30),
        ));
        let audio = {
            let mux = Arc::clone(&mux);
            thread::spawn(move || mux.register_track(&audio_format()))
        };
        thread::sleep(Duration::from_millis(30));

        let mut video = scripted(vec![EncoderOutput::Sample(EncodedSample::end_of_stream(0))]);
        assert_eq!(drain_to_mux("video-drain", &mux, &mut video), Ok(0));

        assert_eq!(audio.join().unwrap(), Ok(0));
        assert_eq!(mux.state(), MuxState::Started);
    }

    #[test]
    fn release_runs_and_fault_is_reported() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let mux = Arc::new(MuxSynchronizer::new(
            Box::new(PtsContainer {
                path: PathBuf::from("fault.mp4"),
                tracks: 0,
                written,
            }),
            1,
            Duration::from_secs(1),
        ));
        let faults = Arc::new(Mutex::new(Vec::new()));
        let released = Arc::new(Mutex::new(false));
        let on_fault: FaultHandler = {
            let faults = Arc::clone(&faults);
            Arc::new(move |e| faults.lock().push(e))
        };
        let release = {
            let released = Arc::clone(&released);
            move || *released.lock() = true
        };

        // Script runs dry before end of stream.
        spawn_drain("audio-drain", Arc::clone(&mux), Some(on_fault), scripted(Vec::new()), release).unwrap();
        assert!(mux.finish(Duration::from_secs(2)).is_err());

        assert!(*released.lock());
        assert!(matches!(faults.lock().as_slice(), [RecorderError::DeviceUnavailable(_)]));
    }
}
