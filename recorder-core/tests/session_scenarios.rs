use std::sync::Arc;
use std::thread;
use std::time::Duration;

use recorder_core::devices::memory::{
    CollectingObserver, MemoryBackend, MemoryCatalog, MemoryStorage, StaticCapabilities, StaticPermissions,
};
use recorder_core::processing::wav_format::parse_wav_header;
use recorder_core::{
    Collaborators, EncoderCapability, Quality, RecorderConfig, RecorderError, RecordingKind, RecordingSessionController,
    Resolution, SessionStatus, StartRequest, StorageProvider,
};

struct Harness {
    controller: RecordingSessionController,
    backend: Arc<MemoryBackend>,
    storage: Arc<MemoryStorage>,
    observer: Arc<CollectingObserver>,
    _dir: tempfile::TempDir,
}

fn harness(backend: MemoryBackend, free_bytes: Option<u64>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(backend);
    let storage = Arc::new(MemoryStorage::new(dir.path()).with_free_space(free_bytes));
    let controller = RecordingSessionController::new(
        RecorderConfig::default(),
        Collaborators {
            backend: backend.clone(),
            permissions: Arc::new(StaticPermissions::all()),
            storage: storage.clone(),
            catalog: Arc::new(MemoryCatalog::new()),
        },
    )
    .unwrap();
    let observer = Arc::new(CollectingObserver::new());
    controller.subscribe(observer.clone());
    Harness {
        controller,
        backend,
        storage,
        observer,
        _dir: dir,
    }
}

fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..600 {
        if cond() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("condition not reached");
}

fn tone(level: i16, samples: usize) -> Vec<u8> {
    (0..samples).flat_map(|_| level.to_le_bytes()).collect()
}

#[test]
fn high_quality_sound_writes_five_frames_as_wave() {
    let h = harness(MemoryBackend::new().with_microphone(vec![vec![0x10; 1024]; 5]), Some(1 << 30));

    let handle = h.controller.start(StartRequest::sound(Quality::High)).unwrap();
    let mic = h.backend.last_microphone().unwrap();
    wait_for(|| mic.frames_remaining() == 0);
    let result = h.controller.stop(handle).unwrap();

    let bytes = std::fs::read(&result.file_path).unwrap();
    assert_eq!(bytes.len(), 44 + 5120);
    let header = parse_wav_header(&bytes).unwrap();
    assert_eq!(header.data_size, 5120);
    assert_eq!(header.riff_chunk_size, 5120 + 36);
    assert_eq!(header.format.sample_rate, 44_100);
    assert_eq!(header.format.channels, 1);
    assert_eq!(header.format.bits_per_sample, 16);
    assert!(bytes[44..].iter().all(|&b| b == 0x10));
}

#[test]
fn screen_with_audio_falls_back_without_capability_source() {
    let backend = MemoryBackend::new()
        .with_display(Resolution::new(1080, 1920))
        .with_looping_microphone(vec![tone(800, 1024)]);
    let h = harness(backend, Some(1 << 30));

    let handle = h.controller.start(StartRequest::screen(true)).unwrap();
    let video = h.backend.last_video_encoder().unwrap();
    assert_eq!(video.configured().unwrap().resolution, Resolution::new(360, 640));
    assert_eq!(h.backend.display().unwrap().created(), vec![Resolution::new(360, 640)]);

    wait_for(|| video.samples_emitted() >= 5);
    let result = h.controller.stop(handle).unwrap();

    assert_eq!(result.kind, RecordingKind::Screen);
    assert!(result.display_name().starts_with("ScreenRecord-"));
    let bytes = std::fs::read(&result.file_path).unwrap();
    assert!(!bytes.is_empty());
    assert_eq!(&bytes[4..8], b"ftyp");
    assert!(bytes.windows(4).any(|w| w == b"moov"));
    assert!(bytes.windows(4).any(|w| w == b"avc1"));
    assert!(bytes.windows(4).any(|w| w == b"mp4a"));
    assert!(h.backend.last_audio_encoder().unwrap().is_released());
    assert!(video.is_released());
}

#[test]
fn screen_with_default_profile_negotiates_within_profile() {
    let backend = MemoryBackend::new()
        .with_display(Resolution::new(1080, 1920))
        .with_looping_microphone(vec![tone(800, 1024)])
        .with_capabilities(StaticCapabilities::profile(EncoderCapability {
            max_width: 1280,
            max_height: 720,
            max_bitrate: 4_000_000,
        }));
    let h = harness(backend, Some(1 << 30));

    let handle = h.controller.start(StartRequest::screen(true)).unwrap();
    let video = h.backend.last_video_encoder().unwrap();
    let config = video.configured().unwrap();
    assert_eq!(config.resolution, Resolution::new(720, 1280));
    assert_eq!(config.bitrate, 4_000_000);
    assert_eq!(h.backend.display().unwrap().created(), vec![Resolution::new(720, 1280)]);

    wait_for(|| video.samples_emitted() >= 5);
    let result = h.controller.stop(handle).unwrap();
    let bytes = std::fs::read(&result.file_path).unwrap();
    assert!(bytes.windows(4).any(|w| w == b"avc1"));
    assert!(video.is_released());
}

#[test]
fn standard_sound_produces_single_track_m4a() {
    let h = harness(MemoryBackend::new().with_looping_microphone(vec![tone(300, 1024)]), Some(1 << 30));

    let handle = h.controller.start(StartRequest::sound(Quality::Standard)).unwrap();
    let encoder = h.backend.last_audio_encoder().unwrap();
    wait_for(|| encoder.queued_timestamps().len() >= 5);
    let result = h.controller.stop(handle).unwrap();

    assert_eq!(result.mime_type, "audio/mp4a-latm");
    assert!(result.file_path.extension().is_some_and(|e| e == "m4a"));
    let bytes = std::fs::read(&result.file_path).unwrap();
    assert!(bytes.windows(4).any(|w| w == b"mp4a"));
    assert!(!bytes.windows(4).any(|w| w == b"avc1"));
}

#[test]
fn storage_below_threshold_is_rejected_before_anything_starts() {
    let h = harness(MemoryBackend::new().with_microphone(vec![vec![0; 1024]]), Some(10 * 1024 * 1024));

    let err = h.controller.start(StartRequest::sound(Quality::High)).unwrap_err();
    assert!(matches!(err, RecorderError::StorageExhausted(_)));
    assert!(h.backend.last_microphone().is_none());
    assert!(h.controller.status().is_ready());
    assert_eq!(h.observer.statuses(), vec![SessionStatus::Ready]);

    let dir = h.storage.recordings_directory(RecordingKind::Sound).unwrap();
    assert_eq!(std::fs::read_dir(dir).unwrap().count(), 0);
}

#[test]
fn pause_resume_keeps_recording_usable() {
    let h = harness(MemoryBackend::new().with_looping_microphone(vec![tone(50, 512)]), Some(1 << 30));

    let handle = h.controller.start(StartRequest::sound(Quality::High)).unwrap();
    thread::sleep(Duration::from_millis(30));
    h.controller.pause(handle).unwrap();
    h.controller.resume(handle).unwrap();
    thread::sleep(Duration::from_millis(30));
    let result = h.controller.stop(handle).unwrap();

    let bytes = std::fs::read(&result.file_path).unwrap();
    let header = parse_wav_header(&bytes).unwrap();
    assert_eq!(header.data_size as usize, bytes.len() - 44);
    assert!(header.data_size > 0);

    let statuses = h.observer.statuses();
    let paused = statuses.iter().position(|s| *s == SessionStatus::Paused).unwrap();
    assert_eq!(statuses[paused + 1], SessionStatus::Recording);
}
