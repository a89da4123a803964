//! In-memory variants of every capability trait.
//!
//! They run the whole pipeline without hardware: a scripted microphone,
//! encoders that emit well-formed (but not decodable) access units, a
//! display that only records what was asked of it, and collaborators that
//! keep everything in memory.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::models::config::RecordingKind;
use crate::models::error::RecorderError;
use crate::models::media::{
    AudioEncoderConfig, Capability, EncodedSample, EncoderCapability, EncoderOutput, InputSurface, PcmFormat,
    Resolution, SampleFlags, TrackFormat, VideoEncoderConfig,
};
use crate::models::recording_result::RecordingResult;
use crate::models::state::SessionStatus;
use crate::traits::audio_device::AudioDevice;
use crate::traits::backend::MediaBackend;
use crate::traits::collaborators::{CatalogRegistrar, PermissionProvider, StorageProvider};
use crate::traits::encoder::{AudioEncoderDevice, CapabilitySource, DisplaySource, VideoEncoderDevice, VirtualDisplay};
use crate::traits::observer::RecorderObserver;

// ---------------------------------------------------------------------------
// Microphone
// ---------------------------------------------------------------------------

/// Typical minimum for 44.1 kHz mono 16-bit.
const DEFAULT_MIN_BUFFER: usize = 3528;

/// Delay of one read, standing in for the device's buffer latency.
const READ_PACE: Duration = Duration::from_millis(2);

#[derive(Default)]
struct MicState {
    script: Vec<Vec<u8>>,
    pending: VecDeque<Vec<u8>>,
    looping: bool,
    refuse_open: bool,
    fail_after: Option<usize>,
    reads: usize,
    open: bool,
    started: bool,
    closed: bool,
}

/// Microphone that plays back scripted PCM frames.
///
/// Each `read` returns one frame (truncated to the buffer). Without
/// `looping` it returns `Ok(0)` once the script is exhausted.
pub struct MemoryAudioDevice {
    state: Arc<Mutex<MicState>>,
}

impl MemoryAudioDevice {
    pub fn with_frames(frames: Vec<Vec<u8>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MicState {
                pending: frames.iter().cloned().collect(),
                script: frames,
                ..Default::default()
            })),
        }
    }

    /// `open` fails as if another app held the microphone.
    pub fn refusing_open() -> Self {
        let device = Self::with_frames(Vec::new());
        device.state.lock().refuse_open = true;
        device
    }

    /// Restart the script when it runs out.
    pub fn looping(self) -> Self {
        self.state.lock().looping = true;
        self
    }

    /// Reads fail with `DeviceUnavailable` after `reads` successful ones.
    pub fn failing_after(self, reads: usize) -> Self {
        self.state.lock().fail_after = Some(reads);
        self
    }

    /// Observe the device after it was boxed and handed away.
    pub fn probe(&self) -> MicrophoneProbe {
        MicrophoneProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl AudioDevice for MemoryAudioDevice {
    fn open(&mut self, format: PcmFormat) -> Result<(), RecorderError> {
        let mut s = self.state.lock();
        if s.refuse_open {
            return Err(RecorderError::DeviceUnavailable("microphone is in use".into()));
        }
        if format != PcmFormat::MIC {
            return Err(RecorderError::DeviceUnavailable(format!("unsupported format {:?}", format)));
        }
        s.open = true;
        Ok(())
    }

    fn min_buffer_size(&self, _format: PcmFormat) -> usize {
        DEFAULT_MIN_BUFFER
    }

    fn start(&mut self) -> Result<(), RecorderError> {
        let mut s = self.state.lock();
        if !s.open {
            return Err(RecorderError::InvalidState("microphone not open".into()));
        }
        s.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), RecorderError> {
        self.state.lock().started = false;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, RecorderError> {
        thread::sleep(READ_PACE);

        let mut s = self.state.lock();
        if !s.started {
            return Ok(0);
        }
        if s.fail_after.is_some_and(|limit| s.reads >= limit) {
            return Err(RecorderError::DeviceUnavailable("microphone disconnected".into()));
        }
        if s.pending.is_empty() && s.looping {
            let script = s.script.clone();
            s.pending.extend(script);
        }
        let Some(frame) = s.pending.pop_front() else {
            return Ok(0);
        };
        s.reads += 1;

        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        Ok(n)
    }

    fn close(&mut self) {
        let mut s = self.state.lock();
        s.started = false;
        s.open = false;
        s.closed = true;
    }
}

/// Read-only view of a `MemoryAudioDevice`.
#[derive(Clone)]
pub struct MicrophoneProbe {
    state: Arc<Mutex<MicState>>,
}

impl MicrophoneProbe {
    /// Frames not yet read. Never zero for a looping script.
    pub fn frames_remaining(&self) -> usize {
        let s = self.state.lock();
        if s.looping {
            s.pending.len().max(s.script.len())
        } else {
            s.pending.len()
        }
    }

    pub fn reads(&self) -> usize {
        self.state.lock().reads
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

// ---------------------------------------------------------------------------
// Audio encoder
// ---------------------------------------------------------------------------

/// AudioSpecificConfig for AAC-LC, 44100 Hz, mono.
const AAC_LC_44100_MONO: [u8; 2] = [0x12, 0x08];

#[derive(Default)]
struct AudioEncoderState {
    config: Option<AudioEncoderConfig>,
    started: bool,
    output: VecDeque<EncoderOutput>,
    queued: Vec<i64>,
    end_of_input: bool,
    fail_next: bool,
    released: bool,
}

/// Audio "encoder" whose access units are the PCM frames it was given.
///
/// Output order: format change, codec-config sample, one sample per queued
/// frame, end of stream.
#[derive(Default)]
pub struct PassthroughAudioEncoder {
    state: Mutex<AudioEncoderState>,
    available: Condvar,
}

impl PassthroughAudioEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configured(&self) -> Option<AudioEncoderConfig> {
        self.state.lock().config.clone()
    }

    /// Input timestamps in queue order.
    pub fn queued_timestamps(&self) -> Vec<i64> {
        self.state.lock().queued.clone()
    }

    pub fn end_of_input_signalled(&self) -> bool {
        self.state.lock().end_of_input
    }

    /// The next `dequeue_output` fails, as a codec error would.
    pub fn fail_next_dequeue(&self) {
        self.state.lock().fail_next = true;
        self.available.notify_all();
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    fn push(&self, s: &mut AudioEncoderState, output: EncoderOutput) {
        s.output.push_back(output);
        self.available.notify_all();
    }
}

impl AudioEncoderDevice for PassthroughAudioEncoder {
    fn configure(&self, config: &AudioEncoderConfig) -> Result<(), RecorderError> {
        if config.mime != AudioEncoderConfig::AAC_MIME {
            return Err(RecorderError::FormatNegotiationFailed(format!("no encoder for {}", config.mime)));
        }
        self.state.lock().config = Some(config.clone());
        Ok(())
    }

    fn start(&self) -> Result<(), RecorderError> {
        let mut s = self.state.lock();
        let Some(config) = s.config.clone() else {
            return Err(RecorderError::InvalidState("audio encoder not configured".into()));
        };
        s.started = true;

        let format = TrackFormat::Audio {
            mime: config.mime,
            sample_rate: config.sample_rate,
            channels: config.channels,
            bitrate: config.bitrate,
            codec_config: AAC_LC_44100_MONO.to_vec(),
        };
        self.push(&mut s, EncoderOutput::FormatChanged(format));
        let csd = SampleFlags {
            codec_config: true,
            ..Default::default()
        };
        self.push(&mut s, EncoderOutput::Sample(EncodedSample::new(0, AAC_LC_44100_MONO.to_vec(), csd)));
        Ok(())
    }

    fn queue_input(&self, pcm: &[u8], pts_us: i64) -> Result<(), RecorderError> {
        let mut s = self.state.lock();
        if !s.started || s.released {
            return Err(RecorderError::InvalidState("audio encoder not running".into()));
        }
        if s.end_of_input {
            return Err(RecorderError::MuxerSequence("input after end of stream".into()));
        }
        s.queued.push(pts_us);
        let flags = SampleFlags {
            key_frame: true,
            ..Default::default()
        };
        self.push(&mut s, EncoderOutput::Sample(EncodedSample::new(pts_us, pcm.to_vec(), flags)));
        Ok(())
    }

    fn signal_end_of_input(&self, pts_us: i64) -> Result<(), RecorderError> {
        let mut s = self.state.lock();
        if s.released {
            return Err(RecorderError::InvalidState("audio encoder released".into()));
        }
        s.end_of_input = true;
        self.push(&mut s, EncoderOutput::Sample(EncodedSample::end_of_stream(pts_us)));
        Ok(())
    }

    fn dequeue_output(&self) -> Result<EncoderOutput, RecorderError> {
        let mut s = self.state.lock();
        loop {
            if s.released {
                return Err(RecorderError::InvalidState("audio encoder released".into()));
            }
            if s.fail_next {
                s.fail_next = false;
                return Err(RecorderError::DeviceUnavailable("audio codec error".into()));
            }
            if let Some(output) = s.output.pop_front() {
                return Ok(output);
            }
            self.available.wait(&mut s);
        }
    }

    fn release(&self) {
        let mut s = self.state.lock();
        if !s.released {
            s.released = true;
            s.started = false;
            self.available.notify_all();
        }
    }
}

// ---------------------------------------------------------------------------
// Video encoder
// ---------------------------------------------------------------------------

/// Baseline profile, level 3.1 SPS and a PPS, Annex-B framed.
const SPS_PPS: [u8; 20] = [
    0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0xc0, 0x1f, 0xda, 0x01, 0x40, 0x16, //
    0x00, 0x00, 0x00, 0x01, 0x68, 0xce, 0x3c, 0x80,
];

/// Key frame every this many frames.
const IDR_PERIOD: u64 = 90;

#[derive(Default)]
struct VideoEncoderState {
    config: Option<VideoEncoderConfig>,
    surface: Option<InputSurface>,
    started: bool,
    format_sent: bool,
    config_sent: bool,
    next_frame_at: Option<Instant>,
    frames: u64,
    end_of_stream: bool,
    end_of_stream_sent: bool,
    released: bool,
}

/// Surface encoder producing a synthetic H.264 stream at the configured
/// frame rate: an IDR every 90 frames, P frames in between.
#[derive(Default)]
pub struct SyntheticVideoEncoder {
    state: Mutex<VideoEncoderState>,
    wake: Condvar,
    emitted: AtomicU64,
}

impl SyntheticVideoEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configured(&self) -> Option<VideoEncoderConfig> {
        self.state.lock().config.clone()
    }

    pub fn end_of_stream_signalled(&self) -> bool {
        self.state.lock().end_of_stream
    }

    /// Frames handed out by `dequeue_output`.
    pub fn samples_emitted(&self) -> u64 {
        self.emitted.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    fn frame(index: u64) -> (Vec<u8>, bool) {
        let key = index % IDR_PERIOD == 0;
        let nal_header = if key { 0x65 } else { 0x41 };
        let mut data = vec![0x00, 0x00, 0x00, 0x01, nal_header, 0x88];
        data.extend_from_slice(&index.to_be_bytes());
        (data, key)
    }
}

impl VideoEncoderDevice for SyntheticVideoEncoder {
    fn configure(&self, config: &VideoEncoderConfig) -> Result<(), RecorderError> {
        if config.mime != VideoEncoderConfig::AVC_MIME {
            return Err(RecorderError::FormatNegotiationFailed(format!("no encoder for {}", config.mime)));
        }
        if config.resolution.width == 0 || config.resolution.height == 0 || config.frame_rate == 0 {
            return Err(RecorderError::FormatNegotiationFailed(format!(
                "unsupported video config {} @ {} fps",
                config.resolution, config.frame_rate
            )));
        }
        self.state.lock().config = Some(config.clone());
        Ok(())
    }

    fn create_input_surface(&self) -> Result<InputSurface, RecorderError> {
        let mut s = self.state.lock();
        if s.config.is_none() {
            return Err(RecorderError::InvalidState("video encoder not configured".into()));
        }
        let surface = InputSurface { id: 1 };
        s.surface = Some(surface);
        Ok(surface)
    }

    fn start(&self) -> Result<(), RecorderError> {
        let mut s = self.state.lock();
        if s.surface.is_none() {
            return Err(RecorderError::InvalidState("input surface not created".into()));
        }
        s.started = true;
        Ok(())
    }

    fn dequeue_output(&self) -> Result<EncoderOutput, RecorderError> {
        let mut s = self.state.lock();
        let Some(config) = s.config.clone() else {
            return Err(RecorderError::InvalidState("video encoder not configured".into()));
        };
        let interval = Duration::from_secs(1) / config.frame_rate;

        loop {
            if s.released {
                return Err(RecorderError::InvalidState("video encoder released".into()));
            }
            if !s.started {
                return Err(RecorderError::InvalidState("video encoder not started".into()));
            }

            if !s.format_sent {
                s.format_sent = true;
                return Ok(EncoderOutput::FormatChanged(TrackFormat::Video {
                    mime: config.mime.clone(),
                    width: config.resolution.width,
                    height: config.resolution.height,
                    frame_rate: config.frame_rate,
                    bitrate: config.bitrate,
                    codec_config: SPS_PPS.to_vec(),
                }));
            }
            if !s.config_sent {
                s.config_sent = true;
                let flags = SampleFlags {
                    codec_config: true,
                    ..Default::default()
                };
                return Ok(EncoderOutput::Sample(EncodedSample::new(0, SPS_PPS.to_vec(), flags)));
            }
            if s.end_of_stream {
                if s.end_of_stream_sent {
                    return Err(RecorderError::InvalidState("end of stream already delivered".into()));
                }
                s.end_of_stream_sent = true;
                let pts = s.frames as i64 * interval.as_micros() as i64;
                return Ok(EncoderOutput::Sample(EncodedSample::end_of_stream(pts)));
            }

            let due = *s.next_frame_at.get_or_insert_with(Instant::now);
            if Instant::now() < due {
                self.wake.wait_until(&mut s, due);
                continue;
            }

            let index = s.frames;
            s.frames += 1;
            s.next_frame_at = Some(due + interval);
            let (data, key_frame) = Self::frame(index);
            let flags = SampleFlags {
                key_frame,
                ..Default::default()
            };
            self.emitted.fetch_add(1, Ordering::SeqCst);
            let pts = index as i64 * interval.as_micros() as i64;
            return Ok(EncoderOutput::Sample(EncodedSample::new(pts, data, flags)));
        }
    }

    fn signal_end_of_input_stream(&self) -> Result<(), RecorderError> {
        let mut s = self.state.lock();
        if s.released {
            return Err(RecorderError::InvalidState("video encoder released".into()));
        }
        s.end_of_stream = true;
        self.wake.notify_all();
        Ok(())
    }

    fn release(&self) {
        let mut s = self.state.lock();
        if !s.released {
            s.released = true;
            self.wake.notify_all();
        }
    }
}

// ---------------------------------------------------------------------------
// Display and capabilities
// ---------------------------------------------------------------------------

/// A screen of fixed size that records the virtual displays it creates.
pub struct MemoryDisplay {
    native: Resolution,
    created: Arc<Mutex<Vec<Resolution>>>,
    released: Arc<AtomicUsize>,
}

impl MemoryDisplay {
    pub fn new(native: Resolution) -> Self {
        Self {
            native,
            created: Arc::new(Mutex::new(Vec::new())),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn created(&self) -> Vec<Resolution> {
        self.created.lock().clone()
    }

    pub fn released_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

struct MemoryVirtualDisplay {
    released: Arc<AtomicUsize>,
    done: bool,
}

impl VirtualDisplay for MemoryVirtualDisplay {
    fn release(&mut self) {
        if !self.done {
            self.done = true;
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl DisplaySource for MemoryDisplay {
    fn native_resolution(&self) -> Resolution {
        self.native
    }

    fn create_virtual_display(
        &self,
        name: &str,
        resolution: Resolution,
        _surface: InputSurface,
    ) -> Result<Box<dyn VirtualDisplay>, RecorderError> {
        log::debug!("Virtual display '{}' at {}", name, resolution);
        self.created.lock().push(resolution);
        Ok(Box::new(MemoryVirtualDisplay {
            released: Arc::clone(&self.released),
            done: false,
        }))
    }
}

/// Fixed encoder capability table.
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilities {
    codec: Option<EncoderCapability>,
    profile: Option<EncoderCapability>,
}

impl StaticCapabilities {
    /// A table with one `video/avc` entry.
    pub fn codec(capability: EncoderCapability) -> Self {
        Self {
            codec: Some(capability),
            profile: None,
        }
    }

    /// No codec entry, only a default profile.
    pub fn profile(capability: EncoderCapability) -> Self {
        Self {
            codec: None,
            profile: Some(capability),
        }
    }
}

impl CapabilitySource for StaticCapabilities {
    fn encoder_capability(&self, mime: &str) -> Option<EncoderCapability> {
        (mime == VideoEncoderConfig::AVC_MIME).then_some(self.codec).flatten()
    }

    fn default_profile(&self) -> Option<EncoderCapability> {
        self.profile
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Grants that can be changed at runtime.
#[derive(Default)]
pub struct StaticPermissions {
    granted: Mutex<HashSet<Capability>>,
}

impl StaticPermissions {
    pub fn all() -> Self {
        Self::granting(&[Capability::Microphone, Capability::PhoneState])
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn granting(capabilities: &[Capability]) -> Self {
        Self {
            granted: Mutex::new(capabilities.iter().copied().collect()),
        }
    }

    pub fn grant(&self, capability: Capability) {
        self.granted.lock().insert(capability);
    }

    pub fn revoke(&self, capability: Capability) {
        self.granted.lock().remove(&capability);
    }
}

impl PermissionProvider for StaticPermissions {
    fn has_permission(&self, capability: Capability) -> bool {
        self.granted.lock().contains(&capability)
    }
}

/// Real directories under `root` with a configurable free-space reading.
pub struct MemoryStorage {
    root: PathBuf,
    free_bytes: Mutex<Option<u64>>,
}

impl MemoryStorage {
    /// Reports 1 GiB free.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            free_bytes: Mutex::new(Some(1 << 30)),
        }
    }

    pub fn with_free_space(self, bytes: Option<u64>) -> Self {
        *self.free_bytes.lock() = bytes;
        self
    }

    pub fn set_free_space(&self, bytes: Option<u64>) {
        *self.free_bytes.lock() = bytes;
    }

    fn directory_for(&self, kind: RecordingKind) -> PathBuf {
        self.root.join(format!("{}Records", kind.prefix()))
    }
}

impl StorageProvider for MemoryStorage {
    fn recordings_directory(&self, kind: RecordingKind) -> Result<PathBuf, RecorderError> {
        let dir = self.directory_for(kind);
        fs::create_dir_all(&dir).map_err(|e| RecorderError::io("failed to create recordings directory", e))?;
        Ok(dir)
    }

    fn available_space(&self, _kind: RecordingKind) -> Option<u64> {
        *self.free_bytes.lock()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub path: PathBuf,
    pub mime_type: String,
    pub display_name: String,
}

/// Media catalog kept in a map.
#[derive(Default)]
pub struct MemoryCatalog {
    entries: Mutex<HashMap<String, CatalogEntry>>,
    next_id: AtomicU64,
    failing: Mutex<bool>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `register` fail.
    pub fn fail_registrations(&self, fail: bool) {
        *self.failing.lock() = fail;
    }

    pub fn entry(&self, id: &str) -> Option<CatalogEntry> {
        self.entries.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CatalogRegistrar for MemoryCatalog {
    fn register(&self, path: &Path, mime_type: &str, display_name: &str) -> Result<String, RecorderError> {
        if *self.failing.lock() {
            return Err(RecorderError::Io("catalog unavailable".into()));
        }
        let id = format!("media-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().insert(
            id.clone(),
            CatalogEntry {
                path: path.to_path_buf(),
                mime_type: mime_type.into(),
                display_name: display_name.into(),
            },
        );
        Ok(id)
    }

    fn unregister(&self, catalog_id: &str) -> Result<(), RecorderError> {
        match self.entries.lock().remove(catalog_id) {
            Some(_) => Ok(()),
            None => Err(RecorderError::InvalidState(format!("no catalog entry {}", catalog_id))),
        }
    }
}

/// Observer that keeps every notification.
#[derive(Default)]
pub struct CollectingObserver {
    statuses: Mutex<Vec<SessionStatus>>,
    elapsed: Mutex<Vec<u64>>,
    amplitudes: Mutex<Vec<u32>>,
    finished: Mutex<Vec<RecordingResult>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statuses(&self) -> Vec<SessionStatus> {
        self.statuses.lock().clone()
    }

    pub fn elapsed(&self) -> Vec<u64> {
        self.elapsed.lock().clone()
    }

    pub fn amplitudes(&self) -> Vec<u32> {
        self.amplitudes.lock().clone()
    }

    pub fn finished(&self) -> Vec<RecordingResult> {
        self.finished.lock().clone()
    }
}

impl RecorderObserver for CollectingObserver {
    fn on_status_changed(&self, status: &SessionStatus) {
        self.statuses.lock().push(status.clone());
    }

    fn on_elapsed_time(&self, seconds: u64) {
        self.elapsed.lock().push(seconds);
    }

    fn on_amplitude(&self, level: u32) {
        self.amplitudes.lock().push(level);
    }

    fn on_recording_finished(&self, result: &RecordingResult) {
        self.finished.lock().push(result.clone());
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// `MediaBackend` handing out the in-memory devices above. Keeps the last
/// device of each kind so tests can inspect it.
#[derive(Default)]
pub struct MemoryBackend {
    mic_frames: Vec<Vec<u8>>,
    mic_looping: bool,
    mic_fail_after: Option<usize>,
    display: Option<Arc<MemoryDisplay>>,
    capabilities: Option<Arc<StaticCapabilities>>,
    last_microphone: Mutex<Option<MicrophoneProbe>>,
    last_audio_encoder: Mutex<Option<Arc<PassthroughAudioEncoder>>>,
    last_video_encoder: Mutex<Option<Arc<SyntheticVideoEncoder>>>,
}

impl MemoryBackend {
    /// A silent microphone and no display.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_microphone(mut self, frames: Vec<Vec<u8>>) -> Self {
        self.mic_frames = frames;
        self.mic_looping = false;
        self
    }

    pub fn with_looping_microphone(mut self, frames: Vec<Vec<u8>>) -> Self {
        self.mic_frames = frames;
        self.mic_looping = true;
        self
    }

    pub fn with_microphone_failing_after(mut self, reads: usize) -> Self {
        self.mic_fail_after = Some(reads);
        self
    }

    pub fn with_display(mut self, native: Resolution) -> Self {
        self.display = Some(Arc::new(MemoryDisplay::new(native)));
        self
    }

    pub fn with_capabilities(mut self, capabilities: StaticCapabilities) -> Self {
        self.capabilities = Some(Arc::new(capabilities));
        self
    }

    pub fn display(&self) -> Option<Arc<MemoryDisplay>> {
        self.display.clone()
    }

    pub fn last_microphone(&self) -> Option<MicrophoneProbe> {
        self.last_microphone.lock().clone()
    }

    pub fn last_audio_encoder(&self) -> Option<Arc<PassthroughAudioEncoder>> {
        self.last_audio_encoder.lock().clone()
    }

    pub fn last_video_encoder(&self) -> Option<Arc<SyntheticVideoEncoder>> {
        self.last_video_encoder.lock().clone()
    }
}

impl MediaBackend for MemoryBackend {
    fn open_microphone(&self) -> Result<Box<dyn AudioDevice>, RecorderError> {
        let mut device = MemoryAudioDevice::with_frames(self.mic_frames.clone());
        if self.mic_looping {
            device = device.looping();
        }
        if let Some(reads) = self.mic_fail_after {
            device = device.failing_after(reads);
        }
        *self.last_microphone.lock() = Some(device.probe());
        Ok(Box::new(device))
    }

    fn create_audio_encoder(&self) -> Result<Arc<dyn AudioEncoderDevice>, RecorderError> {
        let encoder = Arc::new(PassthroughAudioEncoder::new());
        *self.last_audio_encoder.lock() = Some(Arc::clone(&encoder));
        Ok(encoder)
    }

    fn create_video_encoder(&self) -> Result<Arc<dyn VideoEncoderDevice>, RecorderError> {
        let encoder = Arc::new(SyntheticVideoEncoder::new());
        *self.last_video_encoder.lock() = Some(Arc::clone(&encoder));
        Ok(encoder)
    }

    fn display_source(&self) -> Result<Arc<dyn DisplaySource>, RecorderError> {
        match &self.display {
            Some(display) => Ok(Arc::clone(display) as Arc<dyn DisplaySource>),
            None => Err(RecorderError::DeviceUnavailable("no display to record".into())),
        }
    }

    fn capability_source(&self) -> Option<Arc<dyn CapabilitySource>> {
        self.capabilities
            .as_ref()
            .map(|c| Arc::clone(c) as Arc<dyn CapabilitySource>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn microphone_plays_script_then_runs_dry() {
        let mut mic = MemoryAudioDevice::with_frames(vec![vec![1, 2, 3, 4], vec![5, 6]]);
        let probe = mic.probe();
        mic.open(PcmFormat::MIC).unwrap();
        mic.start().unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(mic.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);
        assert_eq!(mic.read(&mut buf).unwrap(), 2);
        assert_eq!(mic.read(&mut buf).unwrap(), 0);
        assert_eq!(probe.frames_remaining(), 0);

        mic.close();
        assert!(probe.is_closed());
    }

    #[test]
    fn passthrough_encoder_emits_format_first() {
        let encoder = PassthroughAudioEncoder::new();
        encoder.configure(&AudioEncoderConfig::aac(64 * 1024)).unwrap();
        encoder.start().unwrap();
        encoder.queue_input(&[9, 9], 100).unwrap();
        encoder.signal_end_of_input(200).unwrap();

        assert!(matches!(encoder.dequeue_output().unwrap(), EncoderOutput::FormatChanged(TrackFormat::Audio { .. })));
        let EncoderOutput::Sample(csd) = encoder.dequeue_output().unwrap() else {
            panic!("expected codec config");
        };
        assert!(csd.is_codec_config());
        let EncoderOutput::Sample(frame) = encoder.dequeue_output().unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(frame.data, vec![9, 9]);
        let EncoderOutput::Sample(eos) = encoder.dequeue_output().unwrap() else {
            panic!("expected end of stream");
        };
        assert!(eos.is_end_of_stream());
    }

    #[test]
    fn release_unblocks_dequeue() {
        let encoder = Arc::new(PassthroughAudioEncoder::new());
        let waiter = Arc::clone(&encoder);
        let handle = thread::spawn(move || waiter.dequeue_output());
        thread::sleep(Duration::from_millis(20));
        encoder.release();
        assert!(handle.join().unwrap().is_err());
    }

    #[test]
    fn synthetic_video_starts_with_key_frame() {
        let encoder = SyntheticVideoEncoder::new();
        encoder
            .configure(&VideoEncoderConfig {
                mime: VideoEncoderConfig::AVC_MIME.into(),
                resolution: Resolution::new(360, 640),
                bitrate: 2_000_000,
                frame_rate: 100,
                key_frame_interval_secs: 1,
                color_format: crate::models::media::ColorFormat::Surface,
            })
            .unwrap();
        encoder.create_input_surface().unwrap();
        encoder.start().unwrap();

        let EncoderOutput::FormatChanged(format) = encoder.dequeue_output().unwrap() else {
            panic!("expected format change");
        };
        assert_eq!(format.codec_config(), &SPS_PPS[..]);
        encoder.dequeue_output().unwrap();

        let EncoderOutput::Sample(first) = encoder.dequeue_output().unwrap() else {
            panic!("expected a frame");
        };
        let EncoderOutput::Sample(second) = encoder.dequeue_output().unwrap() else {
            panic!("expected a frame");
        };
        assert!(first.flags.key_frame);
        assert!(!second.flags.key_frame);
        assert!(second.pts_us > first.pts_us);

        encoder.signal_end_of_input_stream().unwrap();
        let EncoderOutput::Sample(eos) = encoder.dequeue_output().unwrap() else {
            panic!("expected end of stream");
        };
        assert!(eos.is_end_of_stream());
        assert_eq!(encoder.samples_emitted(), 2);
    }

    #[test]
    fn catalog_round_trip() {
        let catalog = MemoryCatalog::new();
        let id = catalog
            .register(Path::new("/tmp/a.wav"), "audio/wav", "a.wav")
            .unwrap();
        assert_eq!(catalog.entry(&id).unwrap().display_name, "a.wav");
        catalog.unregister(&id).unwrap();
        assert!(catalog.unregister(&id).is_err());
    }
}
