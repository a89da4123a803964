use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What is being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingKind {
    Sound,
    Screen,
}

impl RecordingKind {
    /// File name prefix, e.g. `ScreenRecord-…`.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Sound => "Sound",
            Self::Screen => "Screen",
        }
    }
}

/// Sound recording quality.
///
/// `Standard` goes through the compressed audio encoder and the muxer;
/// `High` captures raw PCM and wraps it into a WAV container on stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Standard,
    High,
}

/// Per-session start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub kind: RecordingKind,
    pub quality: Quality,
    /// Screen recordings only: add a microphone track.
    pub with_audio: bool,
}

impl StartRequest {
    pub fn sound(quality: Quality) -> Self {
        Self {
            kind: RecordingKind::Sound,
            quality,
            with_audio: true,
        }
    }

    pub fn screen(with_audio: bool) -> Self {
        Self {
            kind: RecordingKind::Screen,
            quality: Quality::Standard,
            with_audio,
        }
    }

    /// Whether the session opens the microphone.
    pub fn captures_audio(&self) -> bool {
        match self.kind {
            RecordingKind::Sound => true,
            RecordingKind::Screen => self.with_audio,
        }
    }

    /// Whether the session writes raw PCM and converts it to WAV.
    pub fn is_wave(&self) -> bool {
        self.kind == RecordingKind::Sound && self.quality == Quality::High
    }

    pub fn file_extension(&self) -> &'static str {
        match (self.kind, self.quality) {
            (RecordingKind::Screen, _) => "mp4",
            (RecordingKind::Sound, Quality::High) => "wav",
            (RecordingKind::Sound, Quality::Standard) => "m4a",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match (self.kind, self.quality) {
            (RecordingKind::Screen, _) => "video/mp4",
            (RecordingKind::Sound, Quality::High) => "audio/wav",
            (RecordingKind::Sound, Quality::Standard) => "audio/mp4a-latm",
        }
    }
}

/// Controller-wide tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// `start` is rejected when less than this many bytes are free (default: 100 MiB).
    pub min_free_space_bytes: u64,

    /// Elapsed-seconds tick period (default: 1000 ms).
    pub elapsed_tick: Duration,

    /// Amplitude sampling period (default: 350 ms).
    pub amplitude_tick: Duration,

    /// Bounded wait when joining capture/drain threads during teardown (default: 1 s).
    pub join_timeout: Duration,

    /// How long a drain thread waits for the other track to register (default: 10 s).
    pub barrier_timeout: Duration,

    /// Upper bound on the short side of the encoded video, if any.
    pub max_dimension: Option<u32>,

    /// AAC bitrate in bits per second (default: 64 KiB/s).
    pub audio_bitrate: u32,

    /// Encoder frame rate for screen capture (default: 30).
    pub video_frame_rate: u32,

    /// Seconds between video key frames (default: 3).
    pub key_frame_interval_secs: u32,

    /// Require the phone-state grant in addition to the microphone.
    pub require_phone_state: bool,
}

impl RecorderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.elapsed_tick.is_zero() || self.amplitude_tick.is_zero() {
            return Err("timer periods must be non-zero".into());
        }
        if self.join_timeout.is_zero() {
            return Err("join timeout must be non-zero".into());
        }
        if self.audio_bitrate == 0 {
            return Err("audio bitrate must be positive".into());
        }
        if self.video_frame_rate == 0 {
            return Err("video frame rate must be positive".into());
        }
        if self.max_dimension == Some(0) {
            return Err("max dimension must be positive when set".into());
        }
        Ok(())
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            min_free_space_bytes: 100 * 1024 * 1024,
            elapsed_tick: Duration::from_millis(1000),
            amplitude_tick: Duration::from_millis(350),
            join_timeout: Duration::from_secs(1),
            barrier_timeout: Duration::from_secs(10),
            max_dimension: None,
            audio_bitrate: 64 * 1024,
            video_frame_rate: 30,
            key_frame_interval_secs: 3,
            require_phone_state: false,
        }
    }
}
