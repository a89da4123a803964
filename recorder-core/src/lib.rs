//! # recorder-core
//!
//! Platform-agnostic screen and sound recording core.
//!
//! Captures microphone PCM, encodes audio and screen content, and writes
//! WAV or MP4 files. Platform backends implement the capability traits
//! (`AudioDevice`, `AudioEncoderDevice`, `VideoEncoderDevice`,
//! `DisplaySource`) and plug into `RecordingSessionController`.
//!
//! ## Architecture
//!
//! ```text
//! recorder-core (this crate)
//! ├── traits/       ← AudioDevice, encoders, ContainerWriter, MediaBackend, collaborators, RecorderObserver
//! ├── models/       ← RecorderError, SessionStatus, RecorderConfig, StartRequest, media types
//! ├── processing/   ← WAV header + WaveContainerWriter, resolution negotiation, levels
//! ├── pipeline/     ← PauseGate, AudioCaptureLoop, AudioEncodeLoop, VideoSurfaceEncoder, MuxSynchronizer
//! ├── session/      ← RecordingSessionController, timers, observer registry
//! ├── storage/      ← RawFileSink, Mp4Writer, file naming, FsStorage, checksum
//! └── devices/      ← in-memory variants of every capability trait
//! ```

pub mod devices;
pub mod models;
pub mod pipeline;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::config::{Quality, RecorderConfig, RecordingKind, StartRequest};
pub use models::error::RecorderError;
pub use models::media::{Capability, EncodedSample, EncoderCapability, EncoderOutput, PcmFormat, Resolution, TrackFormat};
pub use models::recording_result::{RecordingResult, SessionHandle};
pub use models::state::{CaptureLoopState, MuxState, SessionStatus};
pub use pipeline::audio_encode::AudioEncodeLoop;
pub use pipeline::capture_loop::{AudioCaptureLoop, PcmSink};
pub use pipeline::mux::MuxSynchronizer;
pub use pipeline::video_encoder::{VideoSettings, VideoSurfaceEncoder};
pub use processing::negotiation::{negotiate_profile, VideoProfile};
pub use processing::wave_writer::WaveContainerWriter;
pub use session::controller::{Collaborators, RecordingSessionController};
pub use session::observers::SubscriptionId;
pub use storage::fs_storage::FsStorage;
pub use storage::mp4_writer::Mp4Writer;
pub use traits::audio_device::AudioDevice;
pub use traits::backend::MediaBackend;
pub use traits::collaborators::{CatalogRegistrar, PermissionProvider, StorageProvider};
pub use traits::container::ContainerWriter;
pub use traits::encoder::{AudioEncoderDevice, CapabilitySource, DisplaySource, VideoEncoderDevice, VirtualDisplay};
pub use traits::observer::RecorderObserver;
