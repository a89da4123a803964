use std::path::Path;
use std::sync::Arc;

use crate::models::error::RecorderError;
use crate::storage::mp4_writer::Mp4Writer;
use crate::traits::audio_device::AudioDevice;
use crate::traits::container::ContainerWriter;
use crate::traits::encoder::{AudioEncoderDevice, CapabilitySource, DisplaySource, VideoEncoderDevice};

/// Factory for the platform media objects a session needs.
///
/// Every call returns a fresh object; the controller owns it for the
/// lifetime of one session.
pub trait MediaBackend: Send + Sync {
    fn open_microphone(&self) -> Result<Box<dyn AudioDevice>, RecorderError>;

    fn create_audio_encoder(&self) -> Result<Arc<dyn AudioEncoderDevice>, RecorderError>;

    fn create_video_encoder(&self) -> Result<Arc<dyn VideoEncoderDevice>, RecorderError>;

    /// The screen to record. `DeviceUnavailable` when there is none.
    fn display_source(&self) -> Result<Arc<dyn DisplaySource>, RecorderError>;

    /// Encoder limits table, if the platform has one.
    fn capability_source(&self) -> Option<Arc<dyn CapabilitySource>> {
        None
    }

    fn create_container(&self, path: &Path) -> Box<dyn ContainerWriter> {
        Box::new(Mp4Writer::new(path))
    }
}
