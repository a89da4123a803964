use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::error::RecorderError;
use crate::models::media::{ColorFormat, VideoEncoderConfig};
use crate::pipeline::capture_loop::FaultHandler;
use crate::pipeline::drain;
use crate::pipeline::mux::MuxSynchronizer;
use crate::processing::negotiation::{self, VideoProfile};
use crate::traits::encoder::{CapabilitySource, DisplaySource, VideoEncoderDevice, VirtualDisplay};

/// Name given to the mirror display feeding the encoder surface.
const VIRTUAL_DISPLAY_NAME: &str = "Recording Display";

/// Encoder tuning that does not come from negotiation.
#[derive(Debug, Clone, Copy)]
pub struct VideoSettings {
    pub frame_rate: u32,
    pub key_frame_interval_secs: u32,
    pub max_dimension: Option<u32>,
}

/// Screen capture encoder: a virtual display renders into the encoder's
/// input surface and a drain thread moves access units into the mux.
///
/// There is no pause on this path; the surface keeps receiving frames.
pub struct VideoSurfaceEncoder {
    encoder: Arc<dyn VideoEncoderDevice>,
    display: Mutex<Option<Box<dyn VirtualDisplay>>>,
    profile: VideoProfile,
    stopped: AtomicBool,
    on_fault: Option<FaultHandler>,
}

impl VideoSurfaceEncoder {
    /// Negotiate, configure and start the encoder, then attach a virtual
    /// display to its surface.
    pub fn prepare(
        encoder: Arc<dyn VideoEncoderDevice>,
        display_source: &dyn DisplaySource,
        capabilities: Option<&dyn CapabilitySource>,
        settings: VideoSettings,
    ) -> Result<Self, RecorderError> {
        let native = display_source.native_resolution();
        let capability = negotiation::resolve_capability(capabilities);
        let profile = negotiation::negotiate_profile(native, capability, settings.max_dimension)?;

        let config = VideoEncoderConfig {
            mime: VideoEncoderConfig::AVC_MIME.into(),
            resolution: profile.resolution,
            bitrate: profile.bitrate,
            frame_rate: settings.frame_rate,
            key_frame_interval_secs: settings.key_frame_interval_secs,
            color_format: ColorFormat::Surface,
        };
        log::info!(
            "Video encoder: native {} -> {} @ {} bps, {} fps",
            native,
            profile.resolution,
            profile.bitrate,
            settings.frame_rate
        );

        let setup = || -> Result<Box<dyn VirtualDisplay>, RecorderError> {
            encoder.configure(&config)?;
            let surface = encoder.create_input_surface()?;
            encoder.start()?;
            display_source.create_virtual_display(VIRTUAL_DISPLAY_NAME, profile.resolution, surface)
        };
        let display = match setup() {
            Ok(display) => display,
            Err(e) => {
                encoder.release();
                return Err(e);
            }
        };

        Ok(Self {
            encoder,
            display: Mutex::new(Some(display)),
            profile,
            stopped: AtomicBool::new(false),
            on_fault: None,
        })
    }

    pub fn with_fault_handler(mut self, handler: FaultHandler) -> Self {
        self.on_fault = Some(handler);
        self
    }

    pub fn profile(&self) -> VideoProfile {
        self.profile
    }

    /// Spawn the drain thread and hand its handle to `mux`.
    pub fn start_drain(&self, mux: Arc<MuxSynchronizer>) -> Result<(), RecorderError> {
        let encoder = Arc::clone(&self.encoder);
        let release = Arc::clone(&self.encoder);
        drain::spawn_drain(
            "video-drain",
            mux,
            self.on_fault.clone(),
            move || encoder.dequeue_output(),
            move || release.release(),
        )
    }

    /// Signal end of stream and release the virtual display.
    ///
    /// Idempotent. The drain thread releases the encoder once it sees the
    /// end-of-stream sample.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.encoder.signal_end_of_input_stream() {
            log::warn!("Failed to signal video end of stream: {}", e);
        }
        if let Some(mut display) = self.display.lock().take() {
            display.release();
        }
        log::info!("Video encoder stopped");
    }

    /// Force-release the codec, unblocking a drain thread stuck in dequeue.
    pub fn release(&self) {
        self.stop();
        self.encoder.release();
    }
}

impl Drop for VideoSurfaceEncoder {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::memory::{MemoryDisplay, StaticCapabilities, SyntheticVideoEncoder};
    use crate::models::media::{EncoderCapability, Resolution};
    use crate::storage::mp4_writer::Mp4Writer;
    use std::time::Duration;

    const SETTINGS: VideoSettings = VideoSettings {
        frame_rate: 30,
        key_frame_interval_secs: 3,
        max_dimension: None,
    };

    #[test]
    fn prepare_configures_negotiated_profile() {
        let encoder = Arc::new(SyntheticVideoEncoder::new());
        let display = MemoryDisplay::new(Resolution::new(1440, 2560));
        let caps = StaticCapabilities::codec(EncoderCapability {
            max_width: 1920,
            max_height: 1080,
            max_bitrate: 8_000_000,
        });

        let video = VideoSurfaceEncoder::prepare(encoder.clone(), &display, Some(&caps as &dyn CapabilitySource), SETTINGS).unwrap();
        assert_eq!(video.profile().resolution, Resolution::new(1080, 1920));

        let config = encoder.configured().unwrap();
        assert_eq!(config.mime, "video/avc");
        assert_eq!(config.bitrate, 8_000_000);
        assert_eq!(config.frame_rate, 30);
        assert_eq!(config.key_frame_interval_secs, 3);
        assert_eq!(config.color_format, ColorFormat::Surface);
        assert_eq!(display.created(), vec![Resolution::new(1080, 1920)]);
    }

    #[test]
    fn stop_is_idempotent_and_releases_display() {
        let encoder = Arc::new(SyntheticVideoEncoder::new());
        let display = MemoryDisplay::new(Resolution::new(720, 1280));
        let video = VideoSurfaceEncoder::prepare(encoder.clone(), &display, None, SETTINGS).unwrap();

        video.stop();
        video.stop();
        assert_eq!(display.released_count(), 1);
        assert!(encoder.end_of_stream_signalled());
    }

    #[test]
    fn zero_sized_display_fails_negotiation() {
        let encoder = Arc::new(SyntheticVideoEncoder::new());
        let display = MemoryDisplay::new(Resolution::new(0, 0));
        let err = VideoSurfaceEncoder::prepare(encoder.clone(), &display, None, SETTINGS)
            .err()
            .unwrap();
        assert!(matches!(err, RecorderError::FormatNegotiationFailed(_)));
        assert!(encoder.configured().is_none());
    }

    #[test]
    fn drain_writes_avc_samples_to_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ScreenRecord.mp4");
        let mux = Arc::new(MuxSynchronizer::new(Box::new(Mp4Writer::new(&path)), 1, Duration::from_secs(1)));

        let encoder = Arc::new(SyntheticVideoEncoder::new());
        let display = MemoryDisplay::new(Resolution::new(720, 1280));
        let video = VideoSurfaceEncoder::prepare(encoder.clone(), &display, None, SETTINGS).unwrap();
        video.start_drain(Arc::clone(&mux)).unwrap();

        let mut tries = 0;
        while encoder.samples_emitted() < 5 && tries < 400 {
            std::thread::sleep(Duration::from_millis(5));
            tries += 1;
        }
        video.stop();
        let out = mux.finish(Duration::from_secs(2)).unwrap();
        assert_eq!(out, path);
        assert!(encoder.is_released());

        let data = std::fs::read(&path).unwrap();
        assert!(data.windows(4).any(|w| w == b"avcC"));
    }
}
