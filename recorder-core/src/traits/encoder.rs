use crate::models::error::RecorderError;
use crate::models::media::{
    AudioEncoderConfig, EncoderCapability, EncoderOutput, InputSurface, Resolution,
    VideoEncoderConfig,
};

/// Compressed audio encoder.
///
/// Input and output sides are used from different threads (the capture
/// thread queues PCM, the drain thread dequeues access units), so methods
/// take `&self` and implementations synchronize internally.
pub trait AudioEncoderDevice: Send + Sync {
    fn configure(&self, config: &AudioEncoderConfig) -> Result<(), RecorderError>;

    fn start(&self) -> Result<(), RecorderError>;

    /// Queue one PCM frame stamped with a monotonic capture time.
    fn queue_input(&self, pcm: &[u8], pts_us: i64) -> Result<(), RecorderError>;

    /// Queue the end-of-stream marker. No input may follow.
    fn signal_end_of_input(&self, pts_us: i64) -> Result<(), RecorderError>;

    /// Block until the next output event. There is no timeout: the call
    /// returns once the encoder produces output, reaches end of stream, or
    /// is released.
    fn dequeue_output(&self) -> Result<EncoderOutput, RecorderError>;

    /// Stop and release the codec. Idempotent.
    fn release(&self);
}

/// Video encoder that exposes an input surface.
pub trait VideoEncoderDevice: Send + Sync {
    fn configure(&self, config: &VideoEncoderConfig) -> Result<(), RecorderError>;

    /// Create the drawable surface. Must be called after `configure` and before `start`.
    fn create_input_surface(&self) -> Result<InputSurface, RecorderError>;

    fn start(&self) -> Result<(), RecorderError>;

    /// Block until the next output event (see `AudioEncoderDevice::dequeue_output`).
    fn dequeue_output(&self) -> Result<EncoderOutput, RecorderError>;

    /// Ask the encoder to flush and emit an end-of-stream sample.
    fn signal_end_of_input_stream(&self) -> Result<(), RecorderError>;

    /// Stop and release the codec. Idempotent.
    fn release(&self);
}

/// A mirror of on-screen content rendering into an encoder surface.
pub trait VirtualDisplay: Send {
    fn release(&mut self);
}

/// Source of on-screen content.
pub trait DisplaySource: Send + Sync {
    /// Real size of the default display, in its current orientation.
    fn native_resolution(&self) -> Resolution;

    fn create_virtual_display(
        &self,
        name: &str,
        resolution: Resolution,
        surface: InputSurface,
    ) -> Result<Box<dyn VirtualDisplay>, RecorderError>;
}

/// Device encoder limits, read from a platform capability table.
pub trait CapabilitySource: Send + Sync {
    /// Limits declared for `mime` (e.g. `video/avc`), if the table has exactly one entry.
    fn encoder_capability(&self, mime: &str) -> Option<EncoderCapability>;

    /// Limits of the best default camcorder-style profile, if any.
    fn default_profile(&self) -> Option<EncoderCapability>;
}
