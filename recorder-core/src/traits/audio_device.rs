use crate::models::error::RecorderError;
use crate::models::media::PcmFormat;

/// Microphone capture handle.
///
/// Implemented by:
/// - `WasapiMicDevice` (Windows, in `recorder-windows`)
/// - `MemoryAudioDevice` (scripted frames, in `devices::memory`)
///
/// The capture loop calls `read` from its own thread and `stop`/`start`
/// from the caller thread while the read side is parked, so an
/// implementation never sees the two concurrently.
pub trait AudioDevice: Send {
    /// Open the device at `format`. Fails with `DeviceUnavailable` when the
    /// device is busy or the grant was revoked.
    fn open(&mut self, format: PcmFormat) -> Result<(), RecorderError>;

    /// Smallest read buffer, in bytes, the device accepts for `format`.
    fn min_buffer_size(&self, format: PcmFormat) -> usize;

    /// Begin delivering audio. Also used to resume after `stop`.
    fn start(&mut self) -> Result<(), RecorderError>;

    /// Stop delivering audio without releasing the handle.
    fn stop(&mut self) -> Result<(), RecorderError>;

    /// Read interleaved little-endian PCM into `buf`, returning the byte count.
    ///
    /// Blocks for at most roughly one device buffer. `Ok(0)` means no data
    /// was available yet.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, RecorderError>;

    /// Release the device. Called once, after the capture thread has exited.
    fn close(&mut self);
}
