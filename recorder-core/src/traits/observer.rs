use crate::models::recording_result::RecordingResult;
use crate::models::state::SessionStatus;

/// Progress and status notifications.
///
/// Called from timer threads, drain threads and the caller thread; never
/// while the controller holds its session lock. Delivery is best-effort and
/// implementations should marshal to a UI thread if needed.
pub trait RecorderObserver: Send + Sync {
    /// Called when the session status changes.
    fn on_status_changed(&self, status: &SessionStatus);

    /// Called once per elapsed-time tick with whole recorded seconds.
    fn on_elapsed_time(&self, seconds: u64);

    /// Called periodically with the current input level (0..=32767).
    fn on_amplitude(&self, level: u32);

    /// Called after a recording is finalized and registered.
    fn on_recording_finished(&self, _result: &RecordingResult) {}
}
