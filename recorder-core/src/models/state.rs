use super::error::RecorderError;
use super::recording_result::RecordingResult;

/// Controller state as seen by observers.
///
/// State transitions:
/// ```text
/// ready → recording ↔ paused
///             ↓         ↓
///          finalizing → completed / failed → ready
///             (discard) → discarded → ready
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Ready,
    Recording,
    Paused,
    Finalizing,
    Completed(Box<RecordingResult>),
    Failed(RecorderError),
    Discarded,
}

impl SessionStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    /// Recording or paused: a session holds devices and threads.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Recording | Self::Paused)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_) | Self::Discarded)
    }
}

/// Audio capture loop state machine.
///
/// ```text
/// idle → recording ↔ paused → stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureLoopState {
    Idle,
    Recording,
    Paused,
    Stopped,
}

/// Mux synchronizer state machine.
///
/// ```text
/// empty → tracks_pending → started → stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxState {
    Empty,
    TracksPending,
    Started,
    Stopped,
}
