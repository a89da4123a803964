use std::path::Path;

use crate::models::error::RecorderError;
use crate::models::media::{EncodedSample, TrackFormat};

/// Container file writer (e.g. MP4).
///
/// Call order: `add_track`* → `start` → `write_sample`* → `stop`.
/// `MuxSynchronizer` enforces the order and serializes access; an
/// implementation may assume a single caller at a time.
pub trait ContainerWriter: Send {
    /// Declare a track. Returns the stable track index.
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, RecorderError>;

    /// Start the container. No track may be added afterwards.
    fn start(&mut self) -> Result<(), RecorderError>;

    /// Append one access unit to `track`.
    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> Result<(), RecorderError>;

    /// Write trailing metadata and close the file. Fails if no sample was written.
    fn stop(&mut self) -> Result<(), RecorderError>;

    /// Output file path.
    fn path(&self) -> &Path;
}
