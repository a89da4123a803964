use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::config::RecordingKind;

/// Opaque handle returned by `start`; later calls must present it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle {
    pub id: uuid::Uuid,
}

impl SessionHandle {
    pub(crate) fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
        }
    }
}

/// Result returned when a session is finalized successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingResult {
    pub handle: SessionHandle,
    pub kind: RecordingKind,
    pub file_path: PathBuf,
    pub mime_type: String,
    pub duration_secs: u64,
    pub size_bytes: u64,
    pub checksum: String,
    /// Catalog id, or `None` when registration failed (file kept on disk).
    pub catalog_id: Option<String>,
    pub created_at: String,
}

impl RecordingResult {
    /// Name shown by catalogs: the file name without directory.
    pub fn display_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
