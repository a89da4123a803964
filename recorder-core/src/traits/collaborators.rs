use std::path::{Path, PathBuf};

use crate::models::config::RecordingKind;
use crate::models::error::RecorderError;
use crate::models::media::Capability;

/// Permission query.
pub trait PermissionProvider: Send + Sync {
    fn has_permission(&self, capability: Capability) -> bool;
}

/// Where recordings go and how much room is left there.
pub trait StorageProvider: Send + Sync {
    /// Directory for `kind` recordings, created on demand.
    fn recordings_directory(&self, kind: RecordingKind) -> Result<PathBuf, RecorderError>;

    /// Free bytes on the volume holding `kind` recordings, or `None` if unknown.
    ///
    /// Must not create anything on disk.
    fn available_space(&self, kind: RecordingKind) -> Option<u64>;
}

/// System media catalog.
pub trait CatalogRegistrar: Send + Sync {
    /// Register a finalized file. Called once per file.
    fn register(&self, path: &Path, mime_type: &str, display_name: &str) -> Result<String, RecorderError>;

    /// Remove a previously registered entry.
    fn unregister(&self, catalog_id: &str) -> Result<(), RecorderError>;
}
