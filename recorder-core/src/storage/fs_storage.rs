use std::fs;
use std::path::{Path, PathBuf};

use crate::models::config::RecordingKind;
use crate::models::error::RecorderError;
use crate::traits::collaborators::StorageProvider;

/// Recordings under a root directory, one subdirectory per kind.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn directory_for(&self, kind: RecordingKind) -> PathBuf {
        self.root.join(format!("{}Records", kind.prefix()))
    }
}

impl StorageProvider for FsStorage {
    fn recordings_directory(&self, kind: RecordingKind) -> Result<PathBuf, RecorderError> {
        let dir = self.directory_for(kind);
        fs::create_dir_all(&dir).map_err(|e| RecorderError::io("failed to create recordings directory", e))?;
        Ok(dir)
    }

    fn available_space(&self, kind: RecordingKind) -> Option<u64> {
        let dir = self.directory_for(kind);
        let existing = dir.ancestors().find(|p| p.exists())?;
        free_bytes(existing)
    }
}

#[cfg(unix)]
fn free_bytes(path: &Path) -> Option<u64> {
    match nix::sys::statvfs::statvfs(path) {
        Ok(stat) => Some(stat.blocks_available() as u64 * stat.fragment_size() as u64),
        Err(e) => {
            log::warn!("statvfs({}) failed: {}", path.display(), e);
            None
        }
    }
}

#[cfg(not(unix))]
fn free_bytes(_path: &Path) -> Option<u64> {
    None
}
