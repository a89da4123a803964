use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::models::config::RecordingKind;

/// `<Kind>Record-YYYY-MM-DD-HH-mm-ss.<ext>`
pub fn recording_file_name(kind: RecordingKind, extension: &str, at: NaiveDateTime) -> String {
    format!("{}Record-{}.{}", kind.prefix(), at.format("%Y-%m-%d-%H-%M-%S"), extension)
}

/// First free path for a recording started at `at`. Two sessions in the
/// same second get `-1`, `-2`, ... before the extension.
pub fn unique_recording_path(dir: &Path, kind: RecordingKind, extension: &str, at: NaiveDateTime) -> PathBuf {
    let candidate = dir.join(recording_file_name(kind, extension, at));
    if !candidate.exists() {
        return candidate;
    }

    let stem = format!("{}Record-{}", kind.prefix(), at.format("%Y-%m-%d-%H-%M-%S"));
    (1u32..)
        .map(|n| dir.join(format!("{}-{}.{}", stem, n, extension)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
