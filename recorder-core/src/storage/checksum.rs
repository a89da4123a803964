use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::models::error::RecorderError;

/// Hex-encoded SHA-256 of the file at `path`, streamed from disk.
pub fn sha256_file(path: &Path) -> Result<String, RecorderError> {
    let file = File::open(path).map_err(|e| RecorderError::io("failed to open file for checksum", e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher).map_err(|e| RecorderError::io("failed to read file for checksum", e))?;
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
