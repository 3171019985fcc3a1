//! Utility functions for minidfs

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// Percent-encoding set for chunk file names (includes /, %, and control chars)
const NAME_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'\\')
    .add(b'%')
    .add(b' ')
    .add(b'?')
    .add(b'#')
    .add(b'&')
    .add(b':');

/// Maximum id length accepted for files, chunks and workers
pub const MAX_ID_LEN: usize = 512;

/// Encode an id so it is safe to use as a single file name
pub fn encode_name(id: &str) -> String {
    utf8_percent_encode(id, NAME_ENCODE_SET).to_string()
}

/// Reject empty, oversized, or path-like ids
pub fn validate_id(kind: &str, id: &str) -> crate::Result<()> {
    if id.is_empty() {
        return Err(crate::Error::InvalidRecord(format!("{} is empty", kind)));
    }
    if id.len() > MAX_ID_LEN {
        return Err(crate::Error::InvalidRecord(format!(
            "{} longer than {} bytes",
            kind, MAX_ID_LEN
        )));
    }
    if id == "." || id == ".." {
        return Err(crate::Error::InvalidRecord(format!("{} '{}' is reserved", kind, id)));
    }
    Ok(())
}

/// Compute BLAKE3 hash of data, return hex string
pub fn blake3_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Get current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
