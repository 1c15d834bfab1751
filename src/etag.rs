//! Entity tags derived from modification time and size.

use std::fs::Metadata;
use std::time::{SystemTime, UNIX_EPOCH};

/// Builds the strong ETag `"<mtime-ms>-<size>"` for a file or directory.
pub fn etag_from_metadata(metadata: &Metadata) -> String {
    let millis = metadata.modified().ok().map(unix_millis).unwrap_or(0);
    format!("\"{}-{}\"", millis, metadata.len())
}

/// Milliseconds since the Unix epoch, 0 for pre-epoch timestamps.
pub fn unix_millis(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}
