//! Decompression of archived backup objects.
//!
//! Firehose backups are usually gzip-compressed, but the bucket may also hold
//! plain-text objects. Both decode to the same text.

use flate2::read::GzDecoder;
use std::io::Read;
use tracing::{debug, warn};

/// Decode an archived blob to text, falling back to plain text when the blob
/// is not a valid gzip stream. Surrounding whitespace is trimmed.
pub fn decompress(blob: &[u8]) -> String {
    debug!(size_bytes = blob.len(), "Attempting gzip decompression");

    match gunzip(blob) {
        Ok(buf) => String::from_utf8_lossy(&buf).trim().to_string(),
        Err(e) => {
            warn!(error = %e, "Failed to decompress using gzip, falling back to plain text");
            String::from_utf8_lossy(blob).trim().to_string()
        }
    }
}

fn gunzip(blob: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(blob);
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}
