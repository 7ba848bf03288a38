use std::path::Path;

/// MD5 of zero bytes. The remote store reports the same value for empty objects.
pub const EMPTY_FINGERPRINT: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// Content fingerprint of a local file, or `None` when it cannot be read.
///
/// MD5 matches the checksum the remote store publishes, so local and remote
/// fingerprints compare directly.
pub async fn fingerprint(path: &Path) -> Option<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(fingerprint_bytes(&bytes)),
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %path.display(), error = %err, "file is unreadable, treating as absent");
            }
            None
        }
    }
}

pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

pub fn is_empty_fingerprint(fingerprint: &str) -> bool {
    fingerprint.eq_ignore_ascii_case(EMPTY_FINGERPRINT)
}
