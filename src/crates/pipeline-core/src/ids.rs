//! Stable identity helpers: file ids (hash of path) and content checksums.

use sha2::{Digest, Sha256};

/// Stable identifier for a file, derived from its repository-relative
/// path so the same path always maps to the same id across runs.
pub fn file_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// SHA-256 checksum of file content, used to detect unchanged files and
/// to key graph-sink merges by `(checksum, filePath)`.
pub fn content_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_id_is_deterministic() {
        assert_eq!(file_id("src/lib.rs"), file_id("src/lib.rs"));
        assert_ne!(file_id("src/lib.rs"), file_id("src/main.rs"));
    }

    #[test]
    fn checksum_changes_with_content() {
        assert_ne!(content_checksum("a"), content_checksum("b"));
        assert_eq!(content_checksum("a"), content_checksum("a"));
    }
}
