//! Content fingerprints
//!
//! SHA256 digests used as cache keys (over declared structure) and as
//! remote-cache validators (over file contents).

use sha2::{Digest, Sha256};
use std::path::Path;

/// Fingerprint reported for dependencies that cannot be read.
pub const MISSING: &str = "0000";

/// Incremental fingerprint over a sequence of string parts.
#[derive(Clone, Default)]
pub struct Fingerprint {
    hasher: Sha256,
}

impl Fingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one part. Parts are length-prefixed so that `["ab", "c"]` and
    /// `["a", "bc"]` never collide.
    pub fn update(&mut self, part: impl AsRef<[u8]>) -> &mut Self {
        let part = part.as_ref();
        self.hasher.update((part.len() as u64).to_le_bytes());
        self.hasher.update(part);
        self
    }

    /// Hex digest of everything fed so far
    pub fn finish(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }
}

/// Hex SHA256 of raw bytes
pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Fingerprint of a file's contents, ignoring whitespace.
///
/// Whitespace-only edits (re-indentation, trailing newlines) keep the
/// fingerprint stable. Unreadable files yield [`MISSING`].
pub async fn file_fingerprint(path: &Path) -> String {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let compact: Vec<u8> = bytes
                .into_iter()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            digest(&compact)
        }
        Err(_) => MISSING.to_string(),
    }
}
