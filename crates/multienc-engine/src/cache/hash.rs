use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

/// Lowercase hex SHA-256 of a source file. The only cache partition key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceHash(String);

impl SourceHash {
    /// Hash `bytes` on the current thread.
    pub fn compute(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap an already computed digest, e.g. one read back from a store.
    ///
    /// Returns `None` unless `hex` is 64 lowercase hex characters.
    pub fn parse(hex: &str) -> Option<Self> {
        let valid = hex.len() == 64
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(hex.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First characters of the digest, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for SourceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash source bytes on the blocking pool so large inputs do not stall the
/// async reactor.
pub async fn hash_source(bytes: Bytes) -> SourceHash {
    let fallback = bytes.clone();
    match tokio::task::spawn_blocking(move || SourceHash::compute(&bytes)).await {
        Ok(hash) => hash,
        Err(e) => {
            warn!(error = %e, "Hash offload task failed; hashing inline");
            SourceHash::compute(&fallback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        let hash = SourceHash::compute(b"abc");
        assert_eq!(
            hash.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash.short(), "ba7816bf8f01");
    }

    #[test]
    fn test_parse() {
        let hash = SourceHash::compute(b"abc");
        assert_eq!(SourceHash::parse(hash.as_str()), Some(hash));
        assert!(SourceHash::parse("ABC").is_none());
        assert!(SourceHash::parse(&"g".repeat(64)).is_none());
    }

    #[tokio::test]
    async fn test_hash_source_matches_inline() {
        let bytes = Bytes::from(vec![7u8; 1 << 16]);
        assert_eq!(hash_source(bytes.clone()).await, SourceHash::compute(&bytes));
    }
}
