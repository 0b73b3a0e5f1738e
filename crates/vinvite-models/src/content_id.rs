//! Content identifiers used as cache keys.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::photo::Photo;

/// Number of hex characters kept from the digest.
const CONTENT_ID_LEN: usize = 16;

/// Short, stable identifier of a photo's content.
///
/// Derived from a SHA-256 digest of the photo bytes, truncated to 64 bits.
/// A collision between two photos yields a stale cache hit, never a corrupt
/// artifact, because cache entries are also keyed by version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    /// Derive the identifier for a photo.
    pub fn for_photo(photo: &Photo) -> Self {
        Self::for_bytes(photo.bytes())
    }

    /// Derive the identifier for raw content.
    pub fn for_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut id = format!("{:x}", digest);
        id.truncate(CONTENT_ID_LEN);
        Self(id)
    }

    /// Wrap an existing identifier (e.g. read back from storage).
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let a = ContentId::for_bytes(b"same photo");
        let b = ContentId::for_bytes(b"same photo");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), CONTENT_ID_LEN);
    }

    #[test]
    fn test_distinct_content() {
        assert_ne!(ContentId::for_bytes(b"one"), ContentId::for_bytes(b"two"));
    }

    #[test]
    fn test_hex_only() {
        let id = ContentId::for_bytes(b"abc");
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
