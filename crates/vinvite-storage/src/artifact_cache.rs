//! Versioned, content-addressed artifact cache.
//!
//! Two tiers:
//! - metadata (`{version, timestamp}`) in the small key-value store under
//!   `cache-metadata:{content_id}`
//! - the artifact itself, gzip-compressed, in the blob store under the
//!   content ID
//!
//! A load is a hit only when the metadata exists with the current version
//! AND the blob is present. Every operation is best-effort: failures are
//! logged and swallowed so the cache can never break the pipeline.

use std::io::{Read, Write};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vinvite_models::{ContentId, ImageDataUrl};

use crate::blob::BlobStore;
use crate::error::{StorageError, StorageResult};
use crate::kv::{KvStore, KvStoreExt};

/// Current cache version. Bumping it invalidates every stored entry.
pub const ARTIFACT_CACHE_VERSION: &str = "artifact-v3";

const METADATA_PREFIX: &str = "cache-metadata:";

const CACHE_HITS_TOTAL: &str = "vinvite_artifact_cache_hits_total";
const CACHE_MISSES_TOTAL: &str = "vinvite_artifact_cache_misses_total";

/// Metadata stored next to each blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

/// Key under which metadata for `id` is stored.
pub fn metadata_key(id: &ContentId) -> String {
    format!("{}{}", METADATA_PREFIX, id)
}

fn compress(artifact: &ImageDataUrl) -> StorageResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(artifact.as_str().as_bytes())
        .map_err(|e| StorageError::Serialization(format!("Failed to gzip artifact: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| StorageError::Serialization(format!("Failed to finish gzip encoding: {}", e)))
}

fn decompress(data: &[u8]) -> Option<ImageDataUrl> {
    let mut decoder = GzDecoder::new(data);
    let mut raw = String::new();
    if let Err(e) = decoder.read_to_string(&mut raw) {
        warn!(error = %e, "Failed to decompress cached artifact");
        return None;
    }
    match ImageDataUrl::parse(raw) {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(error = %e, "Cached artifact is not a valid data URL");
            None
        }
    }
}

/// Artifact cache shared by every pipeline run of a session.
#[derive(Clone)]
pub struct ArtifactCache {
    metadata: Arc<dyn KvStore>,
    blobs: Option<Arc<dyn BlobStore>>,
    version: String,
}

impl ArtifactCache {
    /// Create a cache over the given stores.
    ///
    /// Passing `None` for `blobs` models a host without blob storage; the
    /// cache then misses on every load.
    pub fn new(metadata: Arc<dyn KvStore>, blobs: Option<Arc<dyn BlobStore>>) -> Self {
        Self {
            metadata,
            blobs,
            version: ARTIFACT_CACHE_VERSION.to_string(),
        }
    }

    /// Override the version tag (used when upgrading the artifact format).
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn is_available(&self) -> bool {
        self.blobs.is_some()
    }

    /// Store an artifact. Failures are logged, never returned.
    pub async fn save(&self, id: &ContentId, artifact: &ImageDataUrl) {
        if let Err(e) = self.try_save(id, artifact).await {
            warn!(content_id = %id, error = %e, "Failed to save artifact to cache");
        }
    }

    async fn try_save(&self, id: &ContentId, artifact: &ImageDataUrl) -> StorageResult<()> {
        let blobs = self
            .blobs
            .as_ref()
            .ok_or_else(|| StorageError::unavailable("no blob store"))?;

        let compressed = compress(artifact)?;
        let size = compressed.len();

        // Blob first: metadata must never point at a missing blob
        blobs.put(id.as_str(), compressed).await?;
        self.metadata.set_json(
            &metadata_key(id),
            &CacheMetadata {
                version: self.version.clone(),
                timestamp: Utc::now(),
            },
        )?;

        debug!(content_id = %id, compressed_size = size, "Saved artifact to cache");
        Ok(())
    }

    /// Load an artifact. Any problem is a miss.
    pub async fn load(&self, id: &ContentId) -> Option<ImageDataUrl> {
        let result = self.try_load(id).await;
        match &result {
            Some(_) => {
                counter!(CACHE_HITS_TOTAL).increment(1);
                debug!(content_id = %id, "Artifact cache hit");
            }
            None => {
                counter!(CACHE_MISSES_TOTAL).increment(1);
                debug!(content_id = %id, "Artifact cache miss");
            }
        }
        result
    }

    async fn try_load(&self, id: &ContentId) -> Option<ImageDataUrl> {
        let blobs = self.blobs.as_ref()?;

        let meta: CacheMetadata = match self.metadata.get_json(&metadata_key(id)) {
            Ok(Some(meta)) => meta,
            Ok(None) => return None,
            Err(e) => {
                warn!(content_id = %id, error = %e, "Failed to read cache metadata");
                return None;
            }
        };

        if meta.version != self.version {
            debug!(
                content_id = %id,
                cached_version = %meta.version,
                current_version = %self.version,
                "Artifact cache version mismatch, treating as miss"
            );
            return None;
        }

        match blobs.get(id.as_str()).await {
            Ok(Some(data)) => decompress(&data),
            Ok(None) => None,
            Err(e) => {
                warn!(content_id = %id, error = %e, "Failed to read cached artifact");
                None
            }
        }
    }

    /// Drop an entry. Failures are logged, never returned.
    pub async fn invalidate(&self, id: &ContentId) {
        if let Err(e) = self.metadata.remove(&metadata_key(id)) {
            warn!(content_id = %id, error = %e, "Failed to remove cache metadata");
        }
        if let Some(blobs) = &self.blobs {
            if let Err(e) = blobs.delete(id.as_str()).await {
                warn!(content_id = %id, error = %e, "Failed to delete cached artifact");
            }
        }
    }
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("version", &self.version)
            .field("blobs", &self.blobs.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::kv::MemoryKvStore;

    fn stores() -> (Arc<MemoryKvStore>, Arc<MemoryBlobStore>) {
        (Arc::new(MemoryKvStore::new()), Arc::new(MemoryBlobStore::new()))
    }

    fn artifact() -> ImageDataUrl {
        ImageDataUrl::from_png(&[137, 80, 78, 71, 1, 2, 3, 4, 5])
    }

    #[tokio::test]
    async fn test_save_then_load_is_bit_identical() {
        let (kv, blobs) = stores();
        let cache = ArtifactCache::new(kv, Some(blobs as Arc<dyn BlobStore>));
        let id = ContentId::for_bytes(b"photo");

        assert!(cache.load(&id).await.is_none());
        cache.save(&id, &artifact()).await;

        let loaded = cache.load(&id).await.expect("should hit");
        assert_eq!(loaded.as_str(), artifact().as_str());
    }

    #[tokio::test]
    async fn test_version_change_misses() {
        let (kv, blobs) = stores();
        let id = ContentId::for_bytes(b"photo");

        let old = ArtifactCache::new(kv.clone(), Some(blobs.clone() as Arc<dyn BlobStore>))
            .with_version("artifact-v1");
        old.save(&id, &artifact()).await;
        assert!(old.load(&id).await.is_some());

        // Blob and metadata are still present, but under the old version
        let new = ArtifactCache::new(kv.clone(), Some(blobs.clone() as Arc<dyn BlobStore>))
            .with_version("artifact-v2");
        assert!(new.load(&id).await.is_none());
        assert_eq!(blobs.len(), 1);
        assert!(kv.get(&metadata_key(&id)).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_blob_misses() {
        let (kv, blobs) = stores();
        let cache = ArtifactCache::new(kv, Some(blobs.clone() as Arc<dyn BlobStore>));
        let id = ContentId::for_bytes(b"photo");

        cache.save(&id, &artifact()).await;
        blobs.delete(id.as_str()).await.unwrap();
        assert!(cache.load(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_missing_metadata_misses() {
        let (kv, blobs) = stores();
        let cache = ArtifactCache::new(kv.clone(), Some(blobs as Arc<dyn BlobStore>));
        let id = ContentId::for_bytes(b"photo");

        cache.save(&id, &artifact()).await;
        kv.remove(&metadata_key(&id)).unwrap();
        assert!(cache.load(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_without_blob_store_always_misses() {
        let kv = Arc::new(MemoryKvStore::new());
        let cache = ArtifactCache::new(kv, None);
        let id = ContentId::for_bytes(b"photo");

        cache.save(&id, &artifact()).await;
        assert!(cache.load(&id).await.is_none());
        assert!(!cache.is_available());
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let kv = Arc::new(MemoryKvStore::unavailable());
        let blobs = Arc::new(MemoryBlobStore::unavailable());
        let cache = ArtifactCache::new(kv, Some(blobs as Arc<dyn BlobStore>));
        let id = ContentId::for_bytes(b"photo");

        cache.save(&id, &artifact()).await;
        assert!(cache.load(&id).await.is_none());
        cache.invalidate(&id).await;
    }

    #[tokio::test]
    async fn test_invalidate() {
        let (kv, blobs) = stores();
        let cache = ArtifactCache::new(kv, Some(blobs.clone() as Arc<dyn BlobStore>));
        let id = ContentId::for_bytes(b"photo");

        cache.save(&id, &artifact()).await;
        cache.invalidate(&id).await;
        assert!(cache.load(&id).await.is_none());
        assert!(blobs.is_empty());
    }

    #[test]
    fn test_corrupt_blob_is_miss() {
        assert!(decompress(b"not gzip").is_none());
    }
}
