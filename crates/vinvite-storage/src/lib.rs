//! Local persistence for the invite generator.
//!
//! This crate provides:
//! - A small synchronous key-value store (JSON file or in-memory)
//! - A larger asynchronous blob store (directory or in-memory)
//! - The versioned, content-addressed artifact cache
//! - The rolling-window rate-limit accountant
//! - The form cache used to restore input after a restart

pub mod artifact_cache;
pub mod blob;
pub mod error;
pub mod form_cache;
pub mod kv;
pub mod rate_limit;

pub use artifact_cache::{ArtifactCache, CacheMetadata, ARTIFACT_CACHE_VERSION};
pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use error::{StorageError, StorageResult};
pub use form_cache::{FormCache, FORM_CACHE_KEY};
pub use kv::{JsonFileKvStore, KvStore, KvStoreExt, MemoryKvStore};
pub use rate_limit::{RateLimiter, RATE_LIMIT_KEY};
