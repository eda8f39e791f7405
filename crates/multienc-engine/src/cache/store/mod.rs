//! Persistence backends for the cache tiers.

mod fs;
mod memory;

pub use fs::{FsBlobStore, FsKvStore};
pub use memory::{MemoryBlobStore, MemoryKvStore};

use async_trait::async_trait;

use super::{CacheRecord, SourceHash};
use crate::Result;

/// Binary record store indexed by source hash.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Insert or replace records, keyed by `(hash, job id)`.
    async fn put_many(&self, records: Vec<CacheRecord>) -> Result<()>;

    /// Every complete record stored under `hash`.
    async fn get_by_hash(&self, hash: &SourceHash) -> Result<Vec<CacheRecord>>;

    async fn clear(&self) -> Result<()>;
}

/// String key-value store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn keys(&self) -> Result<Vec<String>>;
}
