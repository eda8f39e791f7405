//! Content-addressed result cache.
//!
//! Results are partitioned by the SHA-256 of the source bytes. Lookups walk a
//! chain of [`CacheTier`]s (binary blob records first, then the legacy base64
//! key-value tier) and the first tier holding anything for the hash wins.
//! Every persistence failure is logged and degraded to a miss or a no-op.

mod hash;
mod record;
pub mod store;
mod tier;

pub use hash::{SourceHash, hash_source};
pub use record::{CacheRecord, LegacyItem};
pub use tier::{BlobTier, CacheTier, LEGACY_KEY_PREFIX, LegacyTier, legacy_key};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::job::JobId;
use crate::output::{HandleRegistry, ResultItem};
use store::{BlobStore, FsBlobStore, FsKvStore, KvStore, MemoryBlobStore, MemoryKvStore};

/// Key of the most-recent-run marker in the key-value store.
pub const LAST_RUN_KEY: &str = "lastResultsHash";

/// Blob store directory under a cache root.
const BLOB_DIR: &str = "blobs";
/// Key-value document under a cache root.
const KV_FILE: &str = "state.json";

pub struct ContentCache {
    tiers: Vec<Box<dyn CacheTier>>,
    kv: Arc<dyn KvStore>,
}

impl ContentCache {
    /// Blob tier backed by `blob`, legacy tier and run marker backed by `kv`.
    pub fn new(blob: Arc<dyn BlobStore>, kv: Arc<dyn KvStore>) -> Self {
        Self::with_legacy_tier(blob, kv, true)
    }

    pub fn with_legacy_tier(blob: Arc<dyn BlobStore>, kv: Arc<dyn KvStore>, legacy: bool) -> Self {
        let mut tiers: Vec<Box<dyn CacheTier>> = vec![Box::new(BlobTier::new(blob))];
        if legacy {
            tiers.push(Box::new(LegacyTier::new(kv.clone())));
        }
        Self { tiers, kv }
    }

    /// Process-local cache that forgets everything on exit.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBlobStore::new()), Arc::new(MemoryKvStore::new()))
    }

    /// File-backed cache rooted at `dir`.
    pub fn open(dir: &Path, legacy: bool) -> Self {
        info!(dir = %dir.display(), legacy, "Opening result cache");
        Self::with_legacy_tier(
            Arc::new(FsBlobStore::new(dir.join(BLOB_DIR))),
            Arc::new(FsKvStore::new(dir.join(KV_FILE))),
            legacy,
        )
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        match &config.dir {
            Some(dir) => Self::open(dir, config.legacy_tier),
            None => Self::with_legacy_tier(
                Arc::new(MemoryBlobStore::new()),
                Arc::new(MemoryKvStore::new()),
                config.legacy_tier,
            ),
        }
    }

    /// Names of the active tiers, highest priority first.
    pub fn tier_names(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|t| t.name()).collect()
    }

    /// Cached records for `hash` from the first tier that has any.
    pub async fn lookup(&self, hash: &SourceHash) -> Vec<CacheRecord> {
        for tier in &self.tiers {
            match tier.load(hash).await {
                Ok(records) if !records.is_empty() => {
                    debug!(
                        tier = tier.name(),
                        hash = hash.short(),
                        records = records.len(),
                        "Cache hit"
                    );
                    return records;
                }
                Ok(_) => {}
                Err(e) => warn!(tier = tier.name(), hash = hash.short(), error = %e, "Cache lookup failed"),
            }
        }
        debug!(hash = hash.short(), "Cache miss");
        Vec::new()
    }

    /// Mint a handle for every intact record.
    ///
    /// Records whose bytes do not match their recorded size are skipped.
    pub fn materialize(
        &self,
        records: &[CacheRecord],
        handles: &HandleRegistry,
    ) -> BTreeMap<JobId, ResultItem> {
        let mut items = BTreeMap::new();
        for record in records {
            if let Err(e) = record.verify() {
                warn!(error = %e, "Skipping corrupt cache record");
                continue;
            }
            let item = ResultItem {
                id: record.job_id.clone(),
                name: record.name.clone(),
                size: record.size,
                handle: handles.mint(record.bytes.clone()),
                mime: record.mime.clone(),
                label: record.label.clone(),
            };
            if let Some(previous) = items.insert(item.id.clone(), item) {
                handles.revoke(&previous.handle);
            }
        }
        items
    }

    /// Persist `items` under `hash` in every tier and mark `hash` as the most
    /// recent run.
    pub async fn write_back(
        &self,
        hash: &SourceHash,
        items: &[ResultItem],
        handles: &HandleRegistry,
    ) {
        let records: Vec<CacheRecord> = items
            .iter()
            .filter_map(|item| match handles.resolve(&item.handle) {
                Some(bytes) => Some(CacheRecord::from_item(hash.clone(), item, bytes)),
                None => {
                    warn!(job_id = %item.id, "Result handle already released; not caching");
                    None
                }
            })
            .collect();

        if records.is_empty() {
            return;
        }

        for tier in &self.tiers {
            match tier.store(hash, &records).await {
                Ok(()) => debug!(tier = tier.name(), hash = hash.short(), records = records.len(), "Cache written"),
                Err(e) => warn!(tier = tier.name(), hash = hash.short(), error = %e, "Cache write failed"),
            }
        }

        self.mark_last_run(hash).await;
    }

    /// Record `hash` as the most recent run.
    pub async fn mark_last_run(&self, hash: &SourceHash) {
        if let Err(e) = self.kv.set(LAST_RUN_KEY, hash.to_string()).await {
            warn!(error = %e, "Failed to record most recent run");
        }
    }

    /// Hash of the most recent run that wrote results, if any.
    pub async fn last_run(&self) -> Option<SourceHash> {
        match self.kv.get(LAST_RUN_KEY).await {
            Ok(Some(raw)) => SourceHash::parse(raw.trim()),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read most recent run");
                None
            }
        }
    }

    /// Empty every tier and forget the most recent run.
    pub async fn clear(&self) {
        for tier in &self.tiers {
            if let Err(e) = tier.clear().await {
                warn!(tier = tier.name(), error = %e, "Failed to clear cache tier");
            }
        }
        if let Err(e) = self.kv.remove(LAST_RUN_KEY).await {
            warn!(error = %e, "Failed to remove most recent run marker");
        }
        info!("Result cache cleared");
    }
}
