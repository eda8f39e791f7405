//! Cache tiers, consulted in priority order.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::store::{BlobStore, KvStore};
use super::{CacheRecord, LegacyItem, SourceHash};
use crate::{Error, Result};
use crate::job::JobId;

/// Key prefix of legacy cache partitions.
pub const LEGACY_KEY_PREFIX: &str = "cachedResults:";

/// Legacy key of the partition for `hash`.
pub fn legacy_key(hash: &SourceHash) -> String {
    format!("{LEGACY_KEY_PREFIX}{hash}")
}

/// One layer of the result cache.
#[async_trait]
pub trait CacheTier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Every complete record stored for `hash`.
    async fn load(&self, hash: &SourceHash) -> Result<Vec<CacheRecord>>;

    async fn store(&self, hash: &SourceHash, records: &[CacheRecord]) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Primary tier: binary records, one per job.
pub struct BlobTier {
    store: Arc<dyn BlobStore>,
}

impl BlobTier {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CacheTier for BlobTier {
    fn name(&self) -> &'static str {
        "blob"
    }

    async fn load(&self, hash: &SourceHash) -> Result<Vec<CacheRecord>> {
        self.store.get_by_hash(hash).await
    }

    async fn store(&self, _hash: &SourceHash, records: &[CacheRecord]) -> Result<()> {
        self.store.put_many(records.to_vec()).await
    }

    async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }
}

/// Fallback tier: the whole result set of a source as one JSON string with
/// base64 payloads.
pub struct LegacyTier {
    store: Arc<dyn KvStore>,
}

impl LegacyTier {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    async fn load_items(&self, hash: &SourceHash) -> Result<Vec<LegacyItem>> {
        match self.store.get(&legacy_key(hash)).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl CacheTier for LegacyTier {
    fn name(&self) -> &'static str {
        "legacy"
    }

    async fn load(&self, hash: &SourceHash) -> Result<Vec<CacheRecord>> {
        let mut records = Vec::new();
        for item in self.load_items(hash).await? {
            let id = item.id.clone();
            match item.into_record(hash) {
                Ok(record) => records.push(record),
                Err(e) => warn!(hash = hash.short(), job_id = %id, error = %e, "Skipping undecodable legacy item"),
            }
        }
        Ok(records)
    }

    /// Merges with the stored set by job id, so a narrower run keeps entries
    /// written by an earlier, wider one.
    async fn store(&self, hash: &SourceHash, records: &[CacheRecord]) -> Result<()> {
        let existing = match self.load_items(hash).await {
            Ok(items) => items,
            Err(e) => {
                debug!(hash = hash.short(), error = %e, "Replacing unreadable legacy partition");
                Vec::new()
            }
        };

        let mut merged: BTreeMap<JobId, LegacyItem> =
            existing.into_iter().map(|i| (i.id.clone(), i)).collect();
        for record in records {
            merged.insert(record.job_id.clone(), LegacyItem::from_record(record));
        }

        let items: Vec<&LegacyItem> = merged.values().collect();
        self.store
            .set(&legacy_key(hash), serde_json::to_string(&items)?)
            .await
    }

    /// Removes every partition it can; one failed key does not stop the rest.
    async fn clear(&self) -> Result<()> {
        let mut failed = 0usize;
        for key in self.store.keys().await? {
            if !key.starts_with(LEGACY_KEY_PREFIX) {
                continue;
            }
            if let Err(e) = self.store.remove(&key).await {
                warn!(key = %key, error = %e, "Failed to remove legacy partition");
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(Error::store(format!(
                "{failed} legacy partition(s) could not be removed"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::{MemoryBlobStore, MemoryKvStore, MockKvStore};
    use bytes::Bytes;
    use chrono::Utc;

    fn record(hash: &SourceHash, id: &str, bytes: &'static [u8]) -> CacheRecord {
        CacheRecord {
            hash: hash.clone(),
            job_id: JobId::from(id),
            name: format!("src.{id}"),
            size: bytes.len() as u64,
            mime: "audio/mpeg".to_string(),
            label: id.to_string(),
            created_at: Utc::now(),
            bytes: Bytes::from_static(bytes),
        }
    }

    #[tokio::test]
    async fn test_blob_tier_delegates() {
        let tier = BlobTier::new(Arc::new(MemoryBlobStore::new()));
        let hash = SourceHash::compute(b"x");
        tier.store(&hash, &[record(&hash, "mp3-96", b"abc")]).await.unwrap();
        assert_eq!(tier.load(&hash).await.unwrap().len(), 1);
        tier.clear().await.unwrap();
        assert!(tier.load(&hash).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_legacy_tier_merges_by_id() {
        let kv = Arc::new(MemoryKvStore::new());
        let tier = LegacyTier::new(kv.clone());
        let hash = SourceHash::compute(b"x");

        tier.store(
            &hash,
            &[record(&hash, "mp3-96", b"old"), record(&hash, "mp3-128", b"keep")],
        )
        .await
        .unwrap();
        tier.store(&hash, &[record(&hash, "mp3-96", b"new")]).await.unwrap();

        let loaded = tier.load(&hash).await.unwrap();
        let by_id: BTreeMap<_, _> = loaded
            .iter()
            .map(|r| (r.job_id.as_str().to_string(), r.bytes.clone()))
            .collect();
        assert_eq!(by_id.len(), 2);
        assert_eq!(by_id["mp3-96"], Bytes::from_static(b"new"));
        assert_eq!(by_id["mp3-128"], Bytes::from_static(b"keep"));

        let raw = kv.get(&legacy_key(&hash)).await.unwrap().unwrap();
        assert!(raw.contains("\"b64\""));
    }

    #[tokio::test]
    async fn test_legacy_clear_only_removes_partitions() {
        let kv = Arc::new(MemoryKvStore::new());
        let tier = LegacyTier::new(kv.clone());
        let hash = SourceHash::compute(b"x");

        tier.store(&hash, &[record(&hash, "mp3-96", b"a")]).await.unwrap();
        kv.set("unrelated", "1".to_string()).await.unwrap();

        tier.clear().await.unwrap();
        assert_eq!(kv.keys().await.unwrap(), vec!["unrelated".to_string()]);
    }

    #[tokio::test]
    async fn test_legacy_clear_continues_past_failed_removal() {
        let mut kv = MockKvStore::new();
        kv.expect_keys().returning(|| {
            Ok(vec![
                "cachedResults:aaa".to_string(),
                "cachedResults:bbb".to_string(),
                "lastResultsHash".to_string(),
            ])
        });
        kv.expect_remove()
            .withf(|key| key == "cachedResults:aaa")
            .times(1)
            .returning(|_| Err(Error::store("quota exceeded")));
        kv.expect_remove()
            .withf(|key| key == "cachedResults:bbb")
            .times(1)
            .returning(|_| Ok(()));

        let err = LegacyTier::new(Arc::new(kv)).clear().await.unwrap_err();
        assert!(err.to_string().contains("1 legacy partition(s)"));
    }

    #[tokio::test]
    async fn test_legacy_skips_bad_items() {
        let kv = Arc::new(MemoryKvStore::new());
        let hash = SourceHash::compute(b"x");
        let raw = r#"[
            {"id":"mp3-96","name":"a.mp3","size":3,"mime":"audio/mpeg","label":"MP3 96 kbps","b64":"YWJj"},
            {"id":"mp3-128","name":"a.mp3","size":3,"mime":"audio/mpeg","label":"MP3 128 kbps","b64":"%%%"}
        ]"#;
        kv.set(&legacy_key(&hash), raw.to_string()).await.unwrap();

        let loaded = LegacyTier::new(kv).load(&hash).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].bytes, Bytes::from_static(b"abc"));
    }
}
