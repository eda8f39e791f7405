use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{BlobStore, KvStore};
use crate::Result;
use crate::cache::{CacheRecord, SourceHash};
use crate::job::JobId;

/// Process-local blob store.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    records: RwLock<BTreeMap<(SourceHash, JobId), CacheRecord>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put_many(&self, records: Vec<CacheRecord>) -> Result<()> {
        let mut map = self.records.write();
        for record in records {
            map.insert((record.hash.clone(), record.job_id.clone()), record);
        }
        Ok(())
    }

    async fn get_by_hash(&self, hash: &SourceHash) -> Result<Vec<CacheRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|((h, _), _)| h == hash)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        self.records.write().clear();
        Ok(())
    }
}

/// Process-local string store.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;

    fn record(hash: &SourceHash, id: &str, bytes: &'static [u8]) -> CacheRecord {
        CacheRecord {
            hash: hash.clone(),
            job_id: JobId::from(id),
            name: format!("{id}.bin"),
            size: bytes.len() as u64,
            mime: "application/octet-stream".to_string(),
            label: id.to_string(),
            created_at: Utc::now(),
            bytes: Bytes::from_static(bytes),
        }
    }

    #[tokio::test]
    async fn test_blob_store_partitions_by_hash() {
        let store = MemoryBlobStore::new();
        let a = SourceHash::compute(b"a");
        let b = SourceHash::compute(b"b");

        store
            .put_many(vec![record(&a, "mp3-96", b"1"), record(&b, "mp3-96", b"2")])
            .await
            .unwrap();
        store.put_many(vec![record(&a, "mp3-96", b"3")]).await.unwrap();

        let got = store.get_by_hash(&a).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].bytes, Bytes::from_static(b"3"));
        assert_eq!(store.len(), 2);

        store.clear().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_kv_store() {
        let store = MemoryKvStore::new();
        store.set("k", "v".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.keys().await.unwrap(), vec!["k".to_string()]);
        store.remove("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }
}
