//! File-backed stores.
//!
//! Blob layout: `<root>/<hash>/<job id>.bin` holds the bytes and
//! `<root>/<hash>/<job id>.json` the descriptive fields. The JSON is written
//! last, so a record without one was never completed and is skipped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{BlobStore, KvStore};
use crate::cache::{CacheRecord, SourceHash};
use crate::utils::fs::{
    ensure_dir_all, io_error, read_optional, remove_dir_all_if_exists, write_atomic,
};
use crate::{Error, Result};

const BYTES_EXT: &str = "bin";
const META_EXT: &str = "json";

/// Blob store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, hash: &SourceHash) -> PathBuf {
        self.root.join(hash.as_str())
    }

    async fn read_record(&self, meta_path: &Path) -> Result<Option<CacheRecord>> {
        let Some(meta) = read_optional(meta_path).await? else {
            return Ok(None);
        };
        let mut record: CacheRecord = serde_json::from_slice(&meta)?;

        let bytes_path = meta_path.with_extension(BYTES_EXT);
        let Some(bytes) = read_optional(&bytes_path).await? else {
            return Err(Error::corrupt(
                record.hash.as_str(),
                record.job_id.as_str(),
                "bytes file missing",
            ));
        };
        record.bytes = Bytes::from(bytes);
        record.verify()?;
        Ok(Some(record))
    }
}

/// Job ids become file names; anything that could escape the partition is
/// rejected.
fn checked_file_stem(record: &CacheRecord) -> Result<&str> {
    let id = record.job_id.as_str();
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(id)
    } else {
        Err(Error::store(format!("job id '{id}' is not a valid file name")))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put_many(&self, records: Vec<CacheRecord>) -> Result<()> {
        for record in records {
            let stem = checked_file_stem(&record)?;
            let dir = self.partition_dir(&record.hash);
            ensure_dir_all(&dir).await?;

            let bytes_path = dir.join(format!("{stem}.{BYTES_EXT}"));
            let meta_path = dir.join(format!("{stem}.{META_EXT}"));

            write_atomic(&bytes_path, &record.bytes).await?;
            write_atomic(&meta_path, &serde_json::to_vec_pretty(&record)?).await?;
            debug!(key = %record.key(), size = record.size, "Stored cache record");
        }
        Ok(())
    }

    async fn get_by_hash(&self, hash: &SourceHash) -> Result<Vec<CacheRecord>> {
        let dir = self.partition_dir(hash);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("listing cache partition", &dir, e)),
        };

        let mut meta_paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("listing cache partition", &dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(META_EXT) {
                meta_paths.push(path);
            }
        }
        meta_paths.sort();

        let mut records = Vec::with_capacity(meta_paths.len());
        for path in meta_paths {
            match self.read_record(&path).await {
                Ok(Some(record)) if &record.hash == hash => records.push(record),
                Ok(Some(record)) => {
                    warn!(path = %path.display(), found = %record.hash, "Skipping misplaced cache record");
                }
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable cache record"),
            }
        }
        Ok(records)
    }

    async fn clear(&self) -> Result<()> {
        remove_dir_all_if_exists(&self.root).await
    }
}

/// Key-value store persisted as a single JSON object.
///
/// The document is loaded on first use and rewritten atomically after every
/// mutation.
#[derive(Debug)]
pub struct FsKvStore {
    path: PathBuf,
    entries: Mutex<Option<BTreeMap<String, String>>>,
}

impl FsKvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>> {
        match read_optional(&self.path).await? {
            Some(raw) if !raw.is_empty() => Ok(serde_json::from_slice(&raw)?),
            _ => Ok(BTreeMap::new()),
        }
    }

    /// Run `f` against the loaded entries, persisting when it reports a change.
    async fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> (T, bool),
    ) -> Result<T> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        let Some(entries) = guard.as_mut() else {
            return Err(Error::store("key-value document not loaded"));
        };

        let (out, changed) = f(entries);
        if changed {
            write_atomic(&self.path, &serde_json::to_vec_pretty(entries)?).await?;
        }
        Ok(out)
    }
}

#[async_trait]
impl KvStore for FsKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_entries(|entries| (entries.get(key).cloned(), false))
            .await
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.with_entries(|entries| {
            let changed = entries.get(key) != Some(&value);
            entries.insert(key.to_string(), value);
            ((), changed)
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.with_entries(|entries| ((), entries.remove(key).is_some()))
            .await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.with_entries(|entries| (entries.keys().cloned().collect(), false))
            .await
    }
}
