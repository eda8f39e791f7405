//! Persisted shapes of cached outputs.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SourceHash;
use crate::job::JobId;
use crate::output::ResultItem;
use crate::{Error, Result};

/// One cached output of one job for one source.
///
/// The descriptive fields are persisted as JSON; `bytes` travels separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub hash: SourceHash,
    pub job_id: JobId,
    pub name: String,
    pub size: u64,
    pub mime: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub bytes: Bytes,
}

impl CacheRecord {
    pub fn from_item(hash: SourceHash, item: &ResultItem, bytes: Bytes) -> Self {
        Self {
            hash,
            job_id: item.id.clone(),
            name: item.name.clone(),
            size: bytes.len() as u64,
            mime: item.mime.clone(),
            label: item.label.clone(),
            created_at: Utc::now(),
            bytes,
        }
    }

    /// Store key, `<hash>:<job id>`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.hash, self.job_id)
    }

    /// Check that the bytes are all there.
    pub fn verify(&self) -> Result<()> {
        if self.bytes.len() as u64 != self.size {
            return Err(Error::corrupt(
                self.hash.as_str(),
                self.job_id.as_str(),
                format!("expected {} bytes, found {}", self.size, self.bytes.len()),
            ));
        }
        Ok(())
    }
}

/// Entry of the legacy whole-set tier: bytes inlined as base64 text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyItem {
    pub id: JobId,
    pub name: String,
    pub size: u64,
    pub mime: String,
    pub label: String,
    pub b64: String,
}

impl LegacyItem {
    pub fn from_record(record: &CacheRecord) -> Self {
        Self {
            id: record.job_id.clone(),
            name: record.name.clone(),
            size: record.bytes.len() as u64,
            mime: record.mime.clone(),
            label: record.label.clone(),
            b64: STANDARD.encode(&record.bytes),
        }
    }

    /// Decode into a record. The size is taken from the decoded bytes.
    pub fn into_record(self, hash: &SourceHash) -> Result<CacheRecord> {
        let bytes = Bytes::from(STANDARD.decode(self.b64.as_bytes())?);
        Ok(CacheRecord {
            hash: hash.clone(),
            job_id: self.id,
            name: self.name,
            size: bytes.len() as u64,
            mime: self.mime,
            label: self.label,
            created_at: Utc::now(),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(bytes: &'static [u8]) -> CacheRecord {
        CacheRecord {
            hash: SourceHash::compute(b"src"),
            job_id: JobId::from("mp3-96"),
            name: "src.mp3".to_string(),
            size: bytes.len() as u64,
            mime: "audio/mpeg".to_string(),
            label: "MP3 96 kbps".to_string(),
            created_at: Utc::now(),
            bytes: Bytes::from_static(bytes),
        }
    }

    #[test]
    fn test_key_and_verify() {
        let mut rec = record(b"frames");
        assert!(rec.key().ends_with(":mp3-96"));
        assert!(rec.verify().is_ok());

        rec.size = 99;
        assert!(matches!(rec.verify(), Err(Error::CorruptRecord { .. })));
    }

    #[test]
    fn test_legacy_item_decodes_bytes() {
        let rec = record(b"\x00\x01binary\xff");
        let item = LegacyItem::from_record(&rec);
        let back = item.into_record(&rec.hash).unwrap();
        assert_eq!(back.bytes, rec.bytes);
        assert_eq!(back.size, rec.size);
        assert_eq!(back.job_id, rec.job_id);
    }

    #[test]
    fn test_legacy_item_rejects_bad_base64() {
        let item = LegacyItem {
            id: JobId::from("opus-64"),
            name: "x.webm".to_string(),
            size: 3,
            mime: "audio/webm".to_string(),
            label: "Opus 64 kbps".to_string(),
            b64: "not base64!".to_string(),
        };
        let hash = SourceHash::compute(b"src");
        assert!(matches!(item.into_record(&hash), Err(Error::Base64(_))));
    }

    #[test]
    fn test_record_json_omits_bytes() {
        let json = serde_json::to_value(record(b"abc")).unwrap();
        assert!(json.get("bytes").is_none());
        assert_eq!(json["job_id"], "mp3-96");
    }
}
