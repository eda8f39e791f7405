//! Engine-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Engine-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Engine-wide error type.
///
/// Only [`Error::Encode`] and [`Error::Panicked`] ever reach a caller as a
/// per-job failure message; store and probe errors are logged and degraded by
/// the cache and compiler layers.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Encode failed: {0}")]
    Encode(String),

    #[error("Execution unit panicked: {0}")]
    Panicked(String),

    #[error("Capability probe failed for '{key}': {reason}")]
    Probe { key: String, reason: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Corrupt cache record {job_id} for {hash}: {reason}")]
    CorruptRecord {
        hash: String,
        job_id: String,
        reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn probe(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Probe {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn corrupt(
        hash: impl Into<String>,
        job_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::CorruptRecord {
            hash: hash.into(),
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Message shown to the caller for a failed job.
    pub fn job_message(&self) -> String {
        match self {
            Self::Encode(msg) => msg.clone(),
            Self::Panicked(msg) => format!("execution unit crashed: {msg}"),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_message_strips_prefix_for_encode_errors() {
        let err = Error::encode("unsupported sample rate");
        assert_eq!(err.job_message(), "unsupported sample rate");
        assert_eq!(err.to_string(), "Encode failed: unsupported sample rate");
    }

    #[test]
    fn test_io_path_display() {
        let err = Error::io_path(
            "reading record",
            Path::new("/tmp/cache/abc.json"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert_eq!(
            err.to_string(),
            "IO error while reading record /tmp/cache/abc.json: missing"
        );
    }
}
