//! Produced outputs and the handles that reference their bytes.
//!
//! A [`ResultItem`] never owns its bytes. It carries an [`OutputHandle`] minted
//! by a [`HandleRegistry`]; whoever owns the item is responsible for revoking
//! the handle once the item is superseded.

use std::fmt;
use std::path::Path;

use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::JobId;

/// Fallback file stem when the source has no usable name.
pub const DEFAULT_OUTPUT_STEM: &str = "output";

/// Reference to bytes held by a [`HandleRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputHandle(Uuid);

impl fmt::Display for OutputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blob:{}", self.0)
    }
}

/// A produced (or cache-materialized) output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultItem {
    pub id: JobId,
    pub name: String,
    pub size: u64,
    pub handle: OutputHandle,
    pub mime: String,
    pub label: String,
}

/// Registry of live output buffers.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    buffers: DashMap<OutputHandle, Bytes>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register bytes and return a fresh handle to them.
    pub fn mint(&self, bytes: Bytes) -> OutputHandle {
        let handle = OutputHandle(Uuid::new_v4());
        self.buffers.insert(handle, bytes);
        handle
    }

    /// Bytes behind a handle, if it is still live.
    pub fn resolve(&self, handle: &OutputHandle) -> Option<Bytes> {
        self.buffers.get(handle).map(|entry| entry.value().clone())
    }

    /// Release a handle. Revoking an unknown handle is a no-op.
    pub fn revoke(&self, handle: &OutputHandle) -> bool {
        self.buffers.remove(handle).is_some()
    }

    /// Release the handles of every item.
    pub fn revoke_all<'a>(&self, items: impl IntoIterator<Item = &'a ResultItem>) {
        for item in items {
            self.revoke(&item.handle);
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

/// Output file name: the source stem with the job's extension.
pub fn output_name(source_name: Option<&str>, ext: &str) -> String {
    let stem = source_name
        .and_then(|name| Path::new(name).file_stem())
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or(DEFAULT_OUTPUT_STEM);
    format!("{stem}.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_resolve_revoke() {
        let registry = HandleRegistry::new();
        let handle = registry.mint(Bytes::from_static(b"abc"));

        assert_eq!(registry.resolve(&handle), Some(Bytes::from_static(b"abc")));
        assert!(registry.revoke(&handle));
        assert!(registry.resolve(&handle).is_none());
        assert!(!registry.revoke(&handle));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_handles_are_distinct_for_same_bytes() {
        let registry = HandleRegistry::new();
        let a = registry.mint(Bytes::from_static(b"x"));
        let b = registry.mint(Bytes::from_static(b"x"));
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert!(a.to_string().starts_with("blob:"));
    }

    #[test]
    fn test_output_name() {
        assert_eq!(output_name(Some("song.flac"), "mp3"), "song.mp3");
        assert_eq!(output_name(Some("/music/live.set.wav"), "webm"), "live.set.webm");
        assert_eq!(output_name(Some(""), "wav"), "output.wav");
        assert_eq!(output_name(None, "wav"), "output.wav");
    }
}
