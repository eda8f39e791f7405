//! Codec engine trait and the source media it consumes.

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;
use crate::codec::FormatDescriptor;
use crate::pipeline::ProgressReporter;

/// The input file of a run.
#[derive(Debug, Clone)]
pub struct SourceMedia {
    /// Original file name, used to derive output names.
    pub name: Option<String>,
    /// Raw bytes. Cloning is cheap.
    pub bytes: Bytes,
}

impl SourceMedia {
    pub fn new(name: Option<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name,
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Opaque encoder invoked once per job.
#[async_trait]
pub trait CodecEngine: Send + Sync {
    /// Encode `source` into `format`, optionally at `bitrate_bps`.
    ///
    /// Implementations may call `progress.report(fraction)` any number of
    /// times while encoding.
    ///
    /// # Cancel Safety
    ///
    /// The scheduler drops this future when a run is cancelled. Implementations
    /// must not leave external work running once the future is dropped (child
    /// processes should be killed on drop, temp files removed).
    async fn encode(
        &self,
        source: &SourceMedia,
        format: &FormatDescriptor,
        bitrate_bps: Option<u32>,
        progress: &ProgressReporter,
    ) -> Result<Bytes>;

    /// Engine name for logs.
    fn name(&self) -> &'static str;
}
