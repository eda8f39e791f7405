//! Multi-target media encoding: job compilation, a content-addressed result
//! cache, a bounded worker pool and the coordinator that ties them together.

pub mod cache;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod probe;
pub mod utils;

pub use cache::{ContentCache, SourceHash, hash_source};
pub use codec::{
    BITRATES_KBPS, CodecOption, FormatDescriptor, SupportMap, default_catalog,
    needs_bitrate_but_none_selected, selected_codec_options, unsupported_codecs,
};
pub use config::{CacheConfig, EngineConfig, FfmpegConfig};
pub use coordinator::{RunCoordinator, RunEvent, RunReport, RunState};
pub use engine::{CodecEngine, SourceMedia};
pub use error::{Error, Result};
pub use job::{Job, JobId, compile_jobs};
pub use output::{HandleRegistry, OutputHandle, ResultItem};
pub use pipeline::{JobEvent, ProgressReporter, RunOutcome, WorkerPool, WorkerPoolConfig};
pub use probe::{CapabilityProbe, probe_support};
