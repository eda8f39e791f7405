//! FFmpeg-backed codec engine and capability probe.

mod command;
mod engine;
mod probe;
mod progress;

pub use command::{NoWindowExt, tokio_command};
pub use engine::{FfmpegEngine, build_args};
pub use probe::{FfmpegProbe, parse_encoder_list};
pub use progress::{ProgressParser, parse_timestamp_us};
