//! Codec engine backed by the `ffmpeg` executable.

use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, trace};

use super::command::tokio_command;
use super::progress::ProgressParser;
use crate::codec::FormatDescriptor;
use crate::config::FfmpegConfig;
use crate::engine::{CodecEngine, SourceMedia};
use crate::pipeline::ProgressReporter;
use crate::utils::fs::io_error;
use crate::{Error, Result};

/// Stderr lines kept for the failure message.
const STDERR_TAIL_LINES: usize = 8;

const INPUT_FILE: &str = "input";
const OUTPUT_FILE: &str = "output";

/// Encoders FFmpeg only enables with `-strict experimental`.
const EXPERIMENTAL_ENCODERS: [&str; 1] = ["opus"];

pub struct FfmpegEngine {
    config: FfmpegConfig,
    /// Primary encoder name to the alternate used in its place.
    encoder_overrides: HashMap<String, String>,
}

impl FfmpegEngine {
    pub fn new(config: FfmpegConfig) -> Self {
        Self {
            config,
            encoder_overrides: HashMap::new(),
        }
    }

    /// Substitute encoders, typically those registered by
    /// [`FfmpegProbe::encoder_overrides`](super::FfmpegProbe::encoder_overrides).
    pub fn with_encoder_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.encoder_overrides = overrides;
        self
    }

    fn encoder_for<'a>(&'a self, format: &'a FormatDescriptor) -> Option<&'a str> {
        let primary = format.audio_codec.as_deref()?;
        Some(
            self.encoder_overrides
                .get(primary)
                .map(String::as_str)
                .unwrap_or(primary),
        )
    }

    fn scratch_dir(&self) -> Result<tempfile::TempDir> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("multienc-");
            b
        };
        match &self.config.temp_dir {
            Some(dir) => builder
                .tempdir_in(dir)
                .map_err(|e| io_error("creating scratch directory", dir, e)),
            None => builder
                .tempdir()
                .map_err(|e| io_error("creating scratch directory", &std::env::temp_dir(), e)),
        }
    }
}

/// Command line for one encode.
pub fn build_args(
    input: &Path,
    output: &Path,
    format: &FormatDescriptor,
    encoder: Option<&str>,
    bitrate_bps: Option<u32>,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-hide_banner",
        "-nostats",
        "-loglevel",
        "info",
        "-progress",
        "pipe:1",
        "-y",
        "-i",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(input.as_os_str().to_owned());
    args.push("-vn".into());

    if let Some(encoder) = encoder {
        args.push("-c:a".into());
        args.push(encoder.into());
        if EXPERIMENTAL_ENCODERS.contains(&encoder) {
            args.push("-strict".into());
            args.push("experimental".into());
        }
    }
    if let Some(bps) = bitrate_bps {
        args.push("-b:a".into());
        args.push(bps.to_string().into());
    }

    args.push("-f".into());
    args.push(format.container.clone().into());
    args.push(output.as_os_str().to_owned());
    args
}

#[async_trait]
impl CodecEngine for FfmpegEngine {
    async fn encode(
        &self,
        source: &SourceMedia,
        format: &FormatDescriptor,
        bitrate_bps: Option<u32>,
        progress: &ProgressReporter,
    ) -> Result<Bytes> {
        // Removed on drop, including when the run is cancelled mid-encode.
        let scratch = self.scratch_dir()?;
        let input = scratch.path().join(INPUT_FILE);
        let output = scratch.path().join(OUTPUT_FILE);

        tokio::fs::write(&input, &source.bytes)
            .await
            .map_err(|e| io_error("writing encoder input", &input, e))?;

        let args = build_args(&input, &output, format, self.encoder_for(format), bitrate_bps);
        debug!(job_id = %progress.job_id(), ?args, "Spawning ffmpeg");

        let mut child = tokio_command(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::encode(format!("failed to spawn ffmpeg: {e}")))?;

        let duration_us = Arc::new(AtomicU64::new(0));

        let stderr_task = child.stderr.take().map(|stderr| {
            let duration_us = duration_us.clone();
            AbortOnDropHandle::new(tokio::spawn(async move {
                let mut parser = ProgressParser::new();
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    trace!("ffmpeg stderr: {}", line);
                    if let Some(us) = parser.feed_log_line(&line) {
                        duration_us.store(us, Ordering::Relaxed);
                    }
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                tail
            }))
        });

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let parser =
                    ProgressParser::with_duration_us(duration_us.load(Ordering::Relaxed));
                if let Some(fraction) = parser.feed_progress_line(&line) {
                    progress.report(fraction);
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::encode(format!("failed to wait for ffmpeg: {e}")))?;

        let tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => VecDeque::new(),
        };

        if !status.success() {
            let detail = tail
                .iter()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
                .unwrap_or_else(|| "no output".to_string());
            return Err(Error::encode(format!("ffmpeg exited with {status}: {detail}")));
        }

        let bytes = tokio::fs::read(&output)
            .await
            .map_err(|e| io_error("reading encoder output", &output, e))?;
        if bytes.is_empty() {
            return Err(Error::encode("ffmpeg produced an empty output"));
        }
        Ok(Bytes::from(bytes))
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_build_args_with_bitrate() {
        let format = FormatDescriptor::new("mp3").with_audio_codec("libmp3lame");
        let args = build_args(
            &PathBuf::from("/tmp/in"),
            &PathBuf::from("/tmp/out"),
            &format,
            Some("libmp3lame"),
            Some(128_000),
        );
        let args = strings(&args);

        assert_eq!(&args[..6], ["-hide_banner", "-nostats", "-loglevel", "info", "-progress", "pipe:1"]);
        assert!(args.windows(2).any(|w| w == ["-c:a", "libmp3lame"]));
        assert!(args.windows(2).any(|w| w == ["-b:a", "128000"]));
        assert!(args.windows(2).any(|w| w == ["-f", "mp3"]));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out"));
    }

    #[test]
    fn test_build_args_experimental_encoder() {
        let format = FormatDescriptor::new("webm").with_audio_codec("libopus");
        let args = strings(&build_args(
            &PathBuf::from("in"),
            &PathBuf::from("out"),
            &format,
            Some("opus"),
            None,
        ));
        assert!(args.windows(2).any(|w| w == ["-strict", "experimental"]));
        assert!(!args.iter().any(|a| a == "-b:a"));
    }

    #[test]
    fn test_encoder_override() {
        let mut overrides = HashMap::new();
        overrides.insert("libmp3lame".to_string(), "libshine".to_string());
        let engine = FfmpegEngine::new(FfmpegConfig::default()).with_encoder_overrides(overrides);

        let mp3 = FormatDescriptor::new("mp3").with_audio_codec("libmp3lame");
        let wav = FormatDescriptor::new("wav");
        assert_eq!(engine.encoder_for(&mp3), Some("libshine"));
        assert_eq!(engine.encoder_for(&wav), None);
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_encode_error() {
        let config = FfmpegConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg-multienc"),
            temp_dir: None,
        };
        let engine = FfmpegEngine::new(config);
        let source = SourceMedia::new(None, Bytes::from_static(b"RIFF"));
        let format = FormatDescriptor::new("mp3").with_audio_codec("libmp3lame");

        let err = engine
            .encode(&source, &format, Some(96_000), &ProgressReporter::noop("mp3-96".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Encode(_)));
    }
}
