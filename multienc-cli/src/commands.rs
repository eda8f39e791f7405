use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use multienc_engine::ffmpeg::{FfmpegEngine, FfmpegProbe};
use multienc_engine::{
    ContentCache, ResultItem, RunCoordinator, RunReport, SourceMedia, SupportMap, WorkerPoolConfig,
    compile_jobs, needs_bitrate_but_none_selected, probe_support, selected_codec_options,
    unsupported_codecs,
};
use indicatif::HumanBytes;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::progress::{ProgressDisplay, spawn_display};

/// How long to wait for the progress display to drain after a run.
const DISPLAY_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct RunArgs {
    pub input: PathBuf,
    pub codecs: Vec<String>,
    pub bitrates: Vec<u32>,
    pub concurrency: Option<usize>,
    pub out_dir: Option<PathBuf>,
    pub no_probe: bool,
    pub output: OutputFormat,
}

#[derive(Debug, Serialize)]
struct WrittenOutput {
    id: String,
    label: String,
    mime: String,
    size: u64,
    path: PathBuf,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    hash: Option<String>,
    outputs: Vec<WrittenOutput>,
    errors: Vec<(String, String)>,
    cache_hits: usize,
    scheduled: usize,
    cancelled: bool,
}

pub struct CommandExecutor {
    config: AppConfig,
    quiet: bool,
}

impl CommandExecutor {
    pub fn new(config: AppConfig, quiet: bool) -> Self {
        Self { config, quiet }
    }

    fn coordinator(&self, probe: Option<&FfmpegProbe>, concurrency: Option<usize>) -> RunCoordinator {
        let engine_config = &self.config.engine;
        let mut engine = FfmpegEngine::new(engine_config.ffmpeg.clone());
        if let Some(probe) = probe {
            engine = engine.with_encoder_overrides(probe.encoder_overrides());
        }
        RunCoordinator::with_pool_config(
            Arc::new(engine),
            ContentCache::from_config(&engine_config.cache),
            WorkerPoolConfig::new(concurrency.unwrap_or(engine_config.concurrency)),
        )
    }

    async fn probe(&self) -> (FfmpegProbe, SupportMap) {
        let probe = FfmpegProbe::new(&self.config.engine.ffmpeg.ffmpeg_path);
        let support = probe_support(&probe, &self.config.engine.catalog).await;
        (probe, support)
    }

    pub async fn run(&self, args: RunArgs) -> Result<()> {
        let engine_config = &self.config.engine;

        let codecs = if args.codecs.is_empty() {
            engine_config.selected_codecs.clone()
        } else {
            args.codecs
        };
        if let Some(unknown) = codecs.iter().find(|key| engine_config.codec(key).is_none()) {
            let known: Vec<&str> = engine_config.catalog.iter().map(|c| c.key.as_str()).collect();
            return Err(AppError::InvalidInput(format!(
                "unknown codec '{unknown}' (available: {})",
                known.join(", ")
            )));
        }
        let bitrates = if args.bitrates.is_empty() {
            engine_config.selected_bitrates.clone()
        } else {
            args.bitrates
        };

        let options = selected_codec_options(&engine_config.catalog, &codecs);
        if needs_bitrate_but_none_selected(&options, &bitrates) {
            warn!("A bitrate codec is selected but no bitrate is; it will produce nothing");
        }

        let (probe, support) = if args.no_probe {
            (None, None)
        } else {
            let (probe, support) = self.probe().await;
            (Some(probe), Some(support))
        };
        for codec in unsupported_codecs(&options, support.as_ref()) {
            warn!(codec = %codec.key, "Encoder unavailable; skipping {}", codec.label);
        }

        let jobs = compile_jobs(&options, &bitrates, support.as_ref());
        if jobs.is_empty() {
            return Err(AppError::InvalidInput("nothing to encode for this selection".to_string()));
        }

        let bytes = tokio::fs::read(&args.input).await?;
        let name = args
            .input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        let source = SourceMedia::new(name, bytes);
        info!(input = %args.input.display(), size = source.len(), jobs = jobs.len(), "Encoding");

        let coordinator = Arc::new(self.coordinator(probe.as_ref(), args.concurrency));
        let display = Arc::new(ProgressDisplay::new(
            &jobs,
            self.quiet || args.output == OutputFormat::Json,
        ));
        let display_task = spawn_display(
            display.clone(),
            coordinator.generation() + 1,
            coordinator.subscribe(),
        );

        let interrupt = tokio::spawn({
            let coordinator = coordinator.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted; keeping finished outputs");
                    coordinator.cancel();
                }
            }
        });

        let report = coordinator.run(source, jobs).await;
        interrupt.abort();
        if tokio::time::timeout(DISPLAY_DRAIN_TIMEOUT, display_task).await.is_err() {
            debug!("Progress display did not drain in time");
        }
        display.finish();

        let out_dir = self.config.out_dir(args.out_dir);
        let outputs = write_outputs(&coordinator, &report.results, &out_dir).await?;
        print_summary(&report, outputs, args.output)
    }

    pub async fn resume(&self, out_dir: Option<PathBuf>) -> Result<()> {
        let coordinator = self.coordinator(None, None);
        let restored = coordinator.resume_last_run().await;
        if restored.is_empty() {
            println!("No cached results to resume");
            return Ok(());
        }

        let out_dir = self.config.out_dir(out_dir);
        for output in write_outputs(&coordinator, &restored, &out_dir).await? {
            println!("{}", output_line(&output));
        }
        Ok(())
    }

    pub async fn clear_cache(&self) -> Result<()> {
        self.coordinator(None, None).clear_cache().await;
        println!("Cache cleared");
        Ok(())
    }

    pub async fn codecs(&self, probe: bool) -> Result<()> {
        let support = if probe { Some(self.probe().await.1) } else { None };

        for codec in &self.config.engine.catalog {
            let kind = if codec.uses_bitrate {
                "bitrate"
            } else if codec.pass_through {
                "pass-through"
            } else {
                "lossless"
            };
            let status = match (&support, &codec.probe_key) {
                (Some(map), Some(key)) => match map.get(key) {
                    Some(true) => "supported",
                    _ => "unsupported",
                },
                (Some(_), None) => "supported",
                (None, _) => "",
            };
            println!(
                "{:<8} {:<10} .{:<6} {:<13} {}",
                codec.key, codec.label, codec.ext, kind, status
            );
        }
        let bitrates: Vec<String> = self
            .config
            .engine
            .bitrates_kbps
            .iter()
            .map(|b| b.to_string())
            .collect();
        println!("bitrates (kbps): {}", bitrates.join(", "));
        Ok(())
    }
}

/// `<stem>.<job id>.<ext>`, so outputs of one codec at different bitrates do
/// not overwrite each other.
fn output_file_name(item: &ResultItem) -> String {
    let path = Path::new(&item.name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    match path.extension() {
        Some(ext) => format!("{stem}.{}.{}", item.id, ext.to_string_lossy()),
        None => format!("{stem}.{}", item.id),
    }
}

async fn write_outputs(
    coordinator: &RunCoordinator,
    items: &[ResultItem],
    out_dir: &Path,
) -> Result<Vec<WrittenOutput>> {
    tokio::fs::create_dir_all(out_dir).await?;

    let mut written = Vec::with_capacity(items.len());
    for item in items {
        let Some(bytes) = coordinator.resolve(&item.handle) else {
            warn!(job_id = %item.id, "Result no longer available");
            continue;
        };
        let path = out_dir.join(output_file_name(item));
        tokio::fs::write(&path, &bytes).await?;
        debug!(path = %path.display(), size = bytes.len(), "Wrote output");
        written.push(WrittenOutput {
            id: item.id.to_string(),
            label: item.label.clone(),
            mime: item.mime.clone(),
            size: item.size,
            path,
        });
    }
    Ok(written)
}

fn output_line(output: &WrittenOutput) -> String {
    format!(
        "{:>16}  {:>10}  {}",
        output.label,
        HumanBytes(output.size).to_string(),
        output.path.display()
    )
}

fn print_summary(report: &RunReport, outputs: Vec<WrittenOutput>, format: OutputFormat) -> Result<()> {
    let summary = RunSummary {
        hash: report.hash.as_ref().map(|h| h.to_string()),
        outputs,
        errors: report
            .errors
            .iter()
            .map(|(id, msg)| (id.to_string(), msg.clone()))
            .collect(),
        cache_hits: report.cache_hits,
        scheduled: report.scheduled,
        cancelled: report.cancelled,
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Pretty => {
            for output in &summary.outputs {
                println!("{}", output_line(output));
            }
            for (id, message) in &summary.errors {
                println!("{id:>16}  failed: {message}");
            }
            println!(
                "{} from cache, {} encoded{}",
                summary.cache_hits,
                summary.scheduled,
                if summary.cancelled { " (cancelled)" } else { "" }
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use multienc_engine::{HandleRegistry, JobId};

    #[test]
    fn test_output_file_name_includes_job_id() {
        let registry = HandleRegistry::new();
        let item = ResultItem {
            id: JobId::from("mp3-128"),
            name: "take.mp3".to_string(),
            size: 3,
            handle: registry.mint(bytes::Bytes::from_static(b"abc")),
            mime: "audio/mpeg".to_string(),
            label: "MP3 128 kbps".to_string(),
        };
        assert_eq!(output_file_name(&item), "take.mp3-128.mp3");
    }

    #[test]
    fn test_output_line_uses_human_sizes() {
        let output = WrittenOutput {
            id: "opus-128".to_string(),
            label: "Opus 128 kbps".to_string(),
            mime: "audio/webm".to_string(),
            size: 1536,
            path: PathBuf::from("out/take.opus-128.webm"),
        };
        let line = output_line(&output);
        assert!(line.contains("1.50 KiB"), "{line}");
        assert!(!line.contains("1536"));
        assert!(line.ends_with("out/take.opus-128.webm"));
    }
}
