mod cli;
mod commands;
mod config;
mod error;
mod progress;

use std::path::Path;
use std::process;

use clap::Parser;
use tracing::{Level, error};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::{Args, Commands},
    commands::{CommandExecutor, RunArgs},
    config::AppConfig,
    error::{AppError, Result},
};

const LOG_FILE_PREFIX: &str = "multienc.log";

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let _log_guard = init_logging(args.verbose, args.quiet, args.log_dir.as_deref())?;

    if let Commands::Config { show, reset } = &args.command {
        if *reset {
            AppConfig::reset(args.config.as_deref())?;
            println!("Configuration reset to defaults");
        } else if *show {
            let config = AppConfig::load(args.config.as_deref())?;
            println!("{}", config.show()?);
        } else {
            println!("Use --show to print the configuration or --reset to restore defaults");
        }
        return Ok(());
    }

    let config = AppConfig::load(args.config.as_deref())?;
    let executor = CommandExecutor::new(config, args.quiet);

    match args.command {
        Commands::Run {
            input,
            codecs,
            bitrates,
            concurrency,
            out_dir,
            no_probe,
            output,
        } => {
            executor
                .run(RunArgs {
                    input,
                    codecs,
                    bitrates,
                    concurrency,
                    out_dir,
                    no_probe,
                    output,
                })
                .await
        }
        Commands::Resume { out_dir } => executor.resume(out_dir).await,
        Commands::ClearCache => executor.clear_cache().await,
        Commands::Codecs { probe } => executor.codecs(probe).await,
        Commands::Config { .. } => Ok(()),
    }
}

fn init_logging(verbose: bool, quiet: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(verbose),
        )
        .with(file_layer)
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))?;

    Ok(guard)
}
