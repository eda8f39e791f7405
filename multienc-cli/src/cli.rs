use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true, env = "MULTIENC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Also write logs into this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Encode a source file into every selected codec/bitrate
    Run {
        /// Source media file
        input: PathBuf,

        /// Codec keys to produce (repeatable, defaults to the configured selection)
        #[arg(long = "codec", value_name = "KEY")]
        codecs: Vec<String>,

        /// Bitrates in kbps (repeatable, defaults to the configured selection)
        #[arg(long = "bitrate", value_name = "KBPS")]
        bitrates: Vec<u32>,

        /// Maximum concurrent encodes
        #[arg(long)]
        concurrency: Option<usize>,

        /// Directory the outputs are written to
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// Skip the encoder capability probe
        #[arg(long)]
        no_probe: bool,

        /// Report format
        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,
    },

    /// Write out the cached results of the most recent run
    Resume {
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },

    /// Remove every cached output
    ClearCache,

    /// List the codec catalog
    Codecs {
        /// Also query the encoder for support
        #[arg(long)]
        probe: bool,
    },

    /// Show or reset the configuration
    Config {
        #[arg(long, conflicts_with = "reset")]
        show: bool,

        #[arg(long)]
        reset: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let args = Args::parse_from([
            "multienc", "run", "take.flac", "--codec", "mp3", "--codec", "wav", "--bitrate", "96",
            "-v",
        ]);
        assert!(args.verbose);
        match args.command {
            Commands::Run {
                input,
                codecs,
                bitrates,
                output,
                ..
            } => {
                assert_eq!(input, PathBuf::from("take.flac"));
                assert_eq!(codecs, vec!["mp3", "wav"]);
                assert_eq!(bitrates, vec![96]);
                assert_eq!(output, OutputFormat::Pretty);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Args::try_parse_from(["multienc", "-v", "-q", "clear-cache"]).is_err());
    }
}
