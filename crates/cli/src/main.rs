// pcwatch CLI - reduce, diff, and merge Canadian postal-code snapshots

mod exit_codes;
mod report;
mod tracker;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use pcwatch_config::{ConfigError, TrackerConfig};
use pcwatch_engine::{EngineError, SourceType};
use pcwatch_io::{ExportFormat, SourceError};

use exit_codes::{
    config_exit_code, engine_exit_code, source_exit_code, EXIT_ERROR, EXIT_SUCCESS, EXIT_USAGE,
};
use tracker::Tracker;

#[derive(Parser)]
#[command(name = "pcwatch")]
#[command(about = "Track changes across Canadian postal-code snapshots")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Config file (default: ./pcwatch.toml, then the user config directory)
    #[arg(long, short = 'c', global = true, env = "PCWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reduce configured extracts into stored snapshots
    #[command(after_help = "\
Examples:
  pcwatch process
  pcwatch process --source nar --period 2024-06
  pcwatch process --source geocoder --force")]
    Process {
        /// Only this source (nar, geocoder, geonames)
        #[arg(long)]
        source: Option<SourceType>,

        /// Only this configured period
        #[arg(long)]
        period: Option<String>,

        /// Reprocess snapshots already marked processed
        #[arg(long)]
        force: bool,
    },

    /// Diff consecutive stored snapshots of a lineage and rebuild the summary
    Diff {
        /// Lineage to diff (default: every input source)
        #[arg(long)]
        source: Option<SourceType>,
    },

    /// Merge stored sources per reference date, then diff the merged lineage
    Merge,

    /// Rebuild the per-postal-code summary table
    Summary,

    /// Print snapshot and change counts
    Stats {
        #[arg(long)]
        source: Option<SourceType>,
    },

    /// Write change events to CSV or JSON
    #[command(after_help = "\
Examples:
  pcwatch export
  pcwatch export --source merged --format json -o changes.json
  pcwatch export -o - | head")]
    Export {
        #[arg(long, default_value = "nar")]
        source: SourceType,

        #[arg(long, short = 'f', default_value = "csv")]
        format: ExportFormat,

        /// Output file, or - for stdout (default: postal_code_changes_<source>.<ext>)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Classify one city-name change
    #[command(after_help = "\
Examples:
  pcwatch classify Montreal Montréal
  pcwatch classify 'Frobisher Bay' Iqaluit")]
    Classify {
        old: String,
        new: String,
    },

    /// Check the configuration and rules tables
    Validate,
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  pcwatch-engine ", env!("CARGO_PKG_VERSION"),
    )
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

/// Size rayon's global pool; 0 keeps rayon's default.
fn configure_workers(workers: usize) -> Result<(), CliError> {
    if workers == 0 {
        return Ok(());
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build_global()
        .map_err(|e| CliError::general(format!("cannot start {workers} workers: {e}")))
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = TrackerConfig::load(cli.config.as_deref()).map_err(CliError::config)?;
    configure_workers(config.workers)?;

    match cli.command {
        Commands::Process { source, period, force } => {
            Tracker::open(config)?.process(source, period.as_deref(), force)
        }
        Commands::Diff { source } => Tracker::open(config)?.diff(source),
        Commands::Merge => Tracker::open(config)?.merge(),
        Commands::Summary => {
            let n = Tracker::open(config)?.rebuild_summary()?;
            println!("summary: {n} postal codes");
            Ok(())
        }
        Commands::Stats { source } => Tracker::open(config)?.stats(source),
        Commands::Export { source, format, output } => {
            Tracker::open(config)?.export(source, format, output)
        }
        Commands::Classify { old, new } => report::cmd_classify(&config, &old, &new),
        Commands::Validate => report::cmd_validate(&config),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn general(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ERROR, message: msg.into(), hint: None }
    }

    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn config(err: ConfigError) -> Self {
        let hint = match &err {
            ConfigError::Read { .. } => Some("pass -c PATH or create ./pcwatch.toml".to_string()),
            _ => None,
        };
        Self { code: config_exit_code(&err), message: err.to_string(), hint }
    }

    pub fn source(err: SourceError) -> Self {
        let hint = match &err {
            SourceError::NoInputFiles(_) => {
                Some("check the snapshot `path` and `data_dir` in pcwatch.toml".to_string())
            }
            _ => None,
        };
        Self { code: source_exit_code(&err), message: err.to_string(), hint }
    }

    pub fn engine(err: EngineError) -> Self {
        let hint = match &err {
            EngineError::SnapshotOrder { .. } => {
                Some("snapshots are diffed in [[snapshots]] order; check the catalog".to_string())
            }
            EngineError::EmptySnapshot(_) => {
                Some("reprocess the snapshot with `pcwatch process --force`".to_string())
            }
            _ => None,
        };
        Self { code: engine_exit_code(&err), message: err.to_string(), hint }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
