//! TrainTrack CLI: run staged training pipelines locally or on a batch scheduler.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// TrainTrack: staged training pipelines with sweeps, resume and batch submission
#[derive(Parser, Debug)]
#[command(name = "traintrack", version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long)]
    quiet: bool,

    /// Also write JSON logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run every stage of a pipeline in order
    Run {
        /// Pipeline file with a `stage_list`
        pipeline: PathBuf,

        /// Project configuration file
        #[arg(short, long, default_value = "configs/project_config.yaml")]
        project: PathBuf,

        /// Submit runs to the batch scheduler instead of running them here
        #[arg(short, long)]
        batch: bool,

        /// Force inference mode on every stage
        #[arg(long, conflicts_with = "no_inference")]
        inference: bool,

        /// Clear inference mode on every stage (local runs only)
        #[arg(long)]
        no_inference: bool,
    },
    /// Execute one serialized run; this is what submitted batch jobs invoke
    BatchStage {
        /// Project configuration providing the trainer command
        #[arg(long)]
        project_config: Option<PathBuf>,

        /// Run config as `--key value...` tokens
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr (always active)
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // Optional JSON file layer; the guard flushes it on exit.
    let mut _guard = None;
    let json_layer = match &cli.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "traintrack.log".into());
            std::fs::create_dir_all(&dir)?;
            let appender = tracing_appender::rolling::never(&dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            _guard = Some(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_filter(EnvFilter::new("info")),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    commands::handle_command(cli.command).await
}
