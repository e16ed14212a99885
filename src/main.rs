use anyhow::Result;
use chapter_splitter::{Config, SplitterError, TaskOrchestrator, TaskResult};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "chapter-splitter")]
#[command(version, about = "Download a video's audio and split it into one file per chapter")]
struct Cli {
    /// Video URL (youtube.com/watch?v=... or youtu.be/...)
    url: String,

    /// Configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Base directory for per-task output folders
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose {
        "chapter_splitter=debug,info"
    } else {
        "chapter_splitter=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load().unwrap_or_else(|e| {
            warn!("Failed to load config, using defaults: {}", e);
            Config::default()
        }),
    };
    if let Some(output_dir) = cli.output_dir {
        config.output.base_dir = output_dir;
    }

    info!("🚀 Chapter splitter starting...");
    info!("{}", config.summary());

    let orchestrator = TaskOrchestrator::from_config(&config).await?;

    let id = match orchestrator.submit(&cli.url) {
        Ok(id) => id,
        Err(SplitterError::InvalidInput(reason)) => {
            error!("❌ Invalid input: {}", reason);
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };

    let mut last_state = None;
    let mut last_percent = -1.0;
    loop {
        let Some(progress) = orchestrator.progress(&id) else {
            return Err(anyhow::anyhow!("task {} disappeared from the registry", id));
        };

        if last_state != Some(progress.state) || progress.percent - last_percent >= 1.0 {
            info!("📊 {} {:.1}%", progress.state, progress.percent);
            last_state = Some(progress.state);
            last_percent = progress.percent;
        }

        if progress.state.is_terminal() {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    orchestrator.shutdown().await;

    match orchestrator.result(&id) {
        Some(TaskResult::Done(outcome)) => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            info!(
                "✅ {} files in {}",
                outcome.files.len(),
                config.output.base_dir.join(&outcome.directory).display()
            );
            Ok(())
        }
        Some(TaskResult::Error { error }) => {
            println!("{}", serde_json::to_string_pretty(&TaskResult::Error { error: error.clone() })?);
            error!("❌ Task failed: {}", error);
            std::process::exit(1);
        }
        Some(TaskResult::Pending { state, .. }) => {
            Err(anyhow::anyhow!("task stopped polling in non-terminal state {}", state))
        }
        None => Err(anyhow::anyhow!("task {} was purged before its result was read", id)),
    }
}
