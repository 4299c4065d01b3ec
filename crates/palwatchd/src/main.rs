//! palwatchd: the palwatch daemon.
//!
//! Loads `palwatch.toml`, starts the workers of every configured server and
//! runs until Ctrl-C:
//! - chat relay (log tail → webhook / log)
//! - save stall check (restart through the control API)
//! - status report (cached info/metrics/players)
//!
//! # Usage
//!
//! ```text
//! palwatchd run --config /etc/palwatch/palwatch.toml
//! palwatchd check-config --config palwatch.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use palwatch_core::{PalwatchConfig, ServerTarget};
use palwatch_monitor::{EventSink, FanoutSink, LogSink, SnapshotCache, WorkerSupervisor};
use palwatch_remote::{NetworkConnector, WebhookSink};

const DEFAULT_FILTER: &str = "info,palwatchd=debug,palwatch_monitor=debug";

#[derive(Parser)]
#[command(name = "palwatchd", about = "Game server health monitor and chat relay")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the workers until interrupted.
    Run {
        /// Configuration file.
        #[arg(long, short, default_value = "palwatch.toml")]
        config: PathBuf,
    },
    /// Validate the configuration and print what would be watched.
    CheckConfig {
        /// Configuration file.
        #[arg(long, short, default_value = "palwatch.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run { config } => run(&config).await,
        Command::CheckConfig { config } => check_config(&config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load(path: &Path) -> anyhow::Result<PalwatchConfig> {
    PalwatchConfig::from_file(path)
        .with_context(|| format!("loading configuration from {}", path.display()))
}

async fn run(path: &Path) -> anyhow::Result<()> {
    let config = load(path)?;
    info!(path = %path.display(), servers = config.servers.len(), "palwatch starting");

    let cache = Arc::new(SnapshotCache::new(config.cache.ttl()));
    let sink = build_sink(&config)?;
    let supervisor = WorkerSupervisor::new(Arc::new(NetworkConnector::new()), cache, sink);

    for server in &config.servers {
        supervisor.start(server.clone()).await;
    }

    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl-C handler")?;
    info!("shutdown signal received");

    supervisor.stop_all().await;
    info!("palwatch stopped");
    Ok(())
}

fn build_sink(config: &PalwatchConfig) -> anyhow::Result<Arc<dyn EventSink>> {
    let mut sink = FanoutSink::new().with(Arc::new(LogSink));
    let webhooks = WebhookSink::from_config(config).context("building webhook client")?;
    if !webhooks.is_empty() {
        sink = sink.with(Arc::new(webhooks));
    }
    Ok(Arc::new(sink))
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = load(path)?;
    println!(
        "{}: ok, {} server(s), cache ttl {:?}",
        path.display(),
        config.servers.len(),
        config.cache.ttl()
    );
    for server in &config.servers {
        println!("  {}", describe(server));
    }
    Ok(())
}

/// One-line summary of what runs for `server`.
fn describe(server: &ServerTarget) -> String {
    let mut concerns = Vec::new();
    if server.chat_enabled() {
        concerns.push(format!("chat every {}", server.chat.interval));
    }
    if server.save_check_enabled() {
        concerns.push(format!("save every {}", server.save.interval));
    }
    if server.status.enabled {
        concerns.push(format!("status every {}", server.status.interval));
    }
    let concerns = if concerns.is_empty() {
        "nothing enabled".to_string()
    } else {
        concerns.join(", ")
    };
    format!("{} ({}): {concerns}", server.name, server.endpoint_key())
}
