//! # keeper
//!
//! Watches every directory named by the configured providers and backs up
//! changed files until interrupted.
//!
//! ```text
//! FileMonitor ──► BackupManager ──► providers
//!      ▲                │
//!   add(dir)            ▼
//!                 result consumer (logs)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use keeper_backup_manager::{
    BackupConfig, BackupManager, BackupResult, DispatcherConfig, JsonFileStore, Provider,
    ProviderConfig, build_provider,
};
use keeper_fs_monitor::{FileMonitor, MonitorConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "keeper")]
#[command(about = "Back up changed files to every configured provider")]
struct Args {
    /// Provider configuration (JSON)
    #[arg(long, default_value = "keeper.json")]
    config: PathBuf,

    /// Metadata store file
    #[arg(long, default_value = "keeper-state.json")]
    state: PathBuf,

    /// Quiet period before buffered changes are flushed
    #[arg(long)]
    flush_delay_ms: Option<u64>,

    /// Log filter, used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn monitor_config(&self) -> MonitorConfig {
        match self.flush_delay_ms {
            Some(ms) => MonitorConfig::default().with_flush_delay(Duration::from_millis(ms)),
            None => MonitorConfig::default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;
    run(args).await
}

fn init_tracing(default_level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level)
            .with_context(|| format!("invalid log level: {default_level}"))?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = BackupConfig::load(&args.config)
        .await
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let store = JsonFileStore::open(&args.state)
        .await
        .with_context(|| format!("failed to open {}", args.state.display()))?;

    let monitor = FileMonitor::new(args.monitor_config()).context("failed to create monitor")?;
    let providers = build_providers(&config.providers);
    for provider in &providers {
        for dir in provider.directory_list() {
            if let Err(e) = monitor.add(dir).await {
                warn!("[{}] Cannot watch {}: {e}", provider.name(), dir.display());
            }
        }
    }

    let (manager, results) =
        BackupManager::new(Arc::new(store), providers, DispatcherConfig::default())
            .await
            .context("failed to start backup manager")?;
    monitor.subscribe(Arc::new(manager.clone())).await;
    let consumer = tokio::spawn(consume_results(results));

    let cancel = CancellationToken::new();
    let watching = {
        let monitor = monitor.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { monitor.start(cancel).await })
    };
    info!("Watching {} roots", monitor.root_dirs().await.len());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Interrupted; shutting down");

    cancel.cancel();
    match watching.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Monitor exited with error: {e}"),
        Err(e) => error!("Monitor task failed: {e}"),
    }

    manager
        .shutdown()
        .await
        .context("failed to shut down backup manager")?;
    consumer.await.context("result consumer failed")?;
    Ok(())
}

/// Build every configured provider, skipping the ones that cannot be built.
fn build_providers(configs: &[ProviderConfig]) -> Vec<Arc<dyn Provider>> {
    configs
        .iter()
        .filter_map(|config| match build_provider(config) {
            Ok(provider) => Some(provider),
            Err(e) => {
                error!("Skipping provider {}: {e}", config.name);
                None
            }
        })
        .collect()
}

async fn consume_results(mut results: mpsc::Receiver<BackupResult>) {
    while let Some(result) = results.recv().await {
        match &result.error {
            None => info!("[{}] {} backed up", result.provider, result.path.display()),
            Some(e) => warn!(
                "[{}] {} not backed up: {e}",
                result.provider,
                result.path.display()
            ),
        }
    }
}
