//! Subcommand handlers and shared startup helpers.

mod create_memory;
mod run;

pub use create_memory::{create_memory, CreateMemoryArgs};
pub use run::{run, RunArgs};

use anyhow::Context;
use mnemon_core::bus::BrokerService;
use mnemon_core::config::Config;
use mnemon_core::runtime::Host;
use mnemon_core::services::{
    CodifyService, ConsolidateService, ProgressService, RespondService, RetrieveService,
    StorageService,
};
use std::path::PathBuf;

/// Expand `~` at the start of a path to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Load configuration from the `--config` flag. A missing file at the
/// default location falls back to built-in defaults plus environment
/// overrides; a missing file at an explicit location is an error.
pub(crate) fn load_config(config_arg: &str) -> anyhow::Result<Config> {
    let path = expand_tilde(config_arg);
    if path.exists() {
        Config::load(Some(&path)).with_context(|| format!("loading {}", path.display()))
    } else if path == Config::default_path() {
        Config::load(None).context("loading default configuration")
    } else {
        anyhow::bail!("config file not found: {}", path.display());
    }
}

/// Install the full pipeline: broker (when enabled) plus the six services,
/// in dependency order.
pub(crate) async fn install_pipeline(host: &mut Host) -> anyhow::Result<()> {
    let registry = host.registry();
    let recorder = host.recorder();
    let broker_config = host.config().broker.clone();
    let retrieval_config = host.config().retrieval.clone();

    if broker_config.enabled {
        host.install(BrokerService::new(&broker_config)?).await?;
    }
    host.install(RetrieveService::new(&registry, retrieval_config)?)
        .await?;
    host.install(RespondService::new(&registry)?).await?;
    host.install(CodifyService::new(&registry, recorder.clone())?)
        .await?;
    host.install(ConsolidateService::new(&registry, recorder)?)
        .await?;
    host.install(StorageService::new(&registry)?).await?;
    host.install(ProgressService::new()).await?;
    Ok(())
}

/// Wait for an OS shutdown signal (Ctrl+C or SIGTERM).
pub(crate) async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Failed to register SIGTERM handler, using Ctrl+C only"
                );
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                } else {
                    tracing::info!("Received Ctrl+C");
                }
                return;
            }
        };

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Ctrl+C handler error");
                }
                tracing::info!("Received Ctrl+C");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        } else {
            tracing::info!("Received Ctrl+C");
        }
    }
}
