//! batchvault daemon
//!
//! Watches a staging root for committed batch folders and files them into
//! versioned storage.

mod daemon;
mod signals;

use anyhow::{Context, Result};
use batchvault_core::ServiceConfig;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{prelude::*, reload, EnvFilter, Registry};

pub use daemon::Daemon;

#[derive(Parser)]
#[command(name = "batchvault-daemon")]
#[command(about = "Ingest committed staging folders into versioned storage")]
#[command(version)]
struct Args {
    /// Storage root (overrides the config file)
    storage_dir: Option<PathBuf>,

    /// Staging root (overrides the config file)
    staging_dir: Option<PathBuf>,

    /// Config file to read instead of the default location
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::load_from(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ServiceConfig::load(),
        };
        if let Some(storage_dir) = self.storage_dir {
            config.storage_dir = storage_dir;
        }
        if let Some(staging_dir) = self.staging_dir {
            config.staging_dir = staging_dir;
        }
        Ok(config)
    }
}

/// Run the daemon
pub async fn run(config: ServiceConfig) -> Result<()> {
    let daemon = Daemon::new(config)?;
    daemon.run().await
}

/// Replace the startup filter with the configured level unless RUST_LOG set one
fn apply_log_level(
    handle: &reload::Handle<EnvFilter, Registry>,
    level: &str,
    env_override: bool,
) -> Result<()> {
    if env_override {
        return Ok(());
    }
    let filter = EnvFilter::try_new(level)
        .with_context(|| format!("Invalid log level {:?}", level))?;
    handle
        .reload(filter)
        .context("Failed to apply configured log level")
}

fn main() -> Result<()> {
    // Logging comes up before the config so that load warnings are visible
    let env_filter = EnvFilter::try_from_default_env();
    let env_override = env_filter.is_ok();
    let (filter, handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|_| EnvFilter::new("info")));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = Args::parse().into_config()?;
    apply_log_level(&handle, &config.log_level, env_override)?;

    tracing::info!("Starting batchvault daemon v{}", env!("CARGO_PKG_VERSION"));

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(config));

    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_dirs_override_config() {
        let args = Args::parse_from(["batchvault-daemon", "/srv/storage", "/srv/staging"]);
        let config = args.into_config().unwrap();
        assert_eq!(config.storage_dir, PathBuf::from("/srv/storage"));
        assert_eq!(config.staging_dir, PathBuf::from("/srv/staging"));
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let args = Args::parse_from(["batchvault-daemon", "--config", "/nonexistent/config.yaml"]);
        assert!(args.into_config().is_err());
    }

    /// Test the configured level replaces the startup filter
    #[test]
    fn test_config_level_applied_after_startup() {
        let (_layer, handle) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("info"));
        apply_log_level(&handle, "debug", false).unwrap();
        assert_eq!(handle.with_current(|f| f.to_string()).unwrap(), "debug");
    }

    /// Test RUST_LOG keeps precedence over the configured level
    #[test]
    fn test_env_filter_wins_over_config_level() {
        let (_layer, handle) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("info"));
        apply_log_level(&handle, "debug", true).unwrap();
        assert_eq!(handle.with_current(|f| f.to_string()).unwrap(), "info");
    }
}
