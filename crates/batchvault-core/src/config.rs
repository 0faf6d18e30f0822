//! Configuration for the batchvault service.

use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Storage root holding versioned artifacts and the index snapshot
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Staging root where producers create batch folders
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// PID file path
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Pick up folders already present in staging at startup
    #[serde(default = "default_sweep_on_start")]
    pub sweep_on_start: bool,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("batchvault")
}

fn default_storage_dir() -> PathBuf {
    default_data_dir().join("storage")
}

fn default_staging_dir() -> PathBuf {
    default_data_dir().join("staging")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_pid_file() -> PathBuf {
    default_data_dir().join("batchvault.pid")
}

fn default_sweep_on_start() -> bool {
    true
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            staging_dir: default_staging_dir(),
            log_level: default_log_level(),
            pid_file: default_pid_file(),
            sweep_on_start: default_sweep_on_start(),
        }
    }
}

impl ServiceConfig {
    /// Default location of the config file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("batchvault")
            .join("config.yaml")
    }

    /// Load configuration from the default file, falling back to defaults
    pub fn load() -> Self {
        let config_path = Self::default_path();

        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config file: {}", e);
                }
            }
        }

        Self::default()
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Ensure storage and staging directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.storage_dir)?;
        std::fs::create_dir_all(&self.staging_dir)?;
        Ok(())
    }

    /// Check that both storage and staging directories are writable
    pub fn check_writable(&self) -> Result<(), CoreError> {
        check_writable(&self.storage_dir)?;
        check_writable(&self.staging_dir)
    }
}

/// Prove a directory is writable by creating a temp file in it.
pub fn check_writable(dir: &Path) -> Result<(), CoreError> {
    tempfile::tempfile_in(dir)
        .map(drop)
        .map_err(|e| CoreError::NotWritable {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })
}
