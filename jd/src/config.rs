//! JobDaemon configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::driver::DriverConfig;
use crate::pool::PoolConfig;
use crate::retry::RetryConfig;
use crate::scheduler::SchedulerConfig;
use crate::state::RecoveryConfig;
use crate::store::DB_FILE_NAME;
use crate::supervisor::{LOCK_FILE_NAME, SupervisorConfig};

/// Main JobDaemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Log level used when none is given on the command line
    pub log_level: Option<String>,

    /// Throughput and worker limits
    pub limits: SchedulerConfig,

    /// Backoff for failed attempts
    pub retry: RetryConfig,

    /// Per-task timeouts and cancellation grace
    pub pool: PoolConfig,

    /// Reconciliation of stale jobs
    pub recovery: RecoveryConfig,

    /// Lock and orphan reaping
    pub supervisor: SupervisorConfig,

    /// External session program
    pub driver: DriverConfig,

    /// Administrative socket
    pub ipc: IpcConfig,

    /// Where state lives on disk
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, it must load
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .jobdaemon.yml
        let local_config = PathBuf::from(".jobdaemon.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/jobdaemon/jobdaemon.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("jobdaemon").join("jobdaemon.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn data_dir(&self) -> &Path {
        &self.storage.data_dir
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage.data_dir.join(DB_FILE_NAME)
    }

    pub fn export_dir(&self) -> PathBuf {
        self.storage.data_dir.join("exports")
    }

    pub fn events_dir(&self) -> PathBuf {
        self.storage.data_dir.join("events")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.storage.data_dir.join(LOCK_FILE_NAME)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.ipc.socket_path.clone().unwrap_or_else(default_socket_path)
    }

    /// Endpoint advertised in the process lock
    pub fn endpoint(&self) -> String {
        self.supervisor
            .endpoint
            .clone()
            .unwrap_or_else(|| self.socket_path().display().to_string())
    }
}

/// Default socket location: `$XDG_RUNTIME_DIR/jobdaemon/daemon.sock`
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("jobdaemon")
        .join("daemon.sock")
}

/// Administrative socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct IpcConfig {
    /// Override of the socket location
    pub socket_path: Option<PathBuf>,

    /// Client timeout for quick requests
    pub timeout_secs: u64,

    /// Client timeout for requests that run a pre-flight (start, retry)
    pub start_timeout_secs: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            timeout_secs: 5,
            start_timeout_secs: 600,
        }
    }
}

impl IpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Directory holding the database, exports, and event logs
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/jobdaemon on Linux)
        let data_dir = dirs::data_local_dir()
            .map(|d| d.join("jobdaemon"))
            .unwrap_or_else(|| PathBuf::from(".jobdaemon"));
        Self { data_dir }
    }
}
