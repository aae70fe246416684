//! Container backup config
//!

use core::time::Duration;
use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The backup config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The directory dumps and the volume archive are written to.
    pub backup_directory: PathBuf,

    /// The host directory holding the runtime's persistent volumes.
    pub volumes_directory: PathBuf,

    /// The container runtime's CLI, e.g. `docker` or `podman`.
    pub runtime_binary: String,

    /// How long runtime commands and the archive may run.
    pub command_timeout_seconds: u64,

    /// How long a single dump may run.
    pub dump_timeout_seconds: u64,

    /// Containers that are never stopped, dumped or started.
    pub excluded_containers: Vec<String>,

    /// Dump MySQL and MariaDB as `root` with the declared root password.
    pub use_root_credentials: bool,

    /// Exit with a failure status when any container's backup failed.
    pub fail_on_backup_error: bool,
}

impl Config {
    /// Tries to load a config from a toml file.
    pub fn load_toml(file_path: PathBuf) -> Result<Self, LoadConfigError> {
        if !file_path.exists() {
            return Err(LoadConfigError::NoFile);
        }

        let contents = fs::read_to_string(file_path).map_err(LoadConfigError::Read)?;
        let config = toml::from_str(&contents)?;

        Ok(config)
    }

    /// The timeout for runtime commands.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }

    /// The timeout for a single dump.
    pub fn dump_timeout(&self) -> Duration {
        Duration::from_secs(self.dump_timeout_seconds)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backup_directory: PathBuf::from("./backups"),
            volumes_directory: PathBuf::from("/var/lib/docker/volumes"),
            runtime_binary: "docker".to_string(),
            command_timeout_seconds: 60 * 60,
            dump_timeout_seconds: 60 * 60 * 6,
            excluded_containers: Vec::new(),
            use_root_credentials: false,
            fail_on_backup_error: false,
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("The file does not exist.")]
    NoFile,

    #[error("Failed to read the file:\n{0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to deserialize the file:\n{0}")]
    Deserialize(#[from] toml::de::Error),
}
