//! Archiving the host's persistent volume directory.
//!

use core::time::Duration;
use std::{
    fs, io,
    path::{Path, PathBuf},
    process::Command,
};

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::warn;

use crate::command::{self, CommandError};

/// Creates a compressed archive of a directory.
pub trait VolumeArchiver {
    /// Archive `source` into a new file inside `destination`, returning the file's path.
    fn archive(&self, source: &Path, destination: &Path) -> Result<PathBuf, ArchiveError>;
}

/// `docker_volumes_backup_<YYYYMMDD_HHMMSS>.tar.gz`
pub fn archive_file_name(timestamp: DateTime<Local>) -> String {
    format!(
        "docker_volumes_backup_{}.tar.gz",
        timestamp.format("%Y%m%d_%H%M%S")
    )
}

/// Check that `source` exists and is a directory.
pub fn check_source(source: &Path) -> Result<(), ArchiveError> {
    let metadata = fs::metadata(source).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            ArchiveError::SourceMissing(source.to_path_buf())
        } else {
            ArchiveError::Io(e, "read volume directory metadata")
        }
    })?;

    if !metadata.is_dir() {
        return Err(ArchiveError::NotDirectory(source.to_path_buf()));
    }

    Ok(())
}

/// Archives with the host's `tar`.
#[derive(Debug, Clone)]
pub struct TarArchiver {
    /// How long `tar` may run before it is killed.
    pub timeout: Duration,
}

impl VolumeArchiver for TarArchiver {
    fn archive(&self, source: &Path, destination: &Path) -> Result<PathBuf, ArchiveError> {
        check_source(source)?;

        fs::create_dir_all(destination)
            .map_err(|e| ArchiveError::Io(e, "create backup directory"))?;

        let archive_path = destination.join(archive_file_name(Local::now()));

        let result = command::capture(
            Command::new("tar")
                .arg("-czf")
                .arg(&archive_path)
                .arg("-C")
                .arg(source)
                .arg("."),
            self.timeout,
        );

        if let Err(error) = result {
            if let Err(remove_error) = fs::remove_file(&archive_path) {
                if remove_error.kind() != io::ErrorKind::NotFound {
                    warn!(
                        "Failed to remove incomplete archive '{}': {remove_error}",
                        archive_path.display()
                    );
                }
            }
            return Err(ArchiveError::Command(error));
        }

        Ok(archive_path)
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Volume directory '{0}' does not exist")]
    SourceMissing(PathBuf),

    #[error("Volume path '{0}' is not a directory")]
    NotDirectory(PathBuf),

    #[error("Failed to {1}: {0}")]
    Io(#[source] io::Error, &'static str),

    #[error("Failed to create archive:\n{0}")]
    Command(#[source] CommandError),
}
