//! Building and running per-engine dump commands.
//!

use core::fmt;
use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    credentials::Credentials,
    engine::Engine,
    runtime::{ContainerRef, ContainerRuntime, InspectionError, RuntimeError},
};

/// A dump to run inside a container.
#[derive(Clone, PartialEq, Eq)]
pub struct DumpInvocation {
    /// The container to run the dump in.
    pub container: ContainerRef,

    /// The dump command and its arguments, run inside the container.
    pub command: Vec<String>,

    /// Variables forwarded into the container by name. Their values are only ever passed
    /// through the runtime's environment.
    pub environment: Vec<(String, String)>,

    /// The file the dump's stdout is written to.
    pub output_path: PathBuf,
}

impl DumpInvocation {
    /// The arguments for the runtime's `exec` facility.
    pub fn runtime_args(&self) -> Vec<String> {
        let mut args = vec!["exec".to_string()];

        for (key, _) in &self.environment {
            args.push("-e".to_string());
            args.push(key.clone());
        }

        args.push(self.container.name().to_string());
        args.extend(self.command.iter().cloned());

        args
    }
}

impl fmt::Debug for DumpInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let command: Vec<&str> = self
            .command
            .iter()
            .map(|arg| if arg.starts_with("-p") { "-p***" } else { arg.as_str() })
            .collect();
        let environment: Vec<&str> = self.environment.iter().map(|(key, _)| key.as_str()).collect();

        f.debug_struct("DumpInvocation")
            .field("container", &self.container)
            .field("command", &command)
            .field("environment", &environment)
            .field("output_path", &self.output_path)
            .finish()
    }
}

/// 11.x clients print `from 11.8.3-MariaDB`, 10.x clients print `Distrib 10.6.12-MariaDB`.
static MARIADB_VERSION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?:from|Distrib) (\d+)\.(\d+)(?:\.(\d+))?-MariaDB").ok());

/// Clients asked for the server version, in order. Servers before 10.5 ship only `mysql`.
const VERSION_PROBES: [[&str; 2]; 2] = [["mariadb", "--version"], ["mysql", "--version"]];

/// A database server version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion {
    /// Major version.
    pub major: u64,
    /// Minor version.
    pub minor: u64,
    /// Patch version, zero when not reported.
    pub patch: u64,
}

impl ServerVersion {
    /// Parse the server version out of `mariadb --version` or `mysql --version` output.
    pub fn parse_mariadb(output: &str) -> Option<Self> {
        let captures = MARIADB_VERSION.as_ref()?.captures(output)?;

        let number = |index: usize| -> Option<u64> {
            captures.get(index).and_then(|value| value.as_str().parse().ok())
        };

        Some(Self {
            major: number(1)?,
            minor: number(2)?,
            patch: number(3).unwrap_or(0),
        })
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Ask a MariaDB container which server version it runs.
///
/// `mariadb --version` is tried first, then `mysql --version` for servers without the
/// `mariadb` client.
pub fn probe_mariadb_version<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    container: &ContainerRef,
) -> Option<ServerVersion> {
    VERSION_PROBES.iter().find_map(|probe| {
        let client = probe.first().copied().unwrap_or_default();

        match runtime.exec_capture(container, probe) {
            Ok(output) => {
                let version = ServerVersion::parse_mariadb(&output);
                if version.is_none() {
                    debug!("[{container}] Unrecognised {client} version output: {}", output.trim());
                }
                version
            }
            Err(error) => {
                debug!("[{container}] Could not run {client} --version: {error}");
                None
            }
        }
    })
}

/// The dump binary for an engine. MariaDB servers before 10.5 only ship `mysqldump`.
fn dump_binary(engine: Engine, version: Option<ServerVersion>) -> &'static str {
    const FIRST_MARIADB_DUMP: ServerVersion = ServerVersion {
        major: 10,
        minor: 5,
        patch: 0,
    };

    match engine {
        Engine::MariaDb if version.is_some_and(|version| version < FIRST_MARIADB_DUMP) => {
            "mysqldump"
        }
        Engine::MariaDb => "mariadb-dump",
        Engine::MySql => "mysqldump",
        Engine::PostgreSql => "pg_dumpall",
        Engine::MongoDb => "mongodump",
        Engine::Redis | Engine::Oracle | Engine::SqlServer => "",
    }
}

/// Where a container's dump is written: `<container>_<engine>_backup.<ext>`.
pub fn backup_file_path(
    backup_directory: &Path,
    container: &ContainerRef,
    engine: Engine,
) -> Option<PathBuf> {
    let extension = engine.file_extension()?;

    Some(backup_directory.join(format!(
        "{}_{}_backup.{extension}",
        container.name(),
        engine.label()
    )))
}

/// Build the dump for a container.
///
/// `version` is only consulted for MariaDB.
pub fn build_dump_invocation(
    container: &ContainerRef,
    engine: Engine,
    credentials: &Credentials,
    version: Option<ServerVersion>,
    backup_directory: &Path,
) -> Result<DumpInvocation, DumpError> {
    let output_path = backup_file_path(backup_directory, container, engine)
        .ok_or(DumpError::UnsupportedEngine(engine))?;

    let present = |value: &Option<String>| value.clone().filter(|value| !value.is_empty());
    let binary = dump_binary(engine, version).to_string();

    let (command, environment) = match engine {
        Engine::MySql | Engine::MariaDb => {
            let user = present(&credentials.user)
                .ok_or(DumpError::MissingCredentials(engine, "user"))?;
            let password = present(&credentials.password)
                .ok_or(DumpError::MissingCredentials(engine, "password"))?;
            let target =
                present(&credentials.database).unwrap_or_else(|| "--all-databases".to_string());

            let command = vec![binary, "-u".to_string(), user, format!("-p{password}"), target];
            (command, Vec::new())
        }

        Engine::PostgreSql => {
            let user = present(&credentials.user).unwrap_or_else(|| "postgres".to_string());
            let environment = present(&credentials.password)
                .map(|password| vec![("PGPASSWORD".to_string(), password)])
                .unwrap_or_default();

            (vec![binary, "-U".to_string(), user], environment)
        }

        Engine::MongoDb => (vec![binary, "--archive".to_string()], Vec::new()),

        Engine::Redis | Engine::Oracle | Engine::SqlServer => {
            return Err(DumpError::UnsupportedEngine(engine));
        }
    };

    Ok(DumpInvocation {
        container: container.clone(),
        command,
        environment,
        output_path,
    })
}

/// Run a dump, overwriting any existing file at its output path.
///
/// A partially written file is removed if the dump fails.
pub fn execute_dump<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    invocation: &DumpInvocation,
) -> Result<(), DumpError> {
    let output = File::create(&invocation.output_path)
        .map_err(|e| DumpError::CreateOutput(e, invocation.output_path.clone()))?;

    if let Err(error) = runtime.exec_dump(invocation, output) {
        if let Err(remove_error) = fs::remove_file(&invocation.output_path) {
            warn!(
                "[{}] Failed to remove incomplete dump '{}': {remove_error}",
                invocation.container,
                invocation.output_path.display()
            );
        }
        return Err(DumpError::Execution(error));
    }

    Ok(())
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("{0} backups need a {1}, none is declared in the container environment")]
    MissingCredentials(Engine, &'static str),

    #[error("Backups are not implemented for {0}")]
    UnsupportedEngine(Engine),

    #[error("Could not resolve credentials:\n{0}")]
    Inspection(#[from] InspectionError),

    #[error("Failed to create backup file '{1}':\n{0}")]
    CreateOutput(#[source] io::Error, PathBuf),

    #[error("Dump failed:\n{0}")]
    Execution(#[source] RuntimeError),
}

impl DumpError {
    /// If the dump was killed for exceeding its timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Execution(RuntimeError::Command(error)) if error.is_timeout())
    }
}
