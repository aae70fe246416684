//! The container runtime, driven through its command line interface.
//!

use core::{fmt, time::Duration};
use std::{ffi::OsStr, fs::File, process::Command};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{
    command::{self, CommandError},
    dump::DumpInvocation,
};

/// A running container, identified by its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerRef(String);

impl ContainerRef {
    /// Create a reference to the container with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The container's name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContainerRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// The parts of a container's configuration that backups depend on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerConfig {
    /// The image reference the container was created from.
    pub image: String,

    /// The declared environment, as `KEY=VALUE` entries in declaration order.
    pub env: Vec<String>,
}

/// Operations on the container runtime.
pub trait ContainerRuntime {
    /// The names of every running container.
    fn list_running(&self) -> Result<Vec<ContainerRef>, RuntimeError>;

    /// Read the container's live configuration.
    fn inspect(&self, container: &ContainerRef) -> Result<ContainerConfig, RuntimeError>;

    /// Stop a running container.
    fn stop(&self, container: &ContainerRef) -> Result<(), RuntimeError>;

    /// Start a stopped container.
    fn start(&self, container: &ContainerRef) -> Result<(), RuntimeError>;

    /// Run a command inside the container and return its stdout.
    fn exec_capture(&self, container: &ContainerRef, command: &[&str]) -> Result<String, RuntimeError>;

    /// Run a dump inside the container, streaming its stdout into `output`.
    fn exec_dump(&self, invocation: &DumpInvocation, output: File) -> Result<(), RuntimeError>;
}

/// A runtime with a docker compatible CLI, such as `docker` or `podman`.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    command_timeout: Duration,
    dump_timeout: Duration,
}

impl DockerCli {
    /// Create a runtime that invokes `binary`.
    ///
    /// `dump_timeout` bounds dumps, `command_timeout` bounds everything else.
    pub fn new(binary: impl Into<String>, command_timeout: Duration, dump_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            command_timeout,
            dump_timeout,
        }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.binary);
        command.args(args);
        command
    }
}

impl ContainerRuntime for DockerCli {
    fn list_running(&self) -> Result<Vec<ContainerRef>, RuntimeError> {
        let output = command::capture(
            &mut self.command(["ps", "--format", "{{.Names}}"]),
            self.command_timeout,
        )?;

        Ok(parse_names(&output.stdout_string()))
    }

    fn inspect(&self, container: &ContainerRef) -> Result<ContainerConfig, RuntimeError> {
        let output = command::capture(
            &mut self.command(["inspect", "--type", "container", container.name()]),
            self.command_timeout,
        )?;

        parse_inspect(&output.stdout_string(), container)
    }

    fn stop(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        command::capture(&mut self.command(["stop", container.name()]), self.command_timeout)?;
        Ok(())
    }

    fn start(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        command::capture(&mut self.command(["start", container.name()]), self.command_timeout)?;
        Ok(())
    }

    fn exec_capture(&self, container: &ContainerRef, command: &[&str]) -> Result<String, RuntimeError> {
        let mut args = vec!["exec", container.name()];
        args.extend_from_slice(command);

        let output = command::capture(&mut self.command(args), self.command_timeout)?;
        Ok(output.stdout_string())
    }

    fn exec_dump(&self, invocation: &DumpInvocation, output: File) -> Result<(), RuntimeError> {
        let mut command = self.command(invocation.runtime_args());

        // Values are handed to the runtime through its own environment so they never appear
        // in its argument list.
        command.envs(invocation.environment.iter().map(|(key, value)| (key, value)));

        let result = command::run_into(&mut command, output.into(), self.dump_timeout)?;
        if !result.stderr.is_empty() {
            debug!(
                "[{}] dump stderr: {}",
                invocation.container,
                String::from_utf8_lossy(&result.stderr).trim()
            );
        }

        Ok(())
    }
}

/// Split the runtime's one-name-per-line listing.
pub fn parse_names(listing: &str) -> Vec<ContainerRef> {
    listing
        .lines()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(ContainerRef::from)
        .collect()
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    config: InspectConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    image: String,
    #[serde(default)]
    env: Option<Vec<String>>,
}

/// Parse the JSON array printed by the runtime's inspect command.
pub fn parse_inspect(json: &str, container: &ContainerRef) -> Result<ContainerConfig, RuntimeError> {
    let entries: Vec<InspectEntry> = serde_json::from_str(json)?;

    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| RuntimeError::NotFound(container.clone()))?;

    Ok(ContainerConfig {
        image: entry.config.image,
        env: entry.config.env.unwrap_or_default(),
    })
}

/// Inspect a container, tagging any failure with the container it concerns.
pub fn inspect<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    container: &ContainerRef,
) -> Result<ContainerConfig, InspectionError> {
    runtime.inspect(container).map_err(|source| InspectionError {
        container: container.clone(),
        source,
    })
}

/// A single container could not be inspected.
#[derive(Debug, Error)]
#[error("Failed to inspect container '{container}':\n{source}")]
pub struct InspectionError {
    /// The container that could not be inspected.
    pub container: ContainerRef,

    /// Why inspection failed.
    #[source]
    pub source: RuntimeError,
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Runtime command failed:\n{0}")]
    Command(#[from] CommandError),

    #[error("Failed to parse runtime output:\n{0}")]
    Parse(#[from] serde_json::Error),

    #[error("The runtime reported nothing for container '{0}'")]
    NotFound(ContainerRef),
}
