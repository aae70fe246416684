//! Bounded execution of external commands.
//!

use core::time::Duration;
use std::{
    io::{self, Read},
    process::{Child, Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
    time::Instant,
};

use thiserror::Error;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// The captured output of a command that exited successfully.
#[derive(Debug, Default)]
pub struct CommandOutput {
    /// Everything written to stdout, empty if stdout was redirected.
    pub stdout: Vec<u8>,

    /// Everything written to stderr.
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Stdout as lossy UTF-8.
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Run a command and capture its stdout, killing it once `timeout` has elapsed.
pub fn capture(command: &mut Command, timeout: Duration) -> Result<CommandOutput, CommandError> {
    run(command, Stdio::piped(), timeout)
}

/// Run a command with stdout sent to `stdout`, killing it once `timeout` has elapsed.
pub fn run_into(
    command: &mut Command,
    stdout: Stdio,
    timeout: Duration,
) -> Result<CommandOutput, CommandError> {
    run(command, stdout, timeout)
}

fn run(command: &mut Command, stdout: Stdio, timeout: Duration) -> Result<CommandOutput, CommandError> {
    let description = describe(command);

    let mut child = command
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| CommandError::Spawn(e, description.clone()))?;

    // Pipes are drained on their own threads so a chatty child cannot block on a full pipe
    // while this thread is polling for its exit.
    let stdout_reader = child.stdout.take().map(drain);
    let stderr_reader = child.stderr.take().map(drain);

    // A killed child's own children may still hold the pipes, so readers are only joined
    // after a normal exit.
    let status = match wait_until(&mut child, timeout, &description)
        .map_err(|e| CommandError::Wait(e, description.clone()))?
    {
        Some(status) => status,
        None => return Err(CommandError::Timeout(description, timeout)),
    };

    let stdout = collect(stdout_reader);
    let stderr = collect(stderr_reader);

    if !status.success() {
        let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
        return Err(CommandError::CommandErrored {
            command: description,
            status,
            stderr,
        });
    }

    Ok(CommandOutput { stdout, stderr })
}

/// Returns `None` if the child was killed because the deadline passed.
fn wait_until(
    child: &mut Child,
    timeout: Duration,
    description: &str,
) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now().checked_add(timeout);

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            warn!("'{description}' exceeded {timeout:?}, killing it");
            if let Err(error) = child.kill() {
                warn!("Failed to kill '{description}': {error}");
            }
            child.wait()?;
            return Ok(None);
        }

        thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Err(error) = reader.read_to_end(&mut buffer) {
            debug!("Failed to read command output: {error}");
        }
        buffer
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Program and sub-command only, arguments may hold credentials.
fn describe(command: &Command) -> String {
    let program = command.get_program().to_string_lossy();
    match command.get_args().next() {
        Some(action) => format!("{program} {}", action.to_string_lossy()),
        None => program.into_owned(),
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to run '{1}':\n{0}")]
    Spawn(#[source] io::Error, String),

    #[error("Failed to wait for '{1}':\n{0}")]
    Wait(#[source] io::Error, String),

    #[error("'{0}' did not finish within {1:?} and was killed")]
    Timeout(String, Duration),

    #[error("'{command}' exited with {status}:\n{stderr}")]
    CommandErrored {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
}

impl CommandError {
    /// If the command was killed for exceeding its timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(..))
    }
}
