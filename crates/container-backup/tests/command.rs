//! Tests for bounded command execution
//!

use core::time::Duration;
use std::{fs, process::Command, time::Instant};

use container_backup::command::{self, CommandError};

#[test]
fn captures_stdout() {
    let output = command::capture(
        Command::new("sh").args(["-c", "echo hello; echo oops >&2"]),
        Duration::from_secs(10),
    )
    .unwrap();

    assert_eq!(output.stdout_string(), "hello\n");
    assert_eq!(String::from_utf8_lossy(&output.stderr), "oops\n");
}

#[test]
fn non_zero_exit_carries_stderr() {
    let error = command::capture(
        Command::new("sh").args(["-c", "echo broken >&2; exit 3"]),
        Duration::from_secs(10),
    )
    .unwrap_err();

    match error {
        CommandError::CommandErrored { command, status, stderr } => {
            assert_eq!(command, "sh -c");
            assert_eq!(status.code(), Some(3));
            assert_eq!(stderr, "broken");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn slow_command_is_killed() {
    let started = Instant::now();

    let error = command::capture(
        Command::new("sh").args(["-c", "sleep 30"]),
        Duration::from_millis(200),
    )
    .unwrap_err();

    assert!(error.is_timeout(), "{error}");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn missing_program_fails_to_spawn() {
    let error = command::capture(
        &mut Command::new("definitely-not-a-container-runtime"),
        Duration::from_secs(10),
    )
    .unwrap_err();

    assert!(matches!(error, CommandError::Spawn(..)));
}

#[test]
fn stdout_into_file() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("out.sql");
    let file = fs::File::create(&path).unwrap();

    let output = command::run_into(
        Command::new("sh").args(["-c", "printf 'CREATE TABLE t;'"]),
        file.into(),
        Duration::from_secs(10),
    )
    .unwrap();

    assert!(output.stdout.is_empty());
    assert_eq!(fs::read_to_string(&path).unwrap(), "CREATE TABLE t;");
}
