//! Tests for driving a docker compatible CLI
//!

#![cfg(unix)]

use core::time::Duration;
use std::{
    fs::{self, Permissions},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use container_backup::{
    credentials::Credentials,
    dump,
    engine::Engine,
    inventory,
    runtime::{ContainerRef, ContainerRuntime, DockerCli},
};
use tempfile::TempDir;

/// Answers only the exact argument lists the runtime is expected to send.
const FAKE_DOCKER: &str = r#"#!/bin/sh
case "$*" in
  "ps --format {{.Names}}")
    printf 'web\ndb1\n' ;;
  "inspect --type container db1")
    printf '[{"Config":{"Image":"postgres:16","Env":["POSTGRES_PASSWORD=s3cret"]}}]\n' ;;
  "stop db1" | "start db1")
    printf 'db1\n' ;;
  "exec "*)
    printf 'args=%s\n' "$*"
    printf 'PGPASSWORD=%s\n' "${PGPASSWORD:-unset}" ;;
  *)
    printf 'unexpected arguments: %s\n' "$*" >&2
    exit 1 ;;
esac
"#;

const BROKEN_DOCKER: &str = r#"#!/bin/sh
printf 'Cannot connect to the Docker daemon\n' >&2
exit 1
"#;

struct Binaries {
    _directory: TempDir,
    fake: PathBuf,
    broken: PathBuf,
}

/// Written once, before any test spawns a process, so no child inherits an open handle to a
/// script that is being executed.
fn binaries() -> &'static Binaries {
    static BINARIES: OnceLock<Binaries> = OnceLock::new();

    BINARIES.get_or_init(|| {
        let directory = tempfile::tempdir().unwrap();

        let write = |name: &str, contents: &str| {
            let path = directory.path().join(name);
            fs::write(&path, contents).unwrap();
            fs::set_permissions(&path, Permissions::from_mode(0o755)).unwrap();
            path
        };
        let fake = write("fake-docker", FAKE_DOCKER);
        let broken = write("broken-docker", BROKEN_DOCKER);

        Binaries {
            _directory: directory,
            fake,
            broken,
        }
    })
}

fn cli(binary: &Path) -> DockerCli {
    DockerCli::new(
        binary.to_string_lossy(),
        Duration::from_secs(10),
        Duration::from_secs(10),
    )
}

#[test]
fn list_running_reads_names() {
    let runtime = cli(&binaries().fake);

    let names = runtime.list_running().unwrap();
    assert_eq!(names, vec![ContainerRef::from("web"), ContainerRef::from("db1")]);
}

#[test]
fn inspect_reads_container_config() {
    let runtime = cli(&binaries().fake);

    let config = runtime.inspect(&ContainerRef::from("db1")).unwrap();
    assert_eq!(config.image, "postgres:16");
    assert_eq!(config.env, vec!["POSTGRES_PASSWORD=s3cret".to_string()]);
}

#[test]
fn stop_and_start_by_name() {
    let runtime = cli(&binaries().fake);

    runtime.stop(&ContainerRef::from("db1")).unwrap();
    runtime.start(&ContainerRef::from("db1")).unwrap();

    let error = runtime.stop(&ContainerRef::from("other")).unwrap_err();
    assert!(error.to_string().contains("unexpected arguments: stop other"), "{error}");
}

#[test]
fn exec_capture_passes_command() {
    let runtime = cli(&binaries().fake);

    let output = runtime
        .exec_capture(&ContainerRef::from("db1"), &["mariadb", "--version"])
        .unwrap();
    assert!(output.contains("args=exec db1 mariadb --version"), "{output}");
    assert!(output.contains("PGPASSWORD=unset"), "{output}");
}

#[test]
fn postgres_password_stays_out_of_arguments() {
    let directory = tempfile::tempdir().unwrap();
    let runtime = cli(&binaries().fake);
    let credentials = Credentials {
        password: Some("s3cret".to_string()),
        ..Credentials::default()
    };

    let invocation = dump::build_dump_invocation(
        &ContainerRef::from("db1"),
        Engine::PostgreSql,
        &credentials,
        None,
        directory.path(),
    )
    .unwrap();
    assert!(!invocation.runtime_args().iter().any(|arg| arg.contains("s3cret")));

    dump::execute_dump(&runtime, &invocation).unwrap();

    let contents = fs::read_to_string(&invocation.output_path).unwrap();
    assert!(
        contents.contains("args=exec -e PGPASSWORD db1 pg_dumpall -U postgres"),
        "{contents}"
    );
    assert!(contents.contains("PGPASSWORD=s3cret"), "{contents}");
}

#[test]
fn failed_listing_is_discovery_error() {
    let runtime = cli(&binaries().broken);

    let error = inventory::list_running(&runtime).unwrap_err();
    let message = error.to_string();
    assert!(message.starts_with("Failed to list running containers"), "{message}");
    assert!(message.contains("Cannot connect to the Docker daemon"), "{message}");
}
