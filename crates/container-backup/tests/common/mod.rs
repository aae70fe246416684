//! # common
//! In-memory runtime and archiver that record every call.
//!

#![allow(missing_docs, dead_code)]

use core::{
    cell::RefCell,
    sync::atomic::{AtomicBool, Ordering},
};
use std::{
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
    rc::Rc,
    sync::Arc,
};

use container_backup::{
    archive::{ArchiveError, VolumeArchiver},
    command::CommandError,
    dump::DumpInvocation,
    runtime::{ContainerConfig, ContainerRef, ContainerRuntime, RuntimeError},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List,
    Inspect(String),
    Stop(String),
    Start(String),
    Exec(String, Vec<String>),
    Dump(String, Vec<String>),
    Archive,
}

#[derive(Debug, Clone, Default)]
pub struct FakeContainer {
    pub image: String,
    pub env: Vec<String>,
    pub inspect_fails: bool,
    pub stop_fails: bool,
    pub start_fails: bool,
    pub dump_fails: bool,
    pub version_output: Option<String>,
    pub mariadb_client_missing: bool,
}

impl FakeContainer {
    pub fn new(image: &str) -> Self {
        Self {
            image: image.to_string(),
            ..Self::default()
        }
    }

    pub fn env(mut self, env: &[&str]) -> Self {
        self.env = env.iter().map(|entry| entry.to_string()).collect();
        self
    }

    pub fn inspect_fails(mut self) -> Self {
        self.inspect_fails = true;
        self
    }

    pub fn stop_fails(mut self) -> Self {
        self.stop_fails = true;
        self
    }

    pub fn start_fails(mut self) -> Self {
        self.start_fails = true;
        self
    }

    pub fn dump_fails(mut self) -> Self {
        self.dump_fails = true;
        self
    }

    pub fn version_output(mut self, output: &str) -> Self {
        self.version_output = Some(output.to_string());
        self
    }

    /// Old MariaDB images only ship the `mysql` client.
    pub fn without_mariadb_client(mut self) -> Self {
        self.mariadb_client_missing = true;
        self
    }
}

pub fn failure(action: &str) -> RuntimeError {
    RuntimeError::Command(CommandError::Spawn(
        io::Error::other("simulated failure"),
        format!("docker {action}"),
    ))
}

#[derive(Default)]
pub struct FakeRuntime {
    pub containers: Vec<(String, FakeContainer)>,
    pub list_fails: bool,
    pub log: Rc<RefCell<Vec<Call>>>,
    pub cancel_on_stop: Option<(String, Arc<AtomicBool>)>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, container: FakeContainer) -> Self {
        self.containers.push((name.to_string(), container));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.borrow().clone()
    }

    /// Stops, dumps, starts and archives, in the order they happened.
    pub fn actions(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| {
                matches!(
                    call,
                    Call::Stop(_) | Call::Start(_) | Call::Dump(..) | Call::Archive
                )
            })
            .collect()
    }

    pub fn archiver(&self, fails: bool) -> FakeArchiver {
        FakeArchiver {
            fails,
            log: Rc::clone(&self.log),
        }
    }

    fn find(&self, container: &ContainerRef) -> Result<&FakeContainer, RuntimeError> {
        self.containers
            .iter()
            .find(|(name, _)| name == container.name())
            .map(|(_, fake)| fake)
            .ok_or_else(|| RuntimeError::NotFound(container.clone()))
    }

    fn record(&self, call: Call) {
        self.log.borrow_mut().push(call);
    }
}

impl ContainerRuntime for FakeRuntime {
    fn list_running(&self) -> Result<Vec<ContainerRef>, RuntimeError> {
        self.record(Call::List);

        if self.list_fails {
            return Err(failure("ps"));
        }

        Ok(self
            .containers
            .iter()
            .map(|(name, _)| ContainerRef::new(name.clone()))
            .collect())
    }

    fn inspect(&self, container: &ContainerRef) -> Result<ContainerConfig, RuntimeError> {
        self.record(Call::Inspect(container.name().to_string()));

        let fake = self.find(container)?;
        if fake.inspect_fails {
            return Err(failure("inspect"));
        }

        Ok(ContainerConfig {
            image: fake.image.clone(),
            env: fake.env.clone(),
        })
    }

    fn stop(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        self.record(Call::Stop(container.name().to_string()));

        if let Some((name, flag)) = &self.cancel_on_stop {
            if name == container.name() {
                flag.store(true, Ordering::SeqCst);
            }
        }

        if self.find(container)?.stop_fails {
            return Err(failure("stop"));
        }

        Ok(())
    }

    fn start(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        self.record(Call::Start(container.name().to_string()));

        if self.find(container)?.start_fails {
            return Err(failure("start"));
        }

        Ok(())
    }

    fn exec_capture(&self, container: &ContainerRef, command: &[&str]) -> Result<String, RuntimeError> {
        self.record(Call::Exec(
            container.name().to_string(),
            command.iter().map(|arg| arg.to_string()).collect(),
        ));

        let fake = self.find(container)?;
        if fake.mariadb_client_missing && command.first() == Some(&"mariadb") {
            return Err(failure("exec"));
        }

        fake.version_output.clone().ok_or_else(|| failure("exec"))
    }

    fn exec_dump(&self, invocation: &DumpInvocation, mut output: File) -> Result<(), RuntimeError> {
        self.record(Call::Dump(
            invocation.container.name().to_string(),
            invocation.command.clone(),
        ));

        let fake = self.find(&invocation.container)?;

        output
            .write_all(format!("-- dump of {}\n", invocation.container).as_bytes())
            .map_err(|e| RuntimeError::Command(CommandError::Wait(e, "docker exec".into())))?;

        if fake.dump_fails {
            return Err(failure("exec"));
        }

        Ok(())
    }
}

pub struct FakeArchiver {
    pub fails: bool,
    pub log: Rc<RefCell<Vec<Call>>>,
}

impl VolumeArchiver for FakeArchiver {
    fn archive(&self, _source: &Path, destination: &Path) -> Result<PathBuf, ArchiveError> {
        self.log.borrow_mut().push(Call::Archive);

        if self.fails {
            return Err(ArchiveError::Io(io::Error::other("disk full"), "write archive"));
        }

        Ok(destination.join("docker_volumes_backup_20260101_000000.tar.gz"))
    }
}

pub fn stop(name: &str) -> Call {
    Call::Stop(name.to_string())
}

pub fn start(name: &str) -> Call {
    Call::Start(name.to_string())
}

pub fn dumped(calls: &[Call], name: &str) -> bool {
    calls
        .iter()
        .any(|call| matches!(call, Call::Dump(container, _) if container == name))
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}
