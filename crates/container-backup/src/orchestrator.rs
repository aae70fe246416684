//! Sequencing of a backup run.
//!
//! A run takes an inventory, stops application containers, dumps each database container,
//! stops the database containers, archives the volume directory, then starts everything it
//! stopped in reverse order: databases first, then applications.
//!
//! Failures on a single container are recorded and the run moves on. Only failing to list
//! containers, a missing volume directory, or a failed archive end the run as failed, and
//! containers stopped before an archive failure are still started again.
//!

use core::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    archive::{self, ArchiveError, VolumeArchiver},
    config::Config,
    context::Context,
    credentials::CredentialResolver,
    dump::{self, DumpError},
    engine::{ClassifiedContainer, Engine},
    inventory::{self, DiscoveryError},
    runtime::{ContainerRef, ContainerRuntime, InspectionError, RuntimeError},
};

/// The stages of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunState {
    /// Nothing has happened yet.
    #[default]
    Idle,
    /// Running containers have been listed and classified.
    Inventoried,
    /// Application containers have been stopped.
    ApplicationsStopped,
    /// Every database container has had a backup attempt.
    DatabasesBackedUp,
    /// Database containers have been stopped.
    DatabasesStopped,
    /// The volume directory has been archived.
    VolumesArchived,
    /// Stopped containers have been started again.
    Restored,
    /// The run finished.
    Done,
    /// The run hit an unrecoverable error.
    Failed,
}

/// The result of backing up one database container.
#[derive(Debug)]
pub struct BackupOutcome {
    /// The container.
    pub container: ContainerRef,

    /// The container's engine.
    pub engine: Engine,

    /// The written dump, or why there is none.
    pub result: Result<PathBuf, DumpError>,
}

impl BackupOutcome {
    /// If the dump completed.
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    /// The written dump.
    pub fn output_path(&self) -> Option<&Path> {
        self.result.as_deref().ok()
    }

    /// Why the backup failed.
    pub fn error(&self) -> Option<&DumpError> {
        self.result.as_ref().err()
    }
}

/// A runtime action on one container failed.
#[derive(Debug, Error)]
#[error("Failed to {action} container '{container}':\n{source}")]
pub struct StopStartError {
    /// The container acted on.
    pub container: ContainerRef,

    /// `stop` or `start`.
    pub action: &'static str,

    /// The runtime failure.
    #[source]
    pub source: RuntimeError,
}

/// Everything that happened during a run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// The last state reached.
    pub state: RunState,

    /// One outcome per database container that had a backup attempt, in inventory order.
    pub outcomes: Vec<BackupOutcome>,

    /// Application containers, in inventory order.
    pub applications: Vec<ContainerRef>,

    /// Containers that were stopped, in stop order.
    pub stopped: Vec<ContainerRef>,

    /// Containers that were started again, in start order.
    pub started: Vec<ContainerRef>,

    /// Containers that failed to stop.
    pub stop_failures: Vec<StopStartError>,

    /// Containers that failed to start.
    pub start_failures: Vec<StopStartError>,

    /// Containers left out by configuration.
    pub excluded: Vec<ContainerRef>,

    /// Containers that could not be inspected during inventory.
    pub inspection_errors: Vec<InspectionError>,

    /// The volume archive.
    pub archive: Option<PathBuf>,

    /// If the run was cancelled before every container was handled.
    pub cancelled: bool,
}

impl RunReport {
    /// The number of failed backups.
    pub fn failed_backups(&self) -> usize {
        self.outcomes.iter().filter(|outcome| !outcome.success()).count()
    }

    /// If any backup, stop or start failed.
    pub fn has_failures(&self) -> bool {
        self.failed_backups() > 0 || !self.stop_failures.is_empty() || !self.start_failures.is_empty()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run ended in state {:?}", self.state)?;

        for outcome in &self.outcomes {
            match &outcome.result {
                Ok(path) => writeln!(
                    f,
                    "  {} ({}): backed up to {}",
                    outcome.container,
                    outcome.engine,
                    path.display()
                )?,
                Err(error) => writeln!(
                    f,
                    "  {} ({}): FAILED: {error}",
                    outcome.container, outcome.engine
                )?,
            }
        }

        for container in &self.applications {
            let cause = self
                .inspection_errors
                .iter()
                .find(|error| &error.container == container);

            match cause {
                Some(error) => writeln!(f, "  {container}: not classified, not backed up: {error}")?,
                None => writeln!(f, "  {container}: application, not backed up")?,
            }
        }

        for container in &self.excluded {
            writeln!(f, "  {container}: excluded")?;
        }

        for error in self.stop_failures.iter().chain(&self.start_failures) {
            writeln!(f, "  {error}")?;
        }

        if let Some(archive) = &self.archive {
            writeln!(f, "  Volume archive: {}", archive.display())?;
        }

        if self.cancelled {
            writeln!(f, "  The run was cancelled")?;
        }

        write!(
            f,
            "{}/{} backups succeeded, {} containers stopped, {} started",
            self.outcomes.len() - self.failed_backups(),
            self.outcomes.len(),
            self.stopped.len(),
            self.started.len()
        )
    }
}

/// Drives a backup run.
pub struct Orchestrator<'a, R: ?Sized, A: ?Sized> {
    runtime: &'a R,
    archiver: &'a A,
    config: &'a Config,
    resolver: CredentialResolver,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a, R, A> Orchestrator<'a, R, A>
where
    R: ContainerRuntime + ?Sized,
    A: VolumeArchiver + ?Sized,
{
    /// Create an orchestrator.
    pub fn new(runtime: &'a R, archiver: &'a A, config: &'a Config) -> Self {
        Self {
            runtime,
            archiver,
            config,
            resolver: CredentialResolver::new(config.use_root_credentials),
            cancel: None,
        }
    }

    /// Watch `flag`. Once it is set no further container is stopped or backed up, but every
    /// container already stopped is started again.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Run a full backup.
    pub fn run(&self, context: &mut Context) -> Result<RunReport, RunError> {
        let mut report = RunReport::default();

        // Idle -> Inventoried
        let inventory =
            inventory::take_inventory(context, self.runtime, &self.config.excluded_containers)?;
        report.applications = inventory
            .applications
            .iter()
            .map(|classified| classified.container.clone())
            .collect();
        report.excluded = inventory.excluded;
        report.inspection_errors = inventory.inspection_errors;
        self.advance(context, &mut report, RunState::Inventoried);

        // Nothing is stopped until both directories are usable.
        context.enter("Preflight");
        archive::check_source(&self.config.volumes_directory).map_err(RunError::VolumeSource)?;
        fs::create_dir_all(&self.config.backup_directory).map_err(|e| {
            RunError::BackupDirectory(e, self.config.backup_directory.clone())
        })?;

        // Inventoried -> ApplicationsStopped
        context.enter("Stop applications");
        let stopped_applications = self.stop_all(context, &inventory.applications, &mut report);
        self.advance(context, &mut report, RunState::ApplicationsStopped);

        // ApplicationsStopped -> DatabasesBackedUp
        context.enter("Backup");
        for database in &inventory.databases {
            if self.check_cancelled(context, &mut report) {
                break;
            }

            let Some(engine) = database.engine else {
                continue;
            };

            context.focus(&database.container);
            let outcome = self.back_up(context, &database.container, engine);
            report.outcomes.push(outcome);
        }
        self.advance(context, &mut report, RunState::DatabasesBackedUp);

        // DatabasesBackedUp -> DatabasesStopped
        context.enter("Stop databases");
        let stopped_databases = self.stop_all(context, &inventory.databases, &mut report);
        self.advance(context, &mut report, RunState::DatabasesStopped);

        // DatabasesStopped -> VolumesArchived
        let mut archive_error = None;
        context.enter("Archive");
        if !self.check_cancelled(context, &mut report) {
            match self
                .archiver
                .archive(&self.config.volumes_directory, &self.config.backup_directory)
            {
                Ok(path) => {
                    info!("{context}Archived volumes to {}", path.display());
                    report.archive = Some(path);
                    self.advance(context, &mut report, RunState::VolumesArchived);
                }
                Err(error) => {
                    error!("{context}{error}");
                    archive_error = Some(error);
                }
            }
        }

        // VolumesArchived -> Restored
        context.enter("Restore");
        self.start_all(context, &stopped_databases, &mut report);
        self.start_all(context, &stopped_applications, &mut report);

        if let Some(source) = archive_error {
            self.advance(context, &mut report, RunState::Failed);
            return Err(RunError::Archive {
                source,
                report: Box::new(report),
            });
        }

        self.advance(context, &mut report, RunState::Restored);

        // Restored -> Done
        self.advance(context, &mut report, RunState::Done);

        Ok(report)
    }

    fn advance(&self, context: &mut Context, report: &mut RunReport, state: RunState) {
        context.container = None;
        debug!("{context}{:?} -> {state:?}", report.state);
        report.state = state;
    }

    fn check_cancelled(&self, context: &Context, report: &mut RunReport) -> bool {
        let cancelled = self
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst));

        if cancelled && !report.cancelled {
            warn!("{context}Cancelled, restarting stopped containers");
        }
        report.cancelled |= cancelled;

        cancelled
    }

    fn back_up(&self, context: &Context, container: &ContainerRef, engine: Engine) -> BackupOutcome {
        let result = self.dump(context, container, engine);
        match &result {
            Ok(path) => info!("{context}Backed up {engine} to {}", path.display()),
            Err(error) => error!("{context}Backup failed: {error}"),
        }

        BackupOutcome {
            container: container.clone(),
            engine,
            result,
        }
    }

    fn dump(
        &self,
        context: &Context,
        container: &ContainerRef,
        engine: Engine,
    ) -> Result<PathBuf, DumpError> {
        if !engine.is_dump_supported() {
            return Err(DumpError::UnsupportedEngine(engine));
        }

        let credentials = self.resolver.try_resolve(self.runtime, container, engine)?;

        let version = match engine {
            Engine::MariaDb => dump::probe_mariadb_version(self.runtime, container),
            _ => None,
        };
        if let Some(version) = version {
            debug!("{context}MariaDB server {version}");
        }

        let invocation = dump::build_dump_invocation(
            container,
            engine,
            &credentials,
            version,
            &self.config.backup_directory,
        )?;
        debug!("{context}{invocation:?}");

        dump::execute_dump(self.runtime, &invocation)?;

        Ok(invocation.output_path)
    }

    /// Stop each container, returning those that stopped.
    fn stop_all(
        &self,
        context: &mut Context,
        containers: &[ClassifiedContainer],
        report: &mut RunReport,
    ) -> Vec<ContainerRef> {
        let mut stopped = Vec::new();

        for classified in containers {
            if self.check_cancelled(context, report) {
                break;
            }

            let container = &classified.container;
            context.focus(container);

            match self.runtime.stop(container) {
                Ok(()) => {
                    info!("{context}Stopped");
                    stopped.push(container.clone());
                }
                Err(source) => {
                    let error = StopStartError {
                        container: container.clone(),
                        action: "stop",
                        source,
                    };
                    error!("{context}{error}");
                    report.stop_failures.push(error);
                }
            }
        }

        report.stopped.extend(stopped.iter().cloned());
        stopped
    }

    fn start_all(&self, context: &mut Context, containers: &[ContainerRef], report: &mut RunReport) {
        for container in containers {
            context.focus(container);

            match self.runtime.start(container) {
                Ok(()) => {
                    info!("{context}Started");
                    report.started.push(container.clone());
                }
                Err(source) => {
                    let error = StopStartError {
                        container: container.clone(),
                        action: "start",
                        source,
                    };
                    error!("{context}{error}");
                    report.start_failures.push(error);
                }
            }
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("Volume directory is unusable:\n{0}")]
    VolumeSource(#[source] ArchiveError),

    #[error("Failed to create backup directory '{1}':\n{0}")]
    BackupDirectory(#[source] io::Error, PathBuf),

    #[error("Failed to archive volumes:\n{source}")]
    Archive {
        #[source]
        source: ArchiveError,
        report: Box<RunReport>,
    },
}

impl RunError {
    /// The report of a run that failed after containers were touched.
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            Self::Archive { report, .. } => Some(report),
            _ => None,
        }
    }
}
