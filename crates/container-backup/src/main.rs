//! # container-backup
//! Stops, dumps, archives and restarts the containers on this host.
//!

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use core::sync::atomic::AtomicBool;
use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use clap::{Parser, Subcommand};
use container_backup::{
    Config, Context, LoadConfigError, Orchestrator,
    archive::TarArchiver,
    cancel, inventory,
    runtime::{ContainerRuntime, DockerCli},
};
use mimalloc::MiMalloc;
use shared::{Failure, init_logger};
use tracing::{Level, error, info, warn};

const DEFAULT_CONFIG: &str = "./config.toml";

#[derive(Debug, Parser)]
#[command(version, about = "Back up the database containers running on this host")]
struct Cli {
    /// Config file [default: ./config.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory to write backups to, overrides the config.
    #[arg(short, long)]
    destination: Option<PathBuf>,

    /// Container to leave untouched, may be repeated.
    #[arg(short, long = "exclude")]
    exclude: Vec<String>,

    /// Exit with a failure status if any container failed to back up, stop or start.
    #[arg(long)]
    strict: bool,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Action {
    /// Write the default config file.
    Init,

    /// List running containers and how they are classified.
    List,

    /// Run a backup. The default.
    Backup,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let _logger = init_logger(level, Path::new("./logs")).or_log_and_panic("Could not start logger");

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));

    let action = cli.action.unwrap_or(Action::Backup);
    if let Action::Init = action {
        let contents = toml::to_string_pretty(&Config::default())
            .or_log_and_panic("Could not serialize config file");
        fs::write(&config_path, contents).or_log_and_panic("Could not create config file");
        info!("Wrote default config to {}", config_path.display());
        return ExitCode::SUCCESS;
    }

    let config = load_config(&cli, config_path);
    let runtime = DockerCli::new(
        config.runtime_binary.clone(),
        config.command_timeout(),
        config.dump_timeout(),
    );

    match action {
        Action::List => list(&runtime, &config),
        Action::Init | Action::Backup => backup(&runtime, &config),
    }
}

fn load_config(cli: &Cli, path: PathBuf) -> Config {
    let mut config = match Config::load_toml(path) {
        Ok(config) => config,
        Err(LoadConfigError::NoFile) if cli.config.is_none() => {
            info!("No config file found, using defaults");
            Config::default()
        }
        Err(error) => shared::log_and_panic(error, "Could not load config"),
    };

    if let Some(destination) = &cli.destination {
        config.backup_directory = destination.clone();
    }
    config.excluded_containers.extend(cli.exclude.iter().cloned());
    config.fail_on_backup_error |= cli.strict;

    config
}

fn list<R: ContainerRuntime>(runtime: &R, config: &Config) -> ExitCode {
    let mut context = Context::default();

    let inventory =
        match inventory::take_inventory(&mut context, runtime, &config.excluded_containers) {
            Ok(inventory) => inventory,
            Err(error) => {
                error!("{error}");
                return ExitCode::FAILURE;
            }
        };

    if inventory.is_empty() && inventory.excluded.is_empty() {
        println!("No running containers found.");
    }

    for classified in inventory.all() {
        match classified.engine {
            Some(engine) if engine.is_dump_supported() => {
                println!("{}: {engine}", classified.container)
            }
            Some(engine) => println!("{}: {engine} (no backup support)", classified.container),
            None => println!("{}: not a database", classified.container),
        }
    }

    for container in &inventory.excluded {
        println!("{container}: excluded");
    }

    for error in &inventory.inspection_errors {
        println!("{error}");
    }

    ExitCode::SUCCESS
}

fn backup<R: ContainerRuntime>(runtime: &R, config: &Config) -> ExitCode {
    let mut context = Context::default();
    let archiver = TarArchiver {
        timeout: config.command_timeout(),
    };

    let cancelled = Arc::new(AtomicBool::new(false));
    if let Err(error) = cancel::cancel_on_signal(Arc::clone(&cancelled)) {
        warn!("Could not install shutdown signal handler, a signal will stop the run immediately: {error}");
    }

    match Orchestrator::new(runtime, &archiver, config)
        .with_cancellation(cancelled)
        .run(&mut context)
    {
        Ok(report) => {
            if report.has_failures() || report.cancelled {
                warn!("Backup report:\n{report}");
            } else {
                info!("Backup report:\n{report}");
            }

            if report.cancelled || (config.fail_on_backup_error && report.has_failures()) {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(error) => {
            error!("Backup run failed: {error}");
            if let Some(report) = error.report() {
                error!("Backup report:\n{report}");
            }
            ExitCode::FAILURE
        }
    }
}
