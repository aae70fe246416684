//! The containers running at the start of a run.
//!

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    context::Context,
    engine::{self, ClassifiedContainer},
    runtime::{ContainerRef, ContainerRuntime, InspectionError, RuntimeError},
};

/// List every running container. An empty list is not an error.
pub fn list_running<R: ContainerRuntime + ?Sized>(
    runtime: &R,
) -> Result<Vec<ContainerRef>, DiscoveryError> {
    Ok(runtime.list_running()?)
}

/// Running containers split into database and application workloads.
///
/// Every classified container is in exactly one of the two sets, both in runtime order.
#[derive(Debug, Default)]
pub struct Inventory {
    /// Containers running a recognised database engine.
    pub databases: Vec<ClassifiedContainer>,

    /// Every other container, including those that could not be inspected.
    pub applications: Vec<ClassifiedContainer>,

    /// Running containers left out of the run by configuration.
    pub excluded: Vec<ContainerRef>,

    /// Containers that could not be inspected and were treated as applications.
    pub inspection_errors: Vec<InspectionError>,
}

impl Inventory {
    /// Partition classified containers, keeping their order.
    pub fn partition(classified: Vec<ClassifiedContainer>) -> Self {
        let (databases, applications) = classified
            .into_iter()
            .partition(ClassifiedContainer::is_database);

        Self {
            databases,
            applications,
            ..Self::default()
        }
    }

    /// Every classified container, databases first.
    pub fn all(&self) -> impl Iterator<Item = &ClassifiedContainer> {
        self.databases.iter().chain(self.applications.iter())
    }

    /// The number of classified containers.
    pub fn len(&self) -> usize {
        self.databases.len() + self.applications.len()
    }

    /// If no container was classified.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// List and classify the running containers, leaving out `excluded` names.
///
/// A container that cannot be inspected is treated as an application, never as a database.
pub fn take_inventory<R: ContainerRuntime + ?Sized>(
    context: &mut Context,
    runtime: &R,
    excluded: &[String],
) -> Result<Inventory, DiscoveryError> {
    context.enter("Inventory");

    let running = list_running(runtime)?;
    info!("{context}Found {} running containers", running.len());

    let mut classified = Vec::with_capacity(running.len());
    let mut skipped = Vec::new();
    let mut inspection_errors = Vec::new();

    for container in running {
        context.focus(&container);

        if excluded.iter().any(|name| name == container.name()) {
            info!("{context}Excluded by configuration");
            skipped.push(container);
            continue;
        }

        let engine = match engine::classify(runtime, &container) {
            Ok(engine) => engine,
            Err(error) => {
                warn!("{context}Treating as an application: {error}");
                inspection_errors.push(error);
                None
            }
        };

        match engine {
            Some(engine) => debug!("{context}Classified as {engine}"),
            None => debug!("{context}Not a database"),
        }

        classified.push(ClassifiedContainer { container, engine });
    }

    let mut inventory = Inventory::partition(classified);
    inventory.excluded = skipped;
    inventory.inspection_errors = inspection_errors;

    context.container = None;
    info!(
        "{context}{} database containers, {} application containers, {} excluded",
        inventory.databases.len(),
        inventory.applications.len(),
        inventory.excluded.len()
    );

    Ok(inventory)
}

/// The running containers could not be listed.
#[derive(Debug, Error)]
#[error("Failed to list running containers:\n{0}")]
pub struct DiscoveryError(#[from] pub RuntimeError);
