//! Database engines and classification of containers by image.
//!

use core::fmt;

use crate::runtime::{self, ContainerRef, ContainerRuntime, InspectionError};

/// A database engine recognised from a container image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    /// MySQL
    MySql,

    /// MariaDB
    MariaDb,

    /// PostgreSQL
    PostgreSql,

    /// MongoDB
    MongoDb,

    /// Redis, recognised but not dumped.
    Redis,

    /// Oracle, recognised but not dumped.
    Oracle,

    /// SQL Server, recognised but not dumped.
    SqlServer,
}

/// Image substrings checked in order, the first match wins.
///
/// `mariadb` comes before `mysql` because MariaDB images commonly mention both.
const IMAGE_TOKENS: [(&str, Engine); 7] = [
    ("mariadb", Engine::MariaDb),
    ("mysql", Engine::MySql),
    ("postgres", Engine::PostgreSql),
    ("mongo", Engine::MongoDb),
    ("redis", Engine::Redis),
    ("oracle", Engine::Oracle),
    ("mssql", Engine::SqlServer),
];

impl Engine {
    /// Classify an image reference, `None` if it is not a known database.
    pub fn from_image(image: &str) -> Option<Self> {
        let image = image.to_lowercase();

        IMAGE_TOKENS
            .iter()
            .find(|(token, _)| image.contains(token))
            .map(|(_, engine)| *engine)
    }

    /// The engine's display name, also used in backup file names.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MySql => "MySQL",
            Self::MariaDb => "MariaDB",
            Self::PostgreSql => "PostgreSQL",
            Self::MongoDb => "MongoDB",
            Self::Redis => "Redis",
            Self::Oracle => "Oracle",
            Self::SqlServer => "SQLServer",
        }
    }

    /// If a dump can be produced for this engine.
    pub fn is_dump_supported(&self) -> bool {
        self.file_extension().is_some()
    }

    /// The extension of this engine's dump file.
    pub fn file_extension(&self) -> Option<&'static str> {
        match self {
            Self::MySql | Self::MariaDb | Self::PostgreSql => Some("sql"),
            Self::MongoDb => Some("archive"),
            Self::Redis | Self::Oracle | Self::SqlServer => None,
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A container tagged with the engine it runs, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedContainer {
    /// The container.
    pub container: ContainerRef,

    /// The engine, `None` for application workloads.
    pub engine: Option<Engine>,
}

impl ClassifiedContainer {
    /// If this container runs a database.
    pub fn is_database(&self) -> bool {
        self.engine.is_some()
    }
}

/// Classify a container from its live image reference.
///
/// `Ok(None)` means the image is confirmed not to be a database, an error means the
/// container could not be inspected at all.
pub fn classify<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    container: &ContainerRef,
) -> Result<Option<Engine>, InspectionError> {
    let config = runtime::inspect(runtime, container)?;

    Ok(Engine::from_image(&config.image))
}
