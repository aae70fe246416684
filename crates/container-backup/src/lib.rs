//! # container-backup
//! Backs up the database containers running on a single host.
//!

pub mod archive;
pub mod cancel;
pub mod command;
pub mod config;
pub mod context;
pub mod credentials;
pub mod dump;
pub mod engine;
pub mod inventory;
pub mod orchestrator;
pub mod runtime;

pub use config::{Config, LoadConfigError};
pub use context::Context;
pub use orchestrator::{Orchestrator, RunError, RunReport, RunState};
