//! # Shared
//! Logging and failure handling shared between the container backup binary and its tests.
//!

#![warn(missing_docs)]

mod failure;
mod logger;

pub use failure::{Failure, log_and_panic};
pub use logger::{LoggerError, init_logger};
