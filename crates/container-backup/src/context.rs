//! Context for the current run. Used for prefixing logs.
//!

use core::fmt;

use crate::runtime::ContainerRef;

/// Holds the context for the current step of a run.
#[derive(Default, Debug)]
pub struct Context {
    /// The container being acted on.
    pub container: Option<ContainerRef>,

    /// The current stage.
    pub stage: &'static str,
}

impl Context {
    /// Move to a new stage, clearing the current container.
    pub fn enter(&mut self, stage: &'static str) {
        self.stage = stage;
        self.container = None;
    }

    /// Set the container being acted on.
    pub fn focus(&mut self, container: &ContainerRef) {
        self.container = Some(container.clone());
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.stage.is_empty() {
            write!(f, "[{}] ", self.stage)?;
        }

        if let Some(container) = &self.container {
            write!(f, "[{container}] ")?;
        }

        Ok(())
    }
}
