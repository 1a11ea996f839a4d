//! First-error-wins cleanup.

use localnet_core::error::{LocalnetError, Result};

use crate::services::Service;

/// Runs every cleanup step it is given and remembers the first failure.
#[derive(Debug, Default)]
#[must_use = "call finish() to get the first error"]
pub struct Teardown {
    first: Option<LocalnetError>,
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one step.
    pub fn step(&mut self, name: &str, result: Result<()>) {
        if let Err(e) = result {
            tracing::warn!(step = name, error = %e, "Teardown step failed");
            if self.first.is_none() {
                self.first = Some(e);
            }
        }
    }

    /// Destroy `service` as one step.
    pub fn destroy(&mut self, service: &mut dyn Service) {
        let result = service.destroy();
        self.step(service.name(), result);
    }

    /// The first recorded error, if any.
    pub fn finish(self) -> Result<()> {
        match self.first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Destroy `services` in order, attempting each exactly once.
pub fn destroy_all(services: &mut [&mut dyn Service]) -> Result<()> {
    let mut teardown = Teardown::new();
    for service in services.iter_mut() {
        teardown.destroy(&mut **service);
    }
    teardown.finish()
}
