use std::convert::Infallible;

use backend::{Entry, InstanceError};
use tracing::warn;

use crate::{
    bootstrap::{Capability, ProvisionError},
    config::{BenchConfig, BenchSettings},
    error::BenchError,
};

/// A capability that is already present.
pub struct Preloaded<T: Clone>(pub T);

impl<T: Clone> Capability for Preloaded<T> {
    type Handle = T;
    type Error = Infallible;

    fn name(&self) -> &str {
        "preloaded"
    }

    fn acquire(&mut self) -> Result<T, Infallible> {
        Ok(self.0.clone())
    }

    fn provision(&mut self) -> Result<(), ProvisionError> {
        Ok(())
    }
}

pub fn small_config(n: i64, iterations: u64) -> BenchConfig {
    BenchConfig {
        n,
        iterations,
        device: 0,
        settings: BenchSettings {
            progress: false,
            verify: true,
            opt_l1: false,
        },
        installer: None,
    }
}

pub fn test_entry() -> Option<Entry> {
    match backend::load_entry() {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!("Skipping, no Vulkan loader: {e}");
            None
        }
    }
}

/// `None` when the machine has no usable device. Any other failure panics.
pub fn skip_without_device<T>(result: Result<T, BenchError>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(BenchError::Instance(
            e @ (InstanceError::NoDevice | InstanceError::CreateInstance(_)),
        )) => {
            warn!("Skipping, no Vulkan device: {e}");
            None
        }
        Err(e) => panic!("{e}"),
    }
}
