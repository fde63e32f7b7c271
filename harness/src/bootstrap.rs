//! Acquire an optional runtime dependency, provisioning it at most once.
//!
//! [`ensure`] tries the capability, runs its installer when it is missing,
//! then tries exactly once more. There is no retry loop and nothing is
//! rolled back when the second attempt fails.

use std::fmt::Display;

use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("no installer is configured")]
    NoInstaller,
    #[error("failed to start installer {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("installer {program} exited with {status}")]
    Failed { program: String, status: String },
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("{name} is missing and could not be installed: {source}")]
    Provision {
        name: String,
        #[source]
        source: ProvisionError,
    },
    #[error("{name} is still unavailable after installing it: {reason}")]
    Unavailable { name: String, reason: String },
}

pub trait Capability {
    type Handle;
    type Error: Display;

    fn name(&self) -> &str;
    fn acquire(&mut self) -> Result<Self::Handle, Self::Error>;
    fn provision(&mut self) -> Result<(), ProvisionError>;
}

pub fn ensure<C: Capability>(capability: &mut C) -> Result<C::Handle, BootstrapError> {
    match capability.acquire() {
        Ok(handle) => return Ok(handle),
        Err(e) => warn!("{} is not available ({e}), provisioning it", capability.name()),
    }

    capability
        .provision()
        .map_err(|source| BootstrapError::Provision {
            name: capability.name().to_string(),
            source,
        })?;
    info!("Provisioned {}", capability.name());

    capability
        .acquire()
        .map_err(|e| BootstrapError::Unavailable {
            name: capability.name().to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Present once `installed` is set, counting every call.
    struct FakeCapability {
        installed: bool,
        install_works: bool,
        fails_after_install: bool,
        acquires: u32,
        provisions: u32,
    }

    impl FakeCapability {
        fn new(installed: bool) -> Self {
            Self {
                installed,
                install_works: true,
                fails_after_install: false,
                acquires: 0,
                provisions: 0,
            }
        }
    }

    impl Capability for FakeCapability {
        type Handle = &'static str;
        type Error = &'static str;

        fn name(&self) -> &str {
            "fake"
        }

        fn acquire(&mut self) -> Result<Self::Handle, Self::Error> {
            self.acquires += 1;
            if self.installed && !self.fails_after_install {
                Ok("handle")
            } else {
                Err("not installed")
            }
        }

        fn provision(&mut self) -> Result<(), ProvisionError> {
            self.provisions += 1;
            if !self.install_works {
                return Err(ProvisionError::Failed {
                    program: "fake-installer".into(),
                    status: "exit status: 1".into(),
                });
            }
            self.installed = true;
            Ok(())
        }
    }

    #[test]
    fn present_skips_provisioning() {
        let mut cap = FakeCapability::new(true);
        assert_eq!(ensure(&mut cap).unwrap(), "handle");
        assert_eq!(cap.acquires, 1);
        assert_eq!(cap.provisions, 0);
    }

    #[test]
    fn absent_provisions_once_then_acquires() {
        let mut cap = FakeCapability::new(false);
        assert_eq!(ensure(&mut cap).unwrap(), "handle");
        assert_eq!(cap.provisions, 1);
        assert_eq!(cap.acquires, 2);
    }

    #[test]
    fn provision_failure_is_distinct() {
        let mut cap = FakeCapability::new(false);
        cap.install_works = false;

        let err = ensure(&mut cap).unwrap_err();
        assert!(matches!(err, BootstrapError::Provision { .. }));
        // No second acquisition after a failed install
        assert_eq!(cap.acquires, 1);
        assert_eq!(cap.provisions, 1);
    }

    #[test]
    fn still_missing_after_install() {
        let mut cap = FakeCapability::new(false);
        cap.fails_after_install = true;

        let err = ensure(&mut cap).unwrap_err();
        assert!(matches!(err, BootstrapError::Unavailable { .. }));
        assert_eq!(cap.acquires, 2);
        assert_eq!(cap.provisions, 1);
    }
}
