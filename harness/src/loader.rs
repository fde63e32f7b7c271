use std::process::{Command, Stdio};

use backend::{Entry, LoadingError};
use tracing::info;

use crate::bootstrap::{Capability, ProvisionError};

/// A shell free installer command, `program arg0 arg1 ...`.
#[derive(Debug, Clone, PartialEq)]
pub struct Installer {
    program: String,
    args: Vec<String>,
}

impl Installer {
    /// Splits on whitespace. Returns `None` for a blank command.
    pub fn parse(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;

        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Runs to completion. Output goes to stderr to keep stdout clean.
    pub fn run(&self) -> Result<(), ProvisionError> {
        info!("Running installer {} {:?}", self.program, self.args);
        let status = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(std::io::stderr()))
            .status()
            .map_err(|source| ProvisionError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(ProvisionError::Failed {
                program: self.program.clone(),
                status: status.to_string(),
            })
        }
    }
}

/// The Vulkan loader library, loaded at runtime.
pub struct VulkanLoader {
    installer: Option<Installer>,
}

impl VulkanLoader {
    pub fn new(installer: Option<&str>) -> Self {
        Self {
            installer: installer.and_then(Installer::parse),
        }
    }
}

impl Capability for VulkanLoader {
    type Handle = Entry;
    type Error = LoadingError;

    fn name(&self) -> &str {
        "Vulkan loader"
    }

    fn acquire(&mut self) -> Result<Entry, LoadingError> {
        backend::load_entry()
    }

    fn provision(&mut self) -> Result<(), ProvisionError> {
        self.installer
            .as_ref()
            .ok_or(ProvisionError::NoInstaller)?
            .run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_args() {
        let installer = Installer::parse("  apt-get install -y   libvulkan1 ").unwrap();
        assert_eq!(installer.program(), "apt-get");
        assert_eq!(installer.args, vec!["install", "-y", "libvulkan1"]);
        assert!(Installer::parse("   ").is_none());
    }

    #[test]
    fn loader_without_installer() {
        let mut loader = VulkanLoader::new(None);
        assert!(matches!(loader.provision(), Err(ProvisionError::NoInstaller)));
    }

    #[test]
    fn missing_installer_program() {
        let installer = Installer::parse("/nonexistent/vulten-installer --yes").unwrap();
        assert!(matches!(installer.run(), Err(ProvisionError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn installer_exit_status() {
        assert!(Installer::parse("true").unwrap().run().is_ok());
        assert!(matches!(
            Installer::parse("false").unwrap().run(),
            Err(ProvisionError::Failed { .. })
        ));
    }
}
