use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::exec::{run_checked, run_spawned, CommandRunner, CommandSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageBackend {
    Pacman,
    Apt,
    Dnf,
}

impl PackageBackend {
    pub const PRIORITY: [PackageBackend; 3] =
        [PackageBackend::Pacman, PackageBackend::Apt, PackageBackend::Dnf];

    pub fn program(self) -> &'static str {
        match self {
            PackageBackend::Pacman => "pacman",
            PackageBackend::Apt => "apt-get",
            PackageBackend::Dnf => "dnf",
        }
    }

    pub fn detect(is_available: impl Fn(&str) -> bool) -> Result<Self> {
        Self::PRIORITY
            .into_iter()
            .find(|b| is_available(b.program()))
            .ok_or(Error::NoBackend {
                kind: "package manager",
            })
    }

    fn query(self, pkg: &str) -> CommandSpec {
        match self {
            PackageBackend::Pacman => CommandSpec::new("pacman").args(["-Qi", pkg]),
            PackageBackend::Apt => CommandSpec::new("dpkg").args(["-s", pkg]),
            PackageBackend::Dnf => CommandSpec::new("rpm").args(["-q", pkg]),
        }
    }

    fn install(self, pkg: &str) -> CommandSpec {
        match self {
            PackageBackend::Pacman => {
                CommandSpec::new("pacman").args(["-S", "--needed", "--noconfirm", pkg])
            }
            PackageBackend::Apt => CommandSpec::new("apt-get").args(["install", "-y", pkg]),
            PackageBackend::Dnf => CommandSpec::new("dnf").args(["install", "-y", pkg]),
        }
    }

    fn remove(self, pkg: &str) -> CommandSpec {
        match self {
            PackageBackend::Pacman => CommandSpec::new("pacman").args(["-Rsn", "--noconfirm", pkg]),
            PackageBackend::Apt => CommandSpec::new("apt-get").args(["remove", "-y", pkg]),
            PackageBackend::Dnf => CommandSpec::new("dnf").args(["remove", "-y", pkg]),
        }
    }
}

pub struct PackageManager<'r> {
    runner: &'r dyn CommandRunner,
    backend: PackageBackend,
    sudo: bool,
}

impl<'r> PackageManager<'r> {
    pub fn new(runner: &'r dyn CommandRunner, backend: PackageBackend, sudo: bool) -> Self {
        Self {
            runner,
            backend,
            sudo,
        }
    }

    pub fn backend(&self) -> PackageBackend {
        self.backend
    }

    pub fn is_installed(&self, pkg: &str) -> Result<bool> {
        Ok(run_spawned(self.runner, &self.backend.query(pkg))?.ok())
    }

    /// Install unless already present; a failed install is fatal.
    pub fn install_or_fail(&self, pkg: &str) -> Result<()> {
        if self.is_installed(pkg)? {
            return Ok(());
        }
        info!(package = pkg, "install package");
        run_checked(self.runner, &self.backend.install(pkg).privileged(self.sudo))?;
        Ok(())
    }

    pub fn uninstall(&self, pkg: &str) -> Result<()> {
        if !self.is_installed(pkg)? {
            return Ok(());
        }
        info!(package = pkg, "uninstall package");
        run_checked(self.runner, &self.backend.remove(pkg).privileged(self.sudo))?;
        Ok(())
    }
}
