use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::exec::{run_checked, run_spawned, CommandRunner, CommandSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceBackend {
    Systemd,
    OpenRc,
}

impl ServiceBackend {
    /// Probe order at startup.
    pub const PRIORITY: [ServiceBackend; 2] = [ServiceBackend::Systemd, ServiceBackend::OpenRc];

    pub fn program(self) -> &'static str {
        match self {
            ServiceBackend::Systemd => "systemctl",
            ServiceBackend::OpenRc => "rc-service",
        }
    }

    /// First backend whose program `is_available` accepts.
    pub fn detect(is_available: impl Fn(&str) -> bool) -> Result<Self> {
        Self::PRIORITY
            .into_iter()
            .find(|b| is_available(b.program()))
            .ok_or(Error::NoBackend {
                kind: "service manager",
            })
    }
}

pub struct ServiceManager<'r> {
    runner: &'r dyn CommandRunner,
    backend: ServiceBackend,
    sudo: bool,
}

impl<'r> ServiceManager<'r> {
    pub fn new(runner: &'r dyn CommandRunner, backend: ServiceBackend, sudo: bool) -> Self {
        Self {
            runner,
            backend,
            sudo,
        }
    }

    pub fn backend(&self) -> ServiceBackend {
        self.backend
    }

    fn action(&self, verb: &str, name: &str) -> CommandSpec {
        let spec = match self.backend {
            ServiceBackend::Systemd => CommandSpec::new("systemctl").args([verb, name]),
            ServiceBackend::OpenRc => CommandSpec::new("rc-service").args([name, verb]),
        };
        spec.privileged(self.sudo)
    }

    pub fn restart(&self, name: &str) -> Result<()> {
        info!(service = name, "restart");
        run_checked(self.runner, &self.action("restart", name))?;
        Ok(())
    }

    pub fn stop(&self, name: &str) -> Result<()> {
        info!(service = name, "stop");
        run_checked(self.runner, &self.action("stop", name))?;
        Ok(())
    }

    pub fn reload(&self, name: &str) -> Result<()> {
        info!(service = name, "reload");
        run_checked(self.runner, &self.action("reload", name))?;
        Ok(())
    }

    pub fn is_running(&self, name: &str) -> Result<bool> {
        let spec = match self.backend {
            ServiceBackend::Systemd => {
                CommandSpec::new("systemctl").args(["is-active", "--quiet", name])
            }
            ServiceBackend::OpenRc => CommandSpec::new("rc-service").args([name, "status"]),
        };
        let res = run_spawned(self.runner, &spec)?;
        Ok(res.ok())
    }

    /// Names of running services, without the `.service` unit suffix.
    pub fn list_running(&self) -> Result<Vec<String>> {
        let spec = match self.backend {
            ServiceBackend::Systemd => CommandSpec::new("systemctl").args([
                "list-units",
                "--type=service",
                "--state=running",
                "--no-legend",
                "--plain",
            ]),
            ServiceBackend::OpenRc => CommandSpec::new("rc-status").arg("--servicelist"),
        };
        let res = run_checked(self.runner, &spec)?;
        let out = res.stdout_str();
        let names = match self.backend {
            ServiceBackend::Systemd => out
                .lines()
                .filter_map(|l| l.split_whitespace().next())
                .map(|unit| unit.strip_suffix(".service").unwrap_or(unit).to_string())
                .collect(),
            ServiceBackend::OpenRc => out
                .lines()
                .filter(|l| l.contains("started"))
                .filter_map(|l| l.split_whitespace().next())
                .map(str::to_string)
                .collect(),
        };
        Ok(names)
    }

    /// Running services whose name starts with `prefix`.
    pub fn list_running_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = self.list_running()?;
        names.retain(|n| n.starts_with(prefix));
        Ok(names)
    }
}
