use serde::Serialize;

use crate::error::Result;
use crate::orchestrator::Orchestrator;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    pub description: String,
    pub ok: bool,
    pub debug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub ok: bool,
    pub checks: Vec<Check>,
    pub debug: String,
}

impl StatusReport {
    pub fn failed(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| !c.ok)
    }
}

#[derive(Default)]
struct Checks {
    checks: Vec<Check>,
}

impl Checks {
    fn push(&mut self, description: impl Into<String>, ok: bool, debug: impl Into<String>) {
        self.checks.push(Check {
            description: description.into(),
            ok,
            debug: debug.into(),
        });
    }

    /// A query that errors counts as a failed check carrying the error text.
    fn probe(
        &mut self,
        description: impl Into<String>,
        res: Result<bool>,
        debug: impl Into<String>,
    ) {
        match res {
            Ok(ok) => self.push(description, ok, debug),
            Err(err) => self.push(description, false, err.chain()),
        }
    }
}

impl Orchestrator<'_> {
    /// Health of the environment; never fails, every problem becomes a check.
    pub fn status(&self) -> StatusReport {
        let mut c = Checks::default();
        let home = &self.layout.home;

        c.push(
            "config home exists",
            home.is_dir(),
            home.display().to_string(),
        );
        c.probe(
            "a runtime version is installed",
            self.store.has_installed_runtime(),
            format!("{} versions --bare", self.store.tool_path().display()),
        );

        match &self.packages {
            Some(pm) => {
                for pkg in &self.config.packages {
                    c.probe(
                        format!("package {pkg} is installed"),
                        pm.is_installed(pkg),
                        format!("{:?}", pm.backend()),
                    );
                }
            }
            None => {
                for pkg in &self.config.packages {
                    c.push(
                        format!("package {pkg} is installed"),
                        false,
                        "no compatible package manager found",
                    );
                }
            }
        }

        let proxy = &self.config.proxy_service;
        c.probe(
            format!("{proxy} is running"),
            self.services.is_running(proxy),
            format!("{:?}", self.services.backend()),
        );

        match self.utilized_versions() {
            Ok(versions) => {
                for version in &versions {
                    c.probe(
                        format!("{version} is installed"),
                        self.store.is_installed(version),
                        self.layout.version_dir(version).display().to_string(),
                    );
                    let service = self.service_name(version);
                    c.probe(
                        format!("{service} is running"),
                        self.services.is_running(&service),
                        service.clone(),
                    );
                    let socket = self.layout.socket_path(version);
                    c.push(
                        format!("{version} socket exists"),
                        socket.exists(),
                        socket.display().to_string(),
                    );
                }
            }
            Err(err) => c.push("utilized versions resolve", false, err.chain()),
        }

        let primary = self.layout.primary_socket_path();
        let linked = match (std::fs::read_link(&primary), self.store.global_default()) {
            (Ok(target), Ok(Some(global))) => target == self.layout.socket_path(&global),
            _ => false,
        };
        c.push(
            "primary socket links to the global default",
            linked,
            primary.display().to_string(),
        );

        let ok = c.checks.iter().all(|x| x.ok);
        StatusReport {
            ok,
            checks: c.checks,
            debug: format!(
                "services={:?} packages={:?} home={}",
                self.backends.services,
                self.backends.packages,
                home.display()
            ),
        }
    }
}
