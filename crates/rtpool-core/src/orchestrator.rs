//! Lifecycle operations over versions, pools, sockets and site isolations.
//!
//! Every operation validates first and mutates second. A failure halfway
//! through leaves the completed steps in place; running the same operation
//! again converges.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result, ToolError};
use crate::exec::CommandRunner;
use crate::fsutil::{self, Owner};
use crate::host::HostBackends;
use crate::packages::PackageManager;
use crate::paths::Layout;
use crate::pool::PoolConfigurator;
use crate::services::ServiceManager;
use crate::sites::SiteLedger;
use crate::store::{StoreSettings, VersionStore};
use crate::stubs::Stubs;
use crate::utilization;
use crate::version::{validate, Normalizer, RuntimeVersion, SupportedCatalog};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub default: RuntimeVersion,
    /// The default had to be installed because nothing was.
    pub installed_default: bool,
    pub restarted: Vec<RuntimeVersion>,
    pub primary_socket: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SwitchOutcome {
    AlreadyActive {
        version: RuntimeVersion,
    },
    Switched {
        version: RuntimeVersion,
        stopped: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IsolateReport {
    pub site: String,
    pub version: RuntimeVersion,
    pub previous: Option<RuntimeVersion>,
    pub stopped: Option<RuntimeVersion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnisolateReport {
    pub site: String,
    pub previous: Option<RuntimeVersion>,
    pub stopped: Option<RuntimeVersion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub stopped: Vec<RuntimeVersion>,
    pub uninstalled: Vec<RuntimeVersion>,
    pub removed_packages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Which {
    pub version: Option<RuntimeVersion>,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionsReport {
    pub global: Option<RuntimeVersion>,
    pub installed: Vec<RuntimeVersion>,
    pub catalog: Vec<RuntimeVersion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IsolatedSite {
    pub site: String,
    pub version: RuntimeVersion,
}

pub struct Orchestrator<'r> {
    pub(crate) layout: Layout,
    pub(crate) config: Config,
    pub(crate) owner: Owner,
    pub(crate) backends: HostBackends,
    pub(crate) store: VersionStore<'r>,
    pub(crate) services: ServiceManager<'r>,
    pub(crate) packages: Option<PackageManager<'r>>,
    pub(crate) pool: PoolConfigurator,
    pub(crate) sites: SiteLedger,
}

impl<'r> Orchestrator<'r> {
    pub fn new(
        runner: &'r dyn CommandRunner,
        config: Config,
        layout: Layout,
        backends: HostBackends,
        owner: Owner,
    ) -> Result<Self> {
        let normalizer = Normalizer::new(&config.tag)?;
        let stubs = Stubs::with_overrides(layout.stubs_dir());
        let store = VersionStore::new(
            runner,
            normalizer.clone(),
            StoreSettings {
                tool: config.tool(&layout.tool_root),
                tool_root: layout.tool_root.clone(),
                runtime_binary: config.runtime_binary.clone(),
                system_binary: config.system_binary.clone(),
                install_profile: config.install_profile.clone(),
                install_extensions: config.install_extensions.clone(),
            },
        );
        let services = ServiceManager::new(runner, backends.services, config.sudo);
        let packages = backends
            .packages
            .map(|b| PackageManager::new(runner, b, config.sudo));
        let pool = PoolConfigurator::new(layout.clone(), stubs.clone(), owner.clone());
        let sites = SiteLedger::new(
            layout.clone(),
            normalizer,
            config.tld.clone(),
            config.paths.clone(),
            stubs,
            owner.clone(),
        );
        Ok(Self {
            layout,
            config,
            owner,
            backends,
            store,
            services,
            packages,
            pool,
            sites,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backends(&self) -> HostBackends {
        self.backends
    }

    pub fn store(&self) -> &VersionStore<'r> {
        &self.store
    }

    pub fn sites(&self) -> &SiteLedger {
        &self.sites
    }

    /// `<service_prefix>@<raw version>`
    pub fn service_name(&self, version: &RuntimeVersion) -> String {
        format!("{}@{}", self.config.service_prefix, version.raw())
    }

    fn tool_missing(&self) -> Error {
        ToolError::NotAvailable {
            program: self.store.tool_path().display().to_string(),
        }
        .into()
    }

    fn package_manager(&self) -> Result<&PackageManager<'r>> {
        self.packages.as_ref().ok_or(Error::NoBackend {
            kind: "package manager",
        })
    }

    fn catalog(&self) -> Result<SupportedCatalog> {
        self.store.list_supported_catalog()
    }

    /// Validate free-form input against the live catalog.
    pub fn resolve_version(&self, input: &str) -> Result<RuntimeVersion> {
        validate(self.store.normalizer(), input, &self.catalog()?, None)
    }

    fn reload_proxy(&self) -> Result<()> {
        self.services.reload(&self.config.proxy_service)
    }

    pub fn utilized_versions(&self) -> Result<BTreeSet<RuntimeVersion>> {
        let catalog = self.catalog()?;
        let global = self.store.global_default()?;
        let configs = self.sites.read_all()?;
        Ok(utilization::utilized_versions(
            self.store.normalizer(),
            &catalog,
            global.as_ref(),
            configs.iter().map(|(_, text)| text.as_str()),
        ))
    }

    pub fn isolated_sites(&self) -> Result<Vec<IsolatedSite>> {
        let catalog = self.catalog()?;
        Ok(self
            .sites
            .isolated_sites(&catalog)?
            .into_iter()
            .map(|(site, version)| IsolatedSite { site, version })
            .collect())
    }

    /// A leftover socket file (not a link) where the primary link belongs.
    fn remove_stale_primary_socket(&self) -> Result<()> {
        let path = self.layout.primary_socket_path();
        match std::fs::symlink_metadata(&path) {
            Ok(meta) if !meta.file_type().is_symlink() => {
                info!(path = %path.display(), "remove stale primary socket");
                fsutil::remove_file_if_exists(&path)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Bring the global default up: install one if none is installed, write its
    /// pool config, restart every utilized pool and point the primary socket at
    /// the default's socket.
    pub fn install(&self) -> Result<InstallReport> {
        let mut installed_default = false;
        if !self.store.has_installed_runtime()? {
            let catalog = self.catalog()?;
            let newest = catalog.newest().cloned().ok_or_else(|| self.tool_missing())?;
            self.store.install(&newest)?;
            installed_default = true;
        }

        let default = match self.store.global_default()? {
            Some(v) => v,
            None => {
                let v = self
                    .store
                    .list_installed()?
                    .into_iter()
                    .max_by_key(|v| v.groups())
                    .ok_or_else(|| self.tool_missing())?;
                self.store.set_global_default(&v)?;
                v
            }
        };

        self.pool.write_config(&default)?;
        self.remove_stale_primary_socket()?;
        let restarted = self.restart(None)?;

        let primary = self.layout.primary_socket_path();
        fsutil::symlink_replace(&self.layout.socket_path(&default), &primary, &self.owner)?;
        info!(%default, "primary socket linked");

        Ok(InstallReport {
            default,
            installed_default,
            restarted,
            primary_socket: primary,
        })
    }

    /// Make `requested` the global default. Without `force`, an already active
    /// version is reported and nothing is touched.
    pub fn switch_global(&self, requested: &str, force: bool) -> Result<SwitchOutcome> {
        let catalog = self.catalog()?;
        let current = self.store.global_default()?;
        let version = validate(self.store.normalizer(), requested, &catalog, current.as_ref())?;

        if !force && current.as_ref() == Some(&version) {
            info!(%version, "already using");
            return Ok(SwitchOutcome::AlreadyActive { version });
        }

        self.store.ensure_installed(&version)?;
        self.store.set_global_default(&version)?;
        let stopped = self.stop_running()?;
        self.install()?;
        self.reload_proxy()?;
        Ok(SwitchOutcome::Switched { version, stopped })
    }

    /// Pin the site served from `directory` to `requested`.
    pub fn isolate(&self, directory: &Path, requested: &str) -> Result<IsolateReport> {
        let site = self.sites.resolve(directory)?;
        let catalog = self.catalog()?;
        let current = self.store.global_default()?;
        let version = validate(self.store.normalizer(), requested, &catalog, current.as_ref())?;

        self.store.ensure_installed(&version)?;
        let previous = self.sites.custom_version(&site.name, &catalog)?;
        self.pool.write_config(&version)?;
        self.sites.isolate(&site, &version)?;

        let stopped = match &previous {
            Some(prev) if *prev != version => self.stop_unused(Some(prev))?.then(|| prev.clone()),
            _ => None,
        };
        self.services.restart(&self.service_name(&version))?;
        self.reload_proxy()?;

        Ok(IsolateReport {
            site: site.name,
            version,
            previous,
            stopped,
        })
    }

    /// Return the site to the global default. A site without an override is
    /// left alone.
    pub fn unisolate(&self, directory: &Path) -> Result<UnisolateReport> {
        let site = self.sites.resolve(directory)?;
        let catalog = self.catalog()?;
        let Some(previous) = self.sites.custom_version(&site.name, &catalog)? else {
            info!(site = %site.name, "site is not isolated");
            return Ok(UnisolateReport {
                site: site.name,
                previous: None,
                stopped: None,
            });
        };

        self.sites.remove_isolation(&site.name)?;
        let stopped = self.stop_unused(Some(&previous))?.then(|| previous.clone());
        self.reload_proxy()?;

        Ok(UnisolateReport {
            site: site.name,
            previous: Some(previous),
            stopped,
        })
    }

    /// Stop `version`'s pool unless some site or the global default still uses
    /// it. Returns whether a stop was issued.
    pub fn stop_unused(&self, version: Option<&RuntimeVersion>) -> Result<bool> {
        let Some(version) = version else {
            return Ok(false);
        };
        if self.utilized_versions()?.contains(version) {
            return Ok(false);
        }
        self.services.stop(&self.service_name(version))?;
        Ok(true)
    }

    /// Stop the pool of every cataloged version that is running.
    pub fn stop_all(&self) -> Result<Vec<RuntimeVersion>> {
        let mut stopped = Vec::new();
        for version in self.catalog()?.iter() {
            let name = self.service_name(version);
            if self.services.is_running(&name)? {
                self.services.stop(&name)?;
                stopped.push(version.clone());
            }
        }
        Ok(stopped)
    }

    /// Stop every running service carrying the worker prefix.
    pub fn stop_running(&self) -> Result<Vec<String>> {
        let prefix = format!("{}@", self.config.service_prefix);
        let running = self.services.list_running_with_prefix(&prefix)?;
        for name in &running {
            self.services.stop(name)?;
        }
        Ok(running)
    }

    /// Restart one version's pool, or every utilized pool when `requested` is
    /// `None`.
    pub fn restart(&self, requested: Option<&str>) -> Result<Vec<RuntimeVersion>> {
        let versions: Vec<RuntimeVersion> = match requested {
            Some(input) => vec![self.resolve_version(input)?],
            None => self.utilized_versions()?.into_iter().collect(),
        };
        for version in &versions {
            self.services.restart(&self.service_name(version))?;
        }
        Ok(versions)
    }

    /// Install the configured OS packages (the reverse proxy).
    pub fn ensure_packages(&self) -> Result<Vec<String>> {
        let pm = self.package_manager()?;
        for pkg in &self.config.packages {
            pm.install_or_fail(pkg)?;
        }
        Ok(self.config.packages.clone())
    }

    /// Stop everything, uninstall every version and drop its log. With
    /// `purge_packages` the configured OS packages are removed too.
    pub fn uninstall(&self, purge_packages: bool) -> Result<TeardownReport> {
        let stopped = self.stop_all()?;
        let mut uninstalled = Vec::new();
        for version in self.store.list_installed()? {
            self.store.uninstall(&version)?;
            self.pool.remove_log(&version)?;
            uninstalled.push(version);
        }
        fsutil::remove_file_if_exists(&self.layout.primary_socket_path())?;

        let mut removed_packages = Vec::new();
        if purge_packages {
            let pm = self.package_manager()?;
            for pkg in &self.config.packages {
                pm.uninstall(pkg)?;
                removed_packages.push(pkg.clone());
            }
        }
        Ok(TeardownReport {
            stopped,
            uninstalled,
            removed_packages,
        })
    }

    /// Executable for `requested`, or for the global default.
    pub fn which(&self, requested: Option<&str>) -> Result<Which> {
        let version = match requested {
            Some(input) => Some(self.resolve_version(input)?),
            None => self.store.global_default()?,
        };
        let path = match &version {
            Some(v) => self.store.executable_path(v),
            None => self.config.system_binary.clone(),
        };
        Ok(Which { version, path })
    }

    pub fn versions(&self) -> Result<VersionsReport> {
        Ok(VersionsReport {
            global: self.store.global_default()?,
            installed: self.store.list_installed()?.into_iter().collect(),
            catalog: self.catalog()?.iter().cloned().collect(),
        })
    }
}
