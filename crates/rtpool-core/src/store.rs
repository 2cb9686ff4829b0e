//! Facade over the external version-manager tool (`rtenv`).
//!
//! Queries treat a missing tool as "nothing installed yet"; mutations surface
//! every failure with the tool's stderr.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Result, ToolError};
use crate::exec::{run_checked, CommandRunner, CommandSpec};
use crate::version::{Normalizer, RuntimeVersion, SupportedCatalog};

pub const ENV_EXTENSIONS: &str = "RTENV_EXTENSIONS";

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub tool: PathBuf,
    pub tool_root: PathBuf,
    pub runtime_binary: String,
    pub system_binary: PathBuf,
    pub install_profile: String,
    pub install_extensions: Vec<String>,
}

pub struct VersionStore<'r> {
    runner: &'r dyn CommandRunner,
    normalizer: Normalizer,
    settings: StoreSettings,
}

impl<'r> VersionStore<'r> {
    pub fn new(
        runner: &'r dyn CommandRunner,
        normalizer: Normalizer,
        settings: StoreSettings,
    ) -> Self {
        Self {
            runner,
            normalizer,
            settings,
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn tool_path(&self) -> &Path {
        &self.settings.tool
    }

    fn tool(&self) -> CommandSpec {
        CommandSpec::new(self.settings.tool.to_string_lossy())
    }

    /// `Ok(None)` when the tool is absent.
    fn query(&self, spec: CommandSpec) -> Result<Option<String>> {
        let res = match self.runner.run(&spec) {
            Ok(res) => res,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ToolError::Spawn {
                    command: spec.display(),
                    source,
                }
                .into())
            }
        };
        if res.program_not_found(&spec.program) {
            return Ok(None);
        }
        if !res.ok() {
            return Err(ToolError::CommandFailed {
                command: spec.display(),
                status: res.exit_status,
                stderr: res.stderr_str(),
            }
            .into());
        }
        Ok(Some(res.stdout_str()))
    }

    /// Once the tool has started, every non-zero exit is a failure of the
    /// mutation itself, whatever its stderr says.
    fn mutate(&self, spec: CommandSpec) -> Result<std::result::Result<(), String>> {
        match self.runner.run(&spec) {
            Ok(res) if res.ok() => Ok(Ok(())),
            Ok(res) => Ok(Err(res.stderr_str())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(self.not_available()),
            Err(source) => Err(ToolError::Spawn {
                command: spec.display(),
                source,
            }
            .into()),
        }
    }

    fn not_available(&self) -> crate::error::Error {
        ToolError::NotAvailable {
            program: self.settings.tool.display().to_string(),
        }
        .into()
    }

    fn parse_versions(&self, out: &str) -> Vec<RuntimeVersion> {
        out.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| self.normalizer.from_raw(l))
            .filter(|v| v.as_str().contains('@'))
            .collect()
    }

    pub fn list_installed(&self) -> Result<BTreeSet<RuntimeVersion>> {
        let out = self.query(self.tool().args(["versions", "--bare"]))?;
        Ok(out
            .map(|o| self.parse_versions(&o).into_iter().collect())
            .unwrap_or_default())
    }

    pub fn has_installed_runtime(&self) -> Result<bool> {
        Ok(!self.list_installed()?.is_empty())
    }

    pub fn is_installed(&self, version: &RuntimeVersion) -> Result<bool> {
        Ok(self.list_installed()?.contains(version))
    }

    /// Installable versions, header and snapshot lines dropped.
    pub fn list_supported_catalog(&self) -> Result<SupportedCatalog> {
        let Some(out) = self.query(self.tool().args(["install", "--list"]))? else {
            return Ok(SupportedCatalog::default());
        };
        let lines = out
            .lines()
            .map(str::trim)
            .filter(|l| !l.starts_with("Available") && !l.ends_with("snapshot"))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(SupportedCatalog::new(self.parse_versions(&lines)))
    }

    /// The tool's global default; `None` before anything is installed.
    pub fn global_default(&self) -> Result<Option<RuntimeVersion>> {
        let Some(out) = self.query(self.tool().arg("version-name"))? else {
            return Ok(None);
        };
        Ok(self.parse_versions(&out).into_iter().next())
    }

    pub fn set_global_default(&self, version: &RuntimeVersion) -> Result<()> {
        info!(%version, "set global default");
        run_checked(self.runner, &self.tool().args(["global", version.raw()]))?;
        Ok(())
    }

    /// Install with the development profile; a failed install is rolled back
    /// with an uninstall before the failure is returned.
    pub fn install(&self, version: &RuntimeVersion) -> Result<()> {
        info!(%version, "install runtime");
        let mut spec = self
            .tool()
            .args(["install", "--profile", &self.settings.install_profile])
            .arg(version.raw());
        if !self.settings.install_extensions.is_empty() {
            spec = spec.env(ENV_EXTENSIONS, self.settings.install_extensions.join(" "));
        }
        if let Err(stderr) = self.mutate(spec)? {
            if let Err(err) = self.uninstall(version) {
                warn!(%version, "cleanup after failed install: {err}");
            }
            return Err(ToolError::InstallFailed {
                version: version.to_string(),
                stderr,
            }
            .into());
        }
        run_checked(self.runner, &self.tool().arg("rehash"))?;
        Ok(())
    }

    pub fn uninstall(&self, version: &RuntimeVersion) -> Result<()> {
        info!(%version, "uninstall runtime");
        if let Err(stderr) = self.mutate(self.tool().args(["uninstall", "-f", version.raw()]))? {
            return Err(ToolError::UninstallFailed {
                version: version.to_string(),
                stderr,
            }
            .into());
        }
        Ok(())
    }

    pub fn ensure_installed(&self, version: &RuntimeVersion) -> Result<()> {
        if !self.is_installed(version)? {
            self.install(version)?;
        }
        Ok(())
    }

    /// The version's own binary when present on disk, else the system one.
    pub fn executable_path(&self, version: &RuntimeVersion) -> PathBuf {
        let candidate = self
            .settings
            .tool_root
            .join("versions")
            .join(version.raw())
            .join("bin")
            .join(&self.settings.runtime_binary);
        if candidate.is_file() {
            candidate
        } else {
            self.settings.system_binary.clone()
        }
    }
}
