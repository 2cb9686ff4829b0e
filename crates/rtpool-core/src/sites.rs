use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result, ValidationError};
use crate::fsutil::{self, Owner};
use crate::paths::Layout;
use crate::stubs::{render, Stubs, SITE_ISOLATED_STUB};
use crate::utilization;
use crate::version::{socket_name, Normalizer, RuntimeVersion, SupportedCatalog};

/// A served project: `name` is the directory name plus the TLD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Site {
    pub name: String,
    pub path: PathBuf,
}

pub struct SiteLedger {
    layout: Layout,
    normalizer: Normalizer,
    tld: String,
    parked: Vec<PathBuf>,
    stubs: Stubs,
    owner: Owner,
}

impl SiteLedger {
    pub fn new(
        layout: Layout,
        normalizer: Normalizer,
        tld: impl Into<String>,
        parked: Vec<PathBuf>,
        stubs: Stubs,
        owner: Owner,
    ) -> Self {
        Self {
            layout,
            normalizer,
            tld: tld.into(),
            parked,
            stubs,
            owner,
        }
    }

    fn config_path(&self, site: &str) -> PathBuf {
        self.layout.proxy_dir().join(site)
    }

    /// File names under the proxy directory, sorted.
    pub fn configured_sites(&self) -> Result<Vec<String>> {
        let dir = self.layout.proxy_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Error::io("read dir", dir, err)),
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| Error::io("read dir", &dir, err))?;
            if entry.path().is_file() {
                out.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        out.sort();
        Ok(out)
    }

    pub fn read(&self, site: &str) -> Result<Option<String>> {
        let path = self.config_path(site);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::io("read", path, err)),
        }
    }

    pub fn write(&self, site: &str, text: &str) -> Result<()> {
        fsutil::ensure_dir(&self.layout.proxy_dir(), &self.owner)?;
        fsutil::write_owned(&self.config_path(site), text.as_bytes(), &self.owner)
    }

    /// Every `(site, config text)` pair.
    pub fn read_all(&self) -> Result<Vec<(String, String)>> {
        let mut out = Vec::new();
        for site in self.configured_sites()? {
            if let Some(text) = self.read(&site)? {
                out.push((site, text));
            }
        }
        Ok(out)
    }

    /// The site's override version; `None` means it tracks the global default.
    pub fn custom_version(
        &self,
        site: &str,
        catalog: &SupportedCatalog,
    ) -> Result<Option<RuntimeVersion>> {
        let Some(text) = self.read(site)? else {
            return Ok(None);
        };
        Ok(utilization::site_version(
            &self.normalizer,
            &text,
            &catalog.socket_names(),
        ))
    }

    /// Isolated sites and their versions, sorted by site.
    pub fn isolated_sites(
        &self,
        catalog: &SupportedCatalog,
    ) -> Result<Vec<(String, RuntimeVersion)>> {
        let sockets = catalog.socket_names();
        Ok(self
            .read_all()?
            .into_iter()
            .filter_map(|(site, text)| {
                utilization::site_version(&self.normalizer, &text, &sockets).map(|v| (site, v))
            })
            .collect())
    }

    /// Write the site's proxy config pinned to `version`'s socket.
    pub fn isolate(&self, site: &Site, version: &RuntimeVersion) -> Result<()> {
        info!(site = %site.name, %version, "isolate site");
        let home = self.layout.home.to_string_lossy().into_owned();
        let path = site.path.to_string_lossy().into_owned();
        let socket = socket_name(version);
        let text = render(
            &self.stubs.get(SITE_ISOLATED_STUB)?,
            &[
                ("ISOLATION_TAG", version.as_str()),
                ("SITE_NAME", site.name.as_str()),
                ("SITE_PATH", path.as_str()),
                ("HOME_PATH", home.as_str()),
                ("SOCKET_NAME", socket.as_str()),
            ],
        );
        self.write(&site.name, &text)
    }

    /// Drop the site's proxy config so it falls back to the shared one.
    pub fn remove_isolation(&self, site: &str) -> Result<bool> {
        info!(site, "remove isolation");
        fsutil::remove_file_if_exists(&self.config_path(site))
    }

    /// Map a project directory to its site through the linked and parked
    /// directories.
    pub fn resolve(&self, directory: &Path) -> Result<Site> {
        let not_found = || {
            Error::from(ValidationError::SiteNotFound {
                directory: directory.display().to_string(),
            })
        };
        let wanted = std::fs::canonicalize(directory).map_err(|_| not_found())?;

        let mut roots = vec![self.layout.sites_dir()];
        roots.extend(self.parked.iter().cloned());
        for root in roots {
            let Ok(entries) = std::fs::read_dir(&root) else {
                debug!(root = %root.display(), "skip unreadable site root");
                continue;
            };
            for entry in entries.flatten() {
                let Ok(target) = std::fs::canonicalize(entry.path()) else {
                    continue;
                };
                if target == wanted {
                    return Ok(Site {
                        name: format!("{}.{}", entry.file_name().to_string_lossy(), self.tld),
                        path: target,
                    });
                }
            }
        }
        Err(not_found())
    }
}
