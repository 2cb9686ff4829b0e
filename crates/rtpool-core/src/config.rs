use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fsutil;
use crate::version::DEFAULT_TAG;

pub const CONFIG_SCHEMA_VERSION: &str = "rtpool.config@0.1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub schema_version: String,

    /// Top-level domain appended to site names.
    #[serde(default = "default_tld")]
    pub tld: String,

    /// Parked directories: every child directory is a site.
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    /// Version tag prefix (`rt` in `rt@8.3.0`).
    #[serde(default = "default_tag")]
    pub tag: String,

    /// Version-manager executable; defaults to `<tool_root>/bin/rtenv`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<PathBuf>,

    /// Version-manager tree; defaults to `$HOME/.rtenv`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_root: Option<PathBuf>,

    /// Executable name inside a version's `bin/`.
    #[serde(default = "default_runtime_binary")]
    pub runtime_binary: String,

    /// Fallback executable when a version has no binary on disk.
    #[serde(default = "default_system_binary")]
    pub system_binary: PathBuf,

    /// Worker services are named `<service_prefix>@<raw version>`.
    #[serde(default = "default_service_prefix")]
    pub service_prefix: String,

    #[serde(default = "default_proxy_service")]
    pub proxy_service: String,

    /// OS packages the environment needs (the reverse proxy).
    #[serde(default = "default_packages")]
    pub packages: Vec<String>,

    #[serde(default = "default_install_profile")]
    pub install_profile: String,

    #[serde(default)]
    pub install_extensions: Vec<String>,

    /// Run service and package commands through `sudo`.
    #[serde(default)]
    pub sudo: bool,
}

fn default_tld() -> String {
    "test".to_string()
}

fn default_tag() -> String {
    DEFAULT_TAG.to_string()
}

fn default_runtime_binary() -> String {
    "rt".to_string()
}

fn default_system_binary() -> PathBuf {
    PathBuf::from("/usr/bin/rt")
}

fn default_service_prefix() -> String {
    "worker".to_string()
}

fn default_proxy_service() -> String {
    "nginx".to_string()
}

fn default_packages() -> Vec<String> {
    vec!["nginx".to_string()]
}

fn default_install_profile() -> String {
    "development".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION.to_string(),
            tld: default_tld(),
            paths: Vec::new(),
            tag: default_tag(),
            tool: None,
            tool_root: None,
            runtime_binary: default_runtime_binary(),
            system_binary: default_system_binary(),
            service_prefix: default_service_prefix(),
            proxy_service: default_proxy_service(),
            packages: default_packages(),
            install_profile: default_install_profile(),
            install_extensions: Vec::new(),
            sudo: false,
        }
    }
}

impl Config {
    /// Read `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(Error::io("read", path, err)),
        };
        let cfg: Self = serde_json::from_slice(&bytes)
            .map_err(|err| Error::Config(format!("parse {}: {err}", path.display())))?;
        if cfg.schema_version != CONFIG_SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "unsupported config schema_version: {} (expected {CONFIG_SCHEMA_VERSION})",
                cfg.schema_version
            )));
        }
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut bytes = serde_json::to_vec_pretty(self)
            .map_err(|err| Error::Config(format!("encode config: {err}")))?;
        bytes.push(b'\n');
        fsutil::write_atomic(path, &bytes)
    }

    pub fn tool_root(&self, user_home: &Path) -> PathBuf {
        self.tool_root
            .clone()
            .unwrap_or_else(|| user_home.join(".rtenv"))
    }

    pub fn tool(&self, tool_root: &Path) -> PathBuf {
        self.tool
            .clone()
            .unwrap_or_else(|| tool_root.join("bin").join("rtenv"))
    }
}
