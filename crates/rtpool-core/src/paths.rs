use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::version::{socket_name, RuntimeVersion, PRIMARY_SOCKET};

pub const ENV_HOME: &str = "RTPOOL_HOME";

pub const POOL_FILE: &str = "rtpool.conf";
pub const LEGACY_POOL_FILE: &str = "www.conf";

/// On-disk locations owned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Config home, e.g. `~/.config/rtpool`.
    pub home: PathBuf,
    /// Root of the version manager's tree, e.g. `~/.rtenv`.
    pub tool_root: PathBuf,
}

impl Layout {
    pub fn new(home: impl Into<PathBuf>, tool_root: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            tool_root: tool_root.into(),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.home.join("config.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.home.join("Log")
    }

    pub fn log_path(&self, version: &RuntimeVersion) -> PathBuf {
        self.log_dir().join(format!("worker-{}.log", version.raw()))
    }

    /// Linked sites (symlinks to project directories).
    pub fn sites_dir(&self) -> PathBuf {
        self.home.join("Sites")
    }

    /// Per-site reverse-proxy configs.
    pub fn proxy_dir(&self) -> PathBuf {
        self.home.join("Proxy")
    }

    pub fn stubs_dir(&self) -> PathBuf {
        self.home.join("stubs")
    }

    pub fn socket_path(&self, version: &RuntimeVersion) -> PathBuf {
        self.home.join(socket_name(version))
    }

    pub fn primary_socket_path(&self) -> PathBuf {
        self.home.join(PRIMARY_SOCKET)
    }

    pub fn version_dir(&self, version: &RuntimeVersion) -> PathBuf {
        self.tool_root.join("versions").join(version.raw())
    }

    pub fn pool_dir(&self, version: &RuntimeVersion) -> PathBuf {
        self.version_dir(version).join("etc").join("pool.d")
    }

    pub fn pool_config_path(&self, version: &RuntimeVersion) -> PathBuf {
        self.pool_dir(version).join(POOL_FILE)
    }

    pub fn conf_d(&self, version: &RuntimeVersion) -> PathBuf {
        self.version_dir(version).join("etc").join("conf.d")
    }
}

/// Pick the config home: explicit flag, then `RTPOOL_HOME`, then
/// `$HOME/.config/rtpool`.
pub fn effective_home(flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(home) = flag {
        return Ok(home);
    }
    if let Some(v) = std::env::var_os(ENV_HOME) {
        if !v.is_empty() {
            return Ok(PathBuf::from(v));
        }
    }
    Ok(user_home()?.join(".config").join("rtpool"))
}

pub fn user_home() -> Result<PathBuf> {
    if let Some(v) = std::env::var_os("HOME") {
        if !v.is_empty() {
            return Ok(PathBuf::from(v));
        }
    }
    Err(Error::Config(
        "could not determine home directory (HOME is unset)".to_string(),
    ))
}

/// Search `PATH` for an executable.
pub fn find_in_path(prog: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    find_in_dirs(prog, &path)
}

fn find_in_dirs(prog: &str, path: &OsString) -> Option<PathBuf> {
    for dir in std::env::split_paths(path) {
        let cand = dir.join(prog);
        if cand.is_file() && is_executable(&cand) {
            return Some(cand);
        }
    }
    None
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        if let Ok(meta) = std::fs::metadata(path) {
            return meta.permissions().mode() & 0o111 != 0;
        }
        false
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}
