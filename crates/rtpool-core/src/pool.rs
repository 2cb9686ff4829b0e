use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::fsutil::{self, Owner};
use crate::paths::{Layout, LEGACY_POOL_FILE};
use crate::stubs::{render, Stubs, ERROR_LOG_STUB, MEMORY_LIMITS_STUB, POOL_STUB};
use crate::version::{socket_name, RuntimeVersion};

pub const MEMORY_LIMITS_FILE: &str = "rtpool-memory-limits.ini";
pub const ERROR_LOG_FILE: &str = "rtpool-error-log.ini";
pub const BACKUP_SUFFIX: &str = "-backup";

/// Files written for one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolFiles {
    pub pool: PathBuf,
    pub memory_limits: PathBuf,
    pub error_log: PathBuf,
    pub log: PathBuf,
}

pub struct PoolConfigurator {
    layout: Layout,
    stubs: Stubs,
    owner: Owner,
}

impl PoolConfigurator {
    pub fn new(layout: Layout, stubs: Stubs, owner: Owner) -> Self {
        Self {
            layout,
            stubs,
            owner,
        }
    }

    pub fn files(&self, version: &RuntimeVersion) -> PoolFiles {
        let conf_d = self.layout.conf_d(version);
        PoolFiles {
            pool: self.layout.pool_config_path(version),
            memory_limits: conf_d.join(MEMORY_LIMITS_FILE),
            error_log: conf_d.join(ERROR_LOG_FILE),
            log: self.layout.log_path(version),
        }
    }

    /// Render the pool definition and ini overrides for `version`. Repeated calls
    /// leave byte-identical files; nothing is restarted.
    pub fn write_config(&self, version: &RuntimeVersion) -> Result<PoolFiles> {
        info!(%version, "write pool config");
        let l = &self.layout;
        for dir in [
            l.home.clone(),
            l.log_dir(),
            l.pool_dir(version),
            l.conf_d(version),
        ] {
            fsutil::ensure_dir(&dir, &self.owner)?;
        }

        let legacy = l.pool_dir(version).join(LEGACY_POOL_FILE);
        if let Some(moved) = fsutil::rename_aside(&legacy, BACKUP_SUFFIX)? {
            warn!(from = %legacy.display(), to = %moved.display(), "moved default pool aside");
        }

        let files = self.files(version);
        let home = l.home.to_string_lossy().into_owned();
        let socket = socket_name(version);
        let log = files.log.to_string_lossy().into_owned();

        let pool = render(
            &self.stubs.get(POOL_STUB)?,
            &[
                ("OWNER", self.owner.name.as_str()),
                ("HOME_PATH", home.as_str()),
                ("SOCKET_NAME", socket.as_str()),
            ],
        );
        fsutil::write_owned(&files.pool, pool.as_bytes(), &self.owner)?;

        let limits = self.stubs.get(MEMORY_LIMITS_STUB)?;
        fsutil::write_owned(&files.memory_limits, limits.as_bytes(), &self.owner)?;

        let error_log = render(&self.stubs.get(ERROR_LOG_STUB)?, &[("LOG_PATH", log.as_str())]);
        fsutil::write_owned(&files.error_log, error_log.as_bytes(), &self.owner)?;

        fsutil::touch(&files.log, &self.owner)?;
        Ok(files)
    }

    pub fn remove_log(&self, version: &RuntimeVersion) -> Result<bool> {
        fsutil::remove_file_if_exists(&self.layout.log_path(version))
    }
}
