use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// The user the generated files belong to.
///
/// Under `sudo` this is the invoking user (`SUDO_USER`, `SUDO_UID`,
/// `SUDO_GID`); otherwise `USER` and no explicit ownership change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub name: String,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl Owner {
    pub fn from_env() -> Self {
        let var = |k: &str| std::env::var(k).ok().filter(|v| !v.is_empty());
        match var("SUDO_USER") {
            Some(name) => Owner {
                name,
                uid: var("SUDO_UID").and_then(|v| v.parse().ok()),
                gid: var("SUDO_GID").and_then(|v| v.parse().ok()),
            },
            None => Owner::named(var("USER").unwrap_or_else(|| "root".to_string())),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Owner {
            name: name.into(),
            uid: None,
            gid: None,
        }
    }

    fn apply(&self, path: &Path) -> Result<()> {
        if self.uid.is_none() && self.gid.is_none() {
            return Ok(());
        }
        #[cfg(unix)]
        {
            std::os::unix::fs::chown(path, self.uid, self.gid)
                .map_err(|err| Error::io("chown", path, err))?;
        }
        Ok(())
    }
}

pub fn ensure_dir(path: &Path, owner: &Owner) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(path).map_err(|err| Error::io("create dir", path, err))?;
    owner.apply(path)
}

/// Replace the whole file, creating parent directories as needed.
pub fn write_replace(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| Error::io("create dir", parent, err))?;
    }
    std::fs::write(path, bytes).map_err(|err| Error::io("write", path, err))
}

/// Write `<path>.tmp`, then rename it over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if path.is_dir() {
        return Err(Error::io(
            "write",
            path,
            std::io::Error::new(std::io::ErrorKind::Other, "refusing to overwrite directory"),
        ));
    }
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    write_replace(&tmp, bytes)?;
    std::fs::rename(&tmp, path).map_err(|err| Error::io("rename", path, err))
}

pub fn write_owned(path: &Path, bytes: &[u8], owner: &Owner) -> Result<()> {
    write_replace(path, bytes)?;
    owner.apply(path)
}

/// Create an empty file if none exists; existing content is kept.
pub fn touch(path: &Path, owner: &Owner) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    write_owned(path, b"", owner)
}

/// Remove a file or symlink; a missing path is fine.
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(Error::io("remove", path, err)),
    }
}

/// Move `path` to `<path><suffix>`, never deleting it. Returns the new path when a
/// rename happened.
pub fn rename_aside(path: &Path, suffix: &str) -> Result<Option<PathBuf>> {
    if !path.is_file() {
        return Ok(None);
    }
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    let dst = PathBuf::from(name);
    debug!(from = %path.display(), to = %dst.display(), "rename aside");
    std::fs::rename(path, &dst).map_err(|err| Error::io("rename", path, err))?;
    Ok(Some(dst))
}

/// Point `link` at `target`, replacing whatever `link` was. The new link is built
/// next to the old one and renamed over it, so readers see either the old or the
/// new target.
#[cfg(unix)]
pub fn symlink_replace(target: &Path, link: &Path, owner: &Owner) -> Result<()> {
    let mut tmp = link.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    remove_file_if_exists(&tmp)?;
    if let Some(parent) = link.parent() {
        std::fs::create_dir_all(parent).map_err(|err| Error::io("create dir", parent, err))?;
    }
    std::os::unix::fs::symlink(target, &tmp).map_err(|err| Error::io("symlink", &tmp, err))?;
    if let (Some(uid), gid) = (owner.uid, owner.gid) {
        std::os::unix::fs::lchown(&tmp, Some(uid), gid)
            .map_err(|err| Error::io("chown", &tmp, err))?;
    }
    std::fs::rename(&tmp, link).map_err(|err| Error::io("rename", link, err))
}

#[cfg(not(unix))]
pub fn symlink_replace(_target: &Path, link: &Path, _owner: &Owner) -> Result<()> {
    Err(Error::io(
        "symlink",
        link,
        std::io::Error::new(std::io::ErrorKind::Unsupported, "unix sockets only"),
    ))
}
