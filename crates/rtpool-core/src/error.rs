use std::path::PathBuf;

/// Rejections raised before any state is touched.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("unsupported runtime version: {version} (try something like '{example}' instead)")]
    UnsupportedVersion { version: String, example: String },

    #[error("already using the newest runtime version {version}; name a version to switch to")]
    AlreadyLatest { version: String },

    #[error("no site found for {directory}")]
    SiteNotFound { directory: String },

    #[error("invalid runtime version: {0:?}")]
    InvalidVersion(String),
}

/// Failures reported by an external program (version manager, service manager,
/// package manager).
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{program} is not available on this host")]
    NotAvailable { program: String },

    #[error("runtime version [{version}] could not be installed:\n{stderr}")]
    InstallFailed { version: String, stderr: String },

    #[error("runtime version [{version}] could not be uninstalled:\n{stderr}")]
    UninstallFailed { version: String, stderr: String },

    #[error("`{command}` exited with status {status}:\n{stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("{action} {}", path.display())]
    ConfigIo {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template {name:?} not found")]
    StubMissing { name: String },

    #[error("no compatible {kind} found")]
    NoBackend { kind: &'static str },

    #[error("config: {0}")]
    Config(String),
}

impl Error {
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::ConfigIo {
            action,
            path: path.into(),
            source,
        }
    }

    /// True when the operation was rejected before any mutation happened.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// The message followed by every `source()` below it, `: `-separated.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut next = std::error::Error::source(self);
        while let Some(err) = next {
            out.push_str(": ");
            out.push_str(&err.to_string());
            next = err.source();
        }
        out
    }
}

pub type Result<T> = std::result::Result<T, Error>;
