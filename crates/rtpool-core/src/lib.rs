//! Runtime-version orchestration: which versions are installed, which ones must
//! have a running worker pool, which socket each pool listens on, and which
//! sites are pinned to a version other than the global default.
//!
//! All external programs (the `rtenv` version manager, the service manager, the
//! package manager) are reached through [`exec::CommandRunner`], so the whole
//! lifecycle can be driven against a scripted host in tests.

pub mod config;
pub mod error;
pub mod exec;
pub mod fsutil;
pub mod host;
pub mod orchestrator;
pub mod packages;
pub mod paths;
pub mod pool;
pub mod services;
pub mod sites;
pub mod status;
pub mod store;
pub mod stubs;
pub mod utilization;
pub mod version;

pub use config::Config;
pub use error::{Error, Result, ToolError, ValidationError};
pub use exec::{CommandRunner, CommandSpec, ExecResult, SystemRunner};
pub use host::HostBackends;
pub use orchestrator::{Orchestrator, SwitchOutcome};
pub use paths::Layout;
pub use status::StatusReport;
pub use version::{socket_name, Normalizer, RuntimeVersion, SupportedCatalog};
