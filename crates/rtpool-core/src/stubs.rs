use std::path::PathBuf;

use crate::error::{Error, Result};

pub const POOL_STUB: &str = "pool.conf";
pub const MEMORY_LIMITS_STUB: &str = "memory-limits.ini";
pub const ERROR_LOG_STUB: &str = "error-log.ini";
pub const SITE_ISOLATED_STUB: &str = "site-isolated.conf";

const BUILTIN: &[(&str, &str)] = &[
    (POOL_STUB, include_str!("../stubs/pool.conf")),
    (MEMORY_LIMITS_STUB, include_str!("../stubs/memory-limits.ini")),
    (ERROR_LOG_STUB, include_str!("../stubs/error-log.ini")),
    (SITE_ISOLATED_STUB, include_str!("../stubs/site-isolated.conf")),
];

/// Templates for generated files. A file under the custom directory with the
/// same name replaces the built-in one.
#[derive(Debug, Clone)]
pub struct Stubs {
    custom_dir: Option<PathBuf>,
}

impl Stubs {
    pub fn builtin() -> Self {
        Self { custom_dir: None }
    }

    pub fn with_overrides(dir: impl Into<PathBuf>) -> Self {
        Self {
            custom_dir: Some(dir.into()),
        }
    }

    pub fn get(&self, name: &str) -> Result<String> {
        if let Some(dir) = &self.custom_dir {
            let path = dir.join(name);
            if path.is_file() {
                return std::fs::read_to_string(&path).map_err(|err| Error::io("read", path, err));
            }
        }
        BUILTIN
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, body)| body.to_string())
            .ok_or_else(|| Error::StubMissing {
                name: name.to_string(),
            })
    }
}

/// Replace each placeholder token with its value, in order.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(key, value);
    }
    out
}
