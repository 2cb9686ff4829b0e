//! Runtime version identifiers, the supported catalog, and socket naming.
//!
//! Every version the orchestrator handles is a [`RuntimeVersion`] in the canonical
//! tagged form `<tag>@major.minor.patch`. Free-form input goes through
//! [`Normalizer::normalize`], which keeps the historical group-splitting rule:
//! one optional tag prefix, then two mandatory digit groups and an optional third,
//! each optionally separated by a dot. Digits are split leftmost-first, so `830`
//! becomes `rt@83.0.` and `83` becomes `rt@8.3.`; a blank trailing group is a
//! patch wildcard when matched against the catalog.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, ValidationError};

pub const DEFAULT_TAG: &str = "rt";

pub const SOCKET_PREFIX: &str = "worker";
pub const SOCKET_SUFFIX: &str = ".sock";
pub const PRIMARY_SOCKET: &str = "worker.sock";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeVersion(String);

impl RuntimeVersion {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The version without its tag prefix: `rt@8.3.0` -> `8.3.0`.
    pub fn raw(&self) -> &str {
        raw_version(&self.0)
    }

    /// Numeric groups; a blank or non-numeric group is `None`.
    pub fn groups(&self) -> [Option<u64>; 3] {
        let mut out = [None; 3];
        for (slot, part) in out.iter_mut().zip(self.raw().split('.')) {
            *slot = part.parse().ok();
        }
        out
    }

    pub fn has_blank_patch(&self) -> bool {
        let raw = self.raw();
        raw.ends_with('.') && raw.matches('.').count() == 2
    }

    fn sort_key(&self) -> (u64, u64, u64) {
        let [a, b, c] = self.groups();
        (a.unwrap_or(0), b.unwrap_or(0), c.unwrap_or(0))
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip everything up to and including the tag separator.
pub fn raw_version(version: &str) -> &str {
    let version = version.trim();
    match version.split_once('@') {
        Some((_, rest)) => rest,
        None => version,
    }
}

/// `worker<raw>.sock`
pub fn socket_name(version: &RuntimeVersion) -> String {
    format!("{SOCKET_PREFIX}{}{SOCKET_SUFFIX}", version.raw())
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    tag: String,
    pattern: Regex,
}

impl Normalizer {
    pub fn new(tag: &str) -> Result<Self> {
        let tag = tag.trim();
        if tag.is_empty() || tag.contains('@') {
            return Err(Error::Config(format!("invalid runtime tag {tag:?}")));
        }
        let pattern = Regex::new(&format!(
            r"(?i)(?:{}@?)?([0-9]+)\.?([0-9]+)\.?([0-9]+)?",
            regex::escape(tag)
        ))
        .map_err(|err| Error::Config(format!("runtime tag {tag:?}: {err}")))?;
        Ok(Self {
            tag: tag.to_ascii_lowercase(),
            pattern,
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Map any accepted spelling to the tagged three-group form. Never fails;
    /// input that does not match is passed through unchanged.
    pub fn normalize(&self, input: &str) -> RuntimeVersion {
        let replacement = format!("{}@${{1}}.${{2}}.${{3}}", self.tag);
        let out = self.pattern.replace_all(input.trim(), replacement.as_str());
        RuntimeVersion(out.into_owned())
    }

    /// Wrap a raw version reported by the version-manager tool (`8.3.0`).
    pub fn from_raw(&self, raw: &str) -> RuntimeVersion {
        self.normalize(raw.trim())
    }

    /// The bare tag (`rt`) stands for "the newest supported version".
    pub fn is_bare_tag(&self, input: &str) -> bool {
        input.trim().eq_ignore_ascii_case(&self.tag)
    }

    /// Recover the version from a socket file name; `None` when the name does not
    /// carry the socket affixes.
    pub fn from_socket_name(&self, sock: &str) -> Option<RuntimeVersion> {
        let raw = sock
            .strip_prefix(SOCKET_PREFIX)?
            .strip_suffix(SOCKET_SUFFIX)?;
        if raw.is_empty() {
            return None;
        }
        Some(self.normalize(raw))
    }
}

/// Versions the host's version manager is able to install, in the order the
/// tool reported them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SupportedCatalog {
    versions: Vec<RuntimeVersion>,
}

impl SupportedCatalog {
    pub fn new(versions: impl IntoIterator<Item = RuntimeVersion>) -> Self {
        let mut out: Vec<RuntimeVersion> = Vec::new();
        for v in versions {
            if !out.contains(&v) {
                out.push(v);
            }
        }
        Self { versions: out }
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuntimeVersion> {
        self.versions.iter()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn contains(&self, version: &RuntimeVersion) -> bool {
        self.versions.contains(version)
    }

    pub fn newest(&self) -> Option<&RuntimeVersion> {
        self.versions.iter().max_by_key(|v| v.sort_key())
    }

    /// Exact match first; a blank patch group matches the newest entry sharing
    /// `major.minor`.
    pub fn resolve(&self, version: &RuntimeVersion) -> Option<&RuntimeVersion> {
        if let Some(found) = self.versions.iter().find(|v| *v == version) {
            return Some(found);
        }
        if !version.has_blank_patch() {
            return None;
        }
        let prefix = version.as_str();
        self.versions
            .iter()
            .filter(|v| v.as_str().starts_with(prefix))
            .max_by_key(|v| v.sort_key())
    }

    /// Distinct socket names for every entry, in catalog order.
    pub fn socket_names(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for v in &self.versions {
            let sock = socket_name(v);
            if !out.contains(&sock) {
                out.push(sock);
            }
        }
        out
    }
}

/// Check a requested version against the catalog.
///
/// `current_default` is the global default as reported by the version store; it is
/// only consulted for the bare-tag form.
pub fn validate(
    normalizer: &Normalizer,
    input: &str,
    catalog: &SupportedCatalog,
    current_default: Option<&RuntimeVersion>,
) -> Result<RuntimeVersion> {
    if input.trim().is_empty() {
        return Err(ValidationError::InvalidVersion(input.to_string()).into());
    }

    let example = catalog
        .newest()
        .map(|v| v.to_string())
        .unwrap_or_else(|| format!("{}@8.3.0", normalizer.tag()));

    if normalizer.is_bare_tag(input) {
        let Some(newest) = catalog.newest() else {
            return Err(ValidationError::UnsupportedVersion {
                version: input.trim().to_string(),
                example,
            }
            .into());
        };
        if current_default == Some(newest) {
            return Err(ValidationError::AlreadyLatest {
                version: newest.to_string(),
            }
            .into());
        }
        return Ok(newest.clone());
    }

    let normalized = normalizer.normalize(input);
    match catalog.resolve(&normalized) {
        Some(v) => Ok(v.clone()),
        None => Err(ValidationError::UnsupportedVersion {
            version: normalized.to_string(),
            example,
        }
        .into()),
    }
}
