//! Which runtime versions must have a live worker pool.
//!
//! The answer is recomputed from the proxy configs and the global default on
//! every call. A site is isolated when its config carries the
//! `# ISOLATED_RUNTIME_VERSION=` marker; configs written before the marker
//! existed are recognized by the version socket they reference.

use std::collections::BTreeSet;

use crate::version::{Normalizer, RuntimeVersion, SupportedCatalog};

pub const ISOLATION_MARKER: &str = "# ISOLATED_RUNTIME_VERSION=";

/// Version named by the structured marker line, if any.
pub fn marker_version(normalizer: &Normalizer, config: &str) -> Option<RuntimeVersion> {
    config
        .lines()
        .find_map(|l| l.trim().strip_prefix(ISOLATION_MARKER))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| normalizer.normalize(v))
}

/// First catalog socket name contained in `config`, mapped back to its version.
pub fn scan_version(
    normalizer: &Normalizer,
    config: &str,
    sockets: &[String],
) -> Option<RuntimeVersion> {
    sockets
        .iter()
        .find(|sock| config.contains(sock.as_str()))
        .and_then(|sock| normalizer.from_socket_name(sock))
}

/// The override a site config records, marker first.
pub fn site_version(
    normalizer: &Normalizer,
    config: &str,
    sockets: &[String],
) -> Option<RuntimeVersion> {
    marker_version(normalizer, config).or_else(|| scan_version(normalizer, config, sockets))
}

/// `{global} ∪ {every site override}`, sorted by canonical form.
pub fn utilized_versions<'a>(
    normalizer: &Normalizer,
    catalog: &SupportedCatalog,
    global: Option<&RuntimeVersion>,
    configs: impl IntoIterator<Item = &'a str>,
) -> BTreeSet<RuntimeVersion> {
    let sockets = catalog.socket_names();
    let mut out: BTreeSet<RuntimeVersion> = configs
        .into_iter()
        .filter_map(|text| site_version(normalizer, text, &sockets))
        .collect();
    out.extend(global.cloned());
    out
}
