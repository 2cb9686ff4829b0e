use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::packages::PackageBackend;
use crate::paths::find_in_path;
use crate::services::ServiceBackend;

/// Backends bound once at startup.
///
/// A service manager is required for every lifecycle operation. The package
/// manager is only needed for prerequisite installs, so its absence is reported
/// when one of those runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HostBackends {
    pub services: ServiceBackend,
    pub packages: Option<PackageBackend>,
}

impl HostBackends {
    pub fn detect() -> Result<Self> {
        Self::detect_with(|prog| find_in_path(prog).is_some())
    }

    pub fn detect_with(is_available: impl Fn(&str) -> bool) -> Result<Self> {
        let services = ServiceBackend::detect(&is_available)?;
        let packages = PackageBackend::detect(&is_available).ok();
        debug!(?services, ?packages, "host backends");
        Ok(Self { services, packages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn binds_first_available_of_each_kind() {
        let got = HostBackends::detect_with(|p| matches!(p, "rc-service" | "dnf")).unwrap();
        assert_eq!(
            got,
            HostBackends {
                services: ServiceBackend::OpenRc,
                packages: Some(PackageBackend::Dnf),
            }
        );
    }

    #[test]
    fn package_manager_is_optional() {
        let got = HostBackends::detect_with(|p| p == "systemctl").unwrap();
        assert_eq!(got.packages, None);
    }

    #[test]
    fn service_manager_is_required() {
        let err = HostBackends::detect_with(|p| p == "pacman").unwrap_err();
        assert!(matches!(err, Error::NoBackend { kind: "service manager" }));
    }
}
