#![cfg(unix)]

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rtpool_core::fsutil::Owner;
use rtpool_core::orchestrator::IsolatedSite;
use rtpool_core::packages::PackageBackend;
use rtpool_core::services::ServiceBackend;
use rtpool_core::{
    CommandRunner, CommandSpec, Config, Error, ExecResult, HostBackends, Layout, Orchestrator,
    SwitchOutcome, ToolError, ValidationError,
};

#[derive(Default)]
struct HostState {
    installed: BTreeSet<String>,
    global: Option<String>,
    running: BTreeSet<String>,
    packages: BTreeSet<String>,
    fail_install: BTreeSet<String>,
    spawn_denied: BTreeSet<&'static str>,
}

/// Plays `rtenv`, `systemctl` and apt against in-memory state. Restarting a
/// worker creates its socket file so health checks can see it.
struct FakeHost {
    catalog: Vec<&'static str>,
    socket_dir: PathBuf,
    state: RefCell<HostState>,
    calls: RefCell<Vec<String>>,
}

const READ_ONLY: &[&str] = &[
    "rtenv versions --bare",
    "rtenv version-name",
    "rtenv install --list",
    "systemctl is-active",
    "systemctl list-units",
    "dpkg -s",
];

impl FakeHost {
    fn mutations(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| !READ_ONLY.iter().any(|ro| c.starts_with(ro)))
            .cloned()
            .collect()
    }

    fn called(&self, cmd: &str) -> bool {
        self.calls.borrow().iter().any(|c| c == cmd)
    }

    fn running(&self, name: &str) -> bool {
        self.state.borrow().running.contains(name)
    }
}

impl CommandRunner for FakeHost {
    fn run(&self, spec: &CommandSpec) -> std::io::Result<ExecResult> {
        self.calls.borrow_mut().push(spec.display());
        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        let mut st = self.state.borrow_mut();
        if st.spawn_denied.contains(spec.program.as_str()) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "permission denied",
            ));
        }
        let ok = || ExecResult::success("");
        let res = match (spec.program.as_str(), args.as_slice()) {
            ("rtenv", ["versions", "--bare"]) => {
                let mut out = String::new();
                for v in &st.installed {
                    out.push_str(v);
                    out.push('\n');
                }
                ExecResult::success(out)
            }
            ("rtenv", ["version-name"]) => {
                ExecResult::success(format!("{}\n", st.global.as_deref().unwrap_or("system")))
            }
            ("rtenv", ["install", "--list"]) => {
                let mut out = "Available versions:\n".to_string();
                for v in &self.catalog {
                    out.push_str(&format!("  {v}\n"));
                }
                out.push_str("  8.5snapshot\n");
                ExecResult::success(out)
            }
            ("rtenv", ["install", "--profile", _, raw]) => {
                if st.fail_install.contains(*raw) {
                    ExecResult::failure(1, "configure: error: libxml2 not found")
                } else {
                    st.installed.insert(raw.to_string());
                    ok()
                }
            }
            ("rtenv", ["uninstall", "-f", raw]) => {
                st.installed.remove(*raw);
                ok()
            }
            ("rtenv", ["global", raw]) => {
                st.global = Some(raw.to_string());
                ok()
            }
            ("rtenv", ["rehash"]) => ok(),
            ("systemctl", ["restart", name]) => {
                if let Some(raw) = name.strip_prefix("worker@") {
                    let sock = self.socket_dir.join(format!("worker{raw}.sock"));
                    std::fs::create_dir_all(&self.socket_dir)?;
                    std::fs::write(sock, b"")?;
                }
                st.running.insert(name.to_string());
                ok()
            }
            ("systemctl", ["stop", name]) => {
                st.running.remove(*name);
                ok()
            }
            ("systemctl", ["reload", _]) => ok(),
            ("systemctl", ["is-active", "--quiet", name]) => {
                if st.running.contains(*name) {
                    ok()
                } else {
                    ExecResult::failure(3, "")
                }
            }
            ("systemctl", ["list-units", ..]) => {
                let mut out = String::new();
                for name in &st.running {
                    out.push_str(&format!("{name}.service loaded active running {name}\n"));
                }
                ExecResult::success(out)
            }
            ("dpkg", ["-s", pkg]) => {
                if st.packages.contains(*pkg) {
                    ok()
                } else {
                    ExecResult::failure(1, "not installed")
                }
            }
            ("apt-get", ["install", "-y", pkg]) => {
                st.packages.insert(pkg.to_string());
                ok()
            }
            ("apt-get", ["remove", "-y", pkg]) => {
                st.packages.remove(*pkg);
                ok()
            }
            _ => ExecResult::failure(1, format!("unexpected command: {}", spec.display())),
        };
        Ok(res)
    }
}

struct Env {
    dir: tempfile::TempDir,
    host: FakeHost,
}

impl Env {
    fn new(installed: &[&str], global: Option<&str>, running: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("code")).unwrap();
        let host = FakeHost {
            catalog: vec!["8.1.0", "8.3.0"],
            socket_dir: dir.path().join("home"),
            state: RefCell::new(HostState {
                installed: installed.iter().map(|s| s.to_string()).collect(),
                global: global.map(str::to_string),
                running: running.iter().map(|s| s.to_string()).collect(),
                ..HostState::default()
            }),
            calls: RefCell::new(Vec::new()),
        };
        Env { dir, host }
    }

    /// 8.1.0 installed and global, its pool and the proxy running.
    fn standard() -> Self {
        Self::new(&["8.1.0"], Some("8.1.0"), &["nginx", "worker@8.1.0"])
    }

    fn home(&self) -> PathBuf {
        self.dir.path().join("home")
    }

    fn orch(&self) -> Orchestrator<'_> {
        let config = Config {
            tool: Some(PathBuf::from("rtenv")),
            paths: vec![self.dir.path().join("code")],
            ..Config::default()
        };
        Orchestrator::new(
            &self.host,
            config,
            Layout::new(self.home(), self.dir.path().join("rtenv")),
            HostBackends {
                services: ServiceBackend::Systemd,
                packages: Some(PackageBackend::Apt),
            },
            Owner::named("dev"),
        )
        .unwrap()
    }

    fn project(&self, name: &str) -> PathBuf {
        let p = self.dir.path().join("code").join(name);
        std::fs::create_dir_all(&p).unwrap();
        p
    }
}

fn names(orch: &Orchestrator<'_>) -> Vec<String> {
    orch.utilized_versions()
        .unwrap()
        .iter()
        .map(|v| v.to_string())
        .collect()
}

fn read(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap()
}

#[test]
fn only_the_global_default_is_utilized_without_isolations() {
    let env = Env::standard();
    let orch = env.orch();
    assert_eq!(names(&orch), vec!["rt@8.1.0"]);
}

#[test]
fn isolate_then_unisolate_round_trips() {
    let env = Env::standard();
    let orch = env.orch();
    let blog = env.project("blog");
    let before = names(&orch);

    let report = orch.isolate(&blog, "8.3.0").unwrap();
    assert_eq!(report.site, "blog.test");
    assert_eq!(report.version.as_str(), "rt@8.3.0");
    assert_eq!(report.previous, None);
    assert_eq!(report.stopped, None);

    assert!(env.host.state.borrow().installed.contains("8.3.0"));
    assert!(env.host.running("worker@8.3.0"));
    assert!(env.host.called("systemctl reload nginx"));
    assert!(env
        .dir
        .path()
        .join("rtenv/versions/8.3.0/etc/pool.d/rtpool.conf")
        .is_file());
    assert_eq!(names(&orch), vec!["rt@8.1.0", "rt@8.3.0"]);

    let report = orch.unisolate(&blog).unwrap();
    assert_eq!(report.previous.as_ref().map(|v| v.as_str()), Some("rt@8.3.0"));
    assert_eq!(report.stopped.as_ref().map(|v| v.as_str()), Some("rt@8.3.0"));
    assert!(!env.host.running("worker@8.3.0"));
    assert!(env.host.running("worker@8.1.0"));
    assert_eq!(names(&orch), before);
}

#[test]
fn unisolate_without_override_is_a_no_op() {
    let env = Env::standard();
    let orch = env.orch();
    let blog = env.project("blog");
    env.host.calls.borrow_mut().clear();

    let report = orch.unisolate(&blog).unwrap();
    assert_eq!(report.previous, None);
    assert!(env.host.mutations().is_empty(), "{:?}", env.host.mutations());
}

#[test]
fn reisolating_stops_the_abandoned_version() {
    let env = Env::new(&["8.1.0", "8.3.0"], Some("8.1.0"), &["nginx", "worker@8.1.0"]);
    let orch = env.orch();
    let blog = env.project("blog");

    orch.isolate(&blog, "8.3.0").unwrap();
    assert!(env.host.running("worker@8.3.0"));

    let report = orch.isolate(&blog, "8.1.0").unwrap();
    assert_eq!(report.previous.as_ref().map(|v| v.as_str()), Some("rt@8.3.0"));
    assert_eq!(report.stopped.as_ref().map(|v| v.as_str()), Some("rt@8.3.0"));
    assert!(!env.host.running("worker@8.3.0"));
    assert_eq!(names(&orch), vec!["rt@8.1.0"]);
}

#[test]
fn shared_override_keeps_running_until_last_site_leaves() {
    let env = Env::new(&["8.1.0", "8.3.0"], Some("8.1.0"), &["nginx", "worker@8.1.0"]);
    let orch = env.orch();
    let blog = env.project("blog");
    let shop = env.project("shop");

    orch.isolate(&blog, "8.3.0").unwrap();
    orch.isolate(&shop, "8.3.0").unwrap();

    assert_eq!(orch.unisolate(&blog).unwrap().stopped, None);
    assert!(env.host.running("worker@8.3.0"));
    assert!(orch.unisolate(&shop).unwrap().stopped.is_some());
    assert!(!env.host.running("worker@8.3.0"));
}

#[test]
fn switching_to_the_active_version_touches_nothing() {
    let env = Env::standard();
    let orch = env.orch();

    let outcome = orch.switch_global("rt@8.1.0", false).unwrap();
    assert_eq!(
        outcome,
        SwitchOutcome::AlreadyActive {
            version: rtpool_core::Normalizer::new("rt").unwrap().normalize("8.1.0"),
        }
    );
    assert!(env.host.mutations().is_empty(), "{:?}", env.host.mutations());
    assert!(!env.home().exists());
}

#[test]
fn switch_global_moves_the_primary_socket() {
    let env = Env::standard();
    let orch = env.orch();

    let outcome = orch.switch_global("8.3", false).unwrap();
    match outcome {
        SwitchOutcome::Switched { version, stopped } => {
            assert_eq!(version.as_str(), "rt@8.3.0");
            assert_eq!(stopped, vec!["worker@8.1.0".to_string()]);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let st = env.host.state.borrow();
    assert_eq!(st.global.as_deref(), Some("8.3.0"));
    assert!(st.running.contains("worker@8.3.0"));
    assert!(!st.running.contains("worker@8.1.0"));
    drop(st);

    assert_eq!(
        std::fs::read_link(env.home().join("worker.sock")).unwrap(),
        env.home().join("worker8.3.0.sock")
    );
    assert!(env.host.called("systemctl reload nginx"));
}

#[test]
fn forced_switch_reruns_install() {
    let env = Env::standard();
    let orch = env.orch();
    let outcome = orch.switch_global("8.1.0", true).unwrap();
    assert!(matches!(outcome, SwitchOutcome::Switched { .. }));
    assert!(env.host.called("systemctl restart worker@8.1.0"));
}

#[test]
fn bare_tag_is_rejected_when_already_newest() {
    let env = Env::new(&["8.3.0"], Some("8.3.0"), &[]);
    let orch = env.orch();
    let err = orch.switch_global("rt", false).unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::AlreadyLatest { .. })
    ));
    assert!(env.host.mutations().is_empty());
}

#[test]
fn install_from_scratch_then_again_is_stable() {
    let env = Env::new(&[], None, &["nginx"]);
    let orch = env.orch();

    let first = orch.install().unwrap();
    assert!(first.installed_default);
    assert_eq!(first.default.as_str(), "rt@8.3.0");
    assert_eq!(env.host.state.borrow().global.as_deref(), Some("8.3.0"));
    assert!(env.host.running("worker@8.3.0"));

    let pool = env.dir.path().join("rtenv/versions/8.3.0/etc/pool.d/rtpool.conf");
    let pool_before = read(&pool);
    let link = env.home().join("worker.sock");
    assert_eq!(std::fs::read_link(&link).unwrap(), env.home().join("worker8.3.0.sock"));

    env.host.calls.borrow_mut().clear();
    let second = orch.install().unwrap();
    assert!(!second.installed_default);
    assert_eq!(second.default, first.default);
    assert_eq!(read(&pool), pool_before);
    assert_eq!(std::fs::read_link(&link).unwrap(), env.home().join("worker8.3.0.sock"));
    assert_eq!(
        env.host.mutations(),
        vec!["systemctl restart worker@8.3.0".to_string()]
    );
}

#[test]
fn stale_primary_socket_file_is_replaced_by_link() {
    let env = Env::standard();
    std::fs::create_dir_all(env.home()).unwrap();
    std::fs::write(env.home().join("worker.sock"), b"").unwrap();

    env.orch().install().unwrap();
    let meta = std::fs::symlink_metadata(env.home().join("worker.sock")).unwrap();
    assert!(meta.file_type().is_symlink());
}

#[test]
fn validation_failures_mutate_nothing() {
    let env = Env::standard();
    let orch = env.orch();
    let blog = env.project("blog");

    let err = orch.switch_global("9.9.9", false).unwrap_err();
    assert!(err.is_validation());
    let err = orch.isolate(&blog, "7.4").unwrap_err();
    assert!(err.is_validation());
    assert!(env.host.mutations().is_empty(), "{:?}", env.host.mutations());
    assert!(orch.sites().configured_sites().unwrap().is_empty());
}

#[test]
fn unknown_directory_is_rejected_before_any_command() {
    let env = Env::standard();
    let orch = env.orch();
    let elsewhere = env.dir.path().join("elsewhere");
    std::fs::create_dir_all(&elsewhere).unwrap();

    let err = orch.isolate(&elsewhere, "8.3.0").unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::SiteNotFound { .. })
    ));
    assert!(env.host.calls.borrow().is_empty());
}

#[test]
fn failed_install_is_rolled_back_and_site_untouched() {
    let env = Env::standard();
    env.host
        .state
        .borrow_mut()
        .fail_install
        .insert("8.3.0".to_string());
    let orch = env.orch();
    let blog = env.project("blog");

    let err = orch.isolate(&blog, "8.3.0").unwrap_err();
    match err {
        Error::Tool(ToolError::InstallFailed { version, stderr }) => {
            assert_eq!(version, "rt@8.3.0");
            assert!(stderr.contains("libxml2"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(env.host.called("rtenv uninstall -f 8.3.0"));
    assert!(orch.sites().configured_sites().unwrap().is_empty());
}

#[test]
fn stop_unused_only_stops_unreferenced_versions() {
    let env = Env::new(
        &["8.1.0", "8.3.0"],
        Some("8.1.0"),
        &["nginx", "worker@8.1.0", "worker@8.3.0"],
    );
    let orch = env.orch();
    let n = rtpool_core::Normalizer::new("rt").unwrap();

    assert!(!orch.stop_unused(None).unwrap());
    assert!(!orch.stop_unused(Some(&n.normalize("8.1.0"))).unwrap());
    assert!(env.host.running("worker@8.1.0"));
    assert!(orch.stop_unused(Some(&n.normalize("8.3.0"))).unwrap());
    assert!(!env.host.running("worker@8.3.0"));
}

#[test]
fn stop_all_stops_every_running_pool_but_not_the_proxy() {
    let env = Env::new(
        &["8.1.0", "8.3.0"],
        Some("8.1.0"),
        &["nginx", "worker@8.1.0", "worker@8.3.0"],
    );
    let orch = env.orch();
    let stopped: Vec<String> = orch.stop_all().unwrap().iter().map(|v| v.to_string()).collect();
    assert_eq!(stopped, vec!["rt@8.1.0", "rt@8.3.0"]);
    assert!(env.host.running("nginx"));
    assert!(!env.host.running("worker@8.1.0"));
}

#[test]
fn restart_one_or_all() {
    let env = Env::standard();
    let orch = env.orch();
    let blog = env.project("blog");
    orch.isolate(&blog, "8.3.0").unwrap();
    env.host.calls.borrow_mut().clear();

    let all: Vec<String> = orch.restart(None).unwrap().iter().map(|v| v.to_string()).collect();
    assert_eq!(all, vec!["rt@8.1.0", "rt@8.3.0"]);

    env.host.calls.borrow_mut().clear();
    let one = orch.restart(Some("83")).unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(
        env.host.mutations(),
        vec!["systemctl restart worker@8.3.0".to_string()]
    );
}

#[test]
fn isolated_sites_read_marker_and_legacy_configs() {
    let env = Env::standard();
    let orch = env.orch();
    let blog = env.project("blog");
    orch.isolate(&blog, "8.3.0").unwrap();
    orch.sites()
        .write(
            "old.test",
            "server {\n    fastcgi_pass unix:/somewhere/worker8.1.0.sock;\n}\n",
        )
        .unwrap();

    let got: Vec<(String, String)> = orch
        .isolated_sites()
        .unwrap()
        .into_iter()
        .map(|IsolatedSite { site, version }| (site, version.to_string()))
        .collect();
    assert_eq!(
        got,
        vec![
            ("blog.test".to_string(), "rt@8.3.0".to_string()),
            ("old.test".to_string(), "rt@8.1.0".to_string()),
        ]
    );
}

#[test]
fn teardown_removes_versions_and_packages() {
    let env = Env::new(&["8.1.0", "8.3.0"], Some("8.1.0"), &["nginx", "worker@8.1.0"]);
    env.host
        .state
        .borrow_mut()
        .packages
        .insert("nginx".to_string());
    let orch = env.orch();

    let report = orch.uninstall(true).unwrap();
    assert_eq!(report.stopped.len(), 1);
    assert_eq!(report.uninstalled.len(), 2);
    assert_eq!(report.removed_packages, vec!["nginx".to_string()]);
    let st = env.host.state.borrow();
    assert!(st.installed.is_empty());
    assert!(st.packages.is_empty());
}

#[test]
fn ensure_packages_installs_missing_ones() {
    let env = Env::standard();
    let orch = env.orch();
    orch.ensure_packages().unwrap();
    assert!(env.host.called("apt-get install -y nginx"));
    env.host.calls.borrow_mut().clear();
    orch.ensure_packages().unwrap();
    assert!(env.host.mutations().is_empty());
}

#[test]
fn which_and_versions() {
    let env = Env::standard();
    let orch = env.orch();

    let which = orch.which(None).unwrap();
    assert_eq!(which.version.map(|v| v.to_string()).as_deref(), Some("rt@8.1.0"));
    assert_eq!(which.path, PathBuf::from("/usr/bin/rt"));

    let versions = orch.versions().unwrap();
    assert_eq!(versions.installed.len(), 1);
    assert_eq!(versions.catalog.len(), 2);
}

#[test]
fn status_follows_running_state() {
    let env = Env::standard();
    env.host
        .state
        .borrow_mut()
        .packages
        .insert("nginx".to_string());
    let orch = env.orch();
    orch.install().unwrap();

    let report = orch.status();
    assert!(report.ok, "{:?}", report.failed().collect::<Vec<_>>());

    env.host.state.borrow_mut().running.remove("worker@8.1.0");
    let report = orch.status();
    assert!(!report.ok);
    let failed: Vec<&str> = report.failed().map(|c| c.description.as_str()).collect();
    assert_eq!(failed, vec!["worker@8.1.0 is running"]);
}

#[test]
fn status_debug_carries_the_spawn_reason() {
    let env = Env::standard();
    let orch = env.orch();
    orch.install().unwrap();
    env.host.state.borrow_mut().spawn_denied.insert("dpkg");

    let report = orch.status();
    assert!(!report.ok);
    let check = report
        .failed()
        .find(|c| c.description == "package nginx is installed")
        .expect("package check present");
    assert_eq!(check.debug, "spawn `dpkg -s nginx`: permission denied");
}
