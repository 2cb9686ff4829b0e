use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use rtpool_core::fsutil::Owner;
use rtpool_core::orchestrator::IsolatedSite;
use rtpool_core::paths::{effective_home, user_home};
use rtpool_core::{
    Config, HostBackends, Layout, Orchestrator, RuntimeVersion, SwitchOutcome, SystemRunner,
};

const REPORT_SCHEMA_VERSION: &str = "rtpool.report@0.1.0";
const ENV_LOG: &str = "RTPOOL_LOG";

#[derive(Debug, Parser)]
#[command(name = "rtpool")]
#[command(
    about = "Per-version runtime worker pools for local development sites.",
    long_about = None
)]
struct Cli {
    /// Config home (default: $RTPOOL_HOME, then ~/.config/rtpool).
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    quiet: bool,

    /// Log filter such as `info` or `rtpool_core=debug` (default: $RTPOOL_LOG, then `warn`).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Install prerequisites and the default runtime, then start the pools.
    Install(InstallArgs),
    /// Make a runtime version the global default.
    Use(UseArgs),
    /// Pin a site to a runtime version.
    Isolate(IsolateArgs),
    /// Return a site to the global default.
    Unisolate(SiteArgs),
    /// List isolated sites.
    Isolated,
    /// Restart one pool, or every pool in use.
    Restart { version: Option<String> },
    /// Stop one pool if nothing uses it, or every pool.
    Stop { version: Option<String> },
    Status,
    /// Print the executable of a runtime version.
    Which { version: Option<String> },
    Versions,
    /// Stop every pool and uninstall every runtime version.
    Uninstall(UninstallArgs),
}

#[derive(Debug, Args)]
struct InstallArgs {
    /// Do not install the configured OS packages.
    #[arg(long)]
    skip_packages: bool,
}

#[derive(Debug, Args)]
struct UseArgs {
    version: String,

    /// Re-run the switch even when the version is already active.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Args)]
struct IsolateArgs {
    version: String,

    /// Site directory (default: current directory).
    #[arg(long)]
    site: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct SiteArgs {
    #[arg(long)]
    site: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct UninstallArgs {
    #[arg(long)]
    purge_packages: bool,
}

#[derive(Debug)]
struct Reporter {
    json: bool,
    quiet: bool,
}

impl Reporter {
    fn progress(&self, msg: &str) {
        if self.json || self.quiet {
            return;
        }
        eprintln!("{msg}");
    }

    fn report<T: Serialize>(&self, command: &'static str, report: &T) -> Result<()> {
        if !self.json {
            return Ok(());
        }
        write_json_stdout(&Envelope {
            schema_version: REPORT_SCHEMA_VERSION,
            command,
            report,
        })
    }
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    schema_version: &'static str,
    command: &'static str,
    #[serde(flatten)]
    report: &'a T,
}

#[derive(Serialize)]
struct IsolatedList<'a> {
    sites: &'a [IsolatedSite],
}

#[derive(Serialize)]
struct Restarted<'a> {
    restarted: &'a [RuntimeVersion],
}

#[derive(Serialize)]
struct Stopped<'a> {
    stopped: &'a [RuntimeVersion],
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let home = effective_home(cli.home)?;
    let config_path = home.join("config.json");
    let config = Config::load(&config_path)?;
    let layout = Layout::new(&home, config.tool_root(&user_home()?));
    let backends = HostBackends::detect().context("detect host backends")?;
    tracing::debug!(home = %home.display(), ?backends, "startup");
    let runner = SystemRunner;
    let orch = Orchestrator::new(&runner, config, layout, backends, Owner::from_env())?;
    let reporter = Reporter {
        json: cli.json,
        quiet: cli.quiet,
    };

    match cli.cmd {
        Command::Install(args) => cmd_install(&orch, args, &reporter),
        Command::Use(args) => cmd_use(&orch, args, &reporter),
        Command::Isolate(args) => cmd_isolate(&orch, args, &reporter),
        Command::Unisolate(args) => cmd_unisolate(&orch, args, &reporter),
        Command::Isolated => cmd_isolated(&orch, &reporter),
        Command::Restart { version } => cmd_restart(&orch, version.as_deref(), &reporter),
        Command::Stop { version } => cmd_stop(&orch, version.as_deref(), &reporter),
        Command::Status => cmd_status(&orch, &reporter),
        Command::Which { version } => cmd_which(&orch, version.as_deref(), &reporter),
        Command::Versions => cmd_versions(&orch, &reporter),
        Command::Uninstall(args) => cmd_uninstall(&orch, args, &reporter),
    }
}

fn init_logging(flag: Option<&str>) {
    let spec = flag
        .map(str::to_string)
        .or_else(|| std::env::var(ENV_LOG).ok())
        .unwrap_or_else(|| "warn".to_string());
    let filter = EnvFilter::try_new(&spec).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn site_dir(site: Option<PathBuf>) -> Result<PathBuf> {
    match site {
        Some(dir) => Ok(dir),
        None => std::env::current_dir().context("current_dir"),
    }
}

fn cmd_install(
    orch: &Orchestrator<'_>,
    args: InstallArgs,
    reporter: &Reporter,
) -> Result<ExitCode> {
    if !args.skip_packages {
        reporter.progress("checking OS packages");
        orch.ensure_packages().context("install OS packages")?;
    }
    let config_path = orch.layout().config_path();
    if !config_path.is_file() {
        orch.config().save(&config_path)?;
    }
    let report = orch.install()?;
    if report.installed_default {
        reporter.progress(&format!("installed {}", report.default));
    }
    reporter.progress(&format!(
        "{} is the global default ({})",
        report.default,
        report.primary_socket.display()
    ));
    reporter.report("install", &report)?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_use(orch: &Orchestrator<'_>, args: UseArgs, reporter: &Reporter) -> Result<ExitCode> {
    let outcome = orch.switch_global(&args.version, args.force)?;
    match &outcome {
        SwitchOutcome::AlreadyActive { version } => reporter.progress(&format!(
            "already using {version}; pass --force to switch again"
        )),
        SwitchOutcome::Switched { version, .. } => {
            reporter.progress(&format!("now using {version}"))
        }
    }
    reporter.report("use", &outcome)?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_isolate(
    orch: &Orchestrator<'_>,
    args: IsolateArgs,
    reporter: &Reporter,
) -> Result<ExitCode> {
    let dir = site_dir(args.site)?;
    let report = orch.isolate(&dir, &args.version)?;
    reporter.progress(&format!("{} now uses {}", report.site, report.version));
    if let Some(stopped) = &report.stopped {
        reporter.progress(&format!("stopped unused {stopped}"));
    }
    reporter.report("isolate", &report)?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_unisolate(orch: &Orchestrator<'_>, args: SiteArgs, reporter: &Reporter) -> Result<ExitCode> {
    let dir = site_dir(args.site)?;
    let report = orch.unisolate(&dir)?;
    match &report.previous {
        Some(prev) => reporter.progress(&format!(
            "{} no longer pinned to {prev}; using the global default",
            report.site
        )),
        None => reporter.progress(&format!("{} is not isolated", report.site)),
    }
    reporter.report("unisolate", &report)?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_isolated(orch: &Orchestrator<'_>, reporter: &Reporter) -> Result<ExitCode> {
    let sites = orch.isolated_sites()?;
    if reporter.json {
        reporter.report("isolated", &IsolatedList { sites: &sites })?;
    } else {
        for s in &sites {
            println!("{}\t{}", s.site, s.version);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_restart(
    orch: &Orchestrator<'_>,
    version: Option<&str>,
    reporter: &Reporter,
) -> Result<ExitCode> {
    let restarted = orch.restart(version)?;
    for v in &restarted {
        reporter.progress(&format!("restarted {}", orch.service_name(v)));
    }
    reporter.report("restart", &Restarted { restarted: &restarted })?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_stop(
    orch: &Orchestrator<'_>,
    version: Option<&str>,
    reporter: &Reporter,
) -> Result<ExitCode> {
    let stopped = match version {
        None => orch.stop_all()?,
        Some(input) => {
            let v = orch.resolve_version(input)?;
            if orch.stop_unused(Some(&v))? {
                vec![v]
            } else {
                reporter.progress(&format!("{v} is still in use"));
                Vec::new()
            }
        }
    };
    for v in &stopped {
        reporter.progress(&format!("stopped {}", orch.service_name(v)));
    }
    reporter.report("stop", &Stopped { stopped: &stopped })?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_status(orch: &Orchestrator<'_>, reporter: &Reporter) -> Result<ExitCode> {
    let report = orch.status();
    if reporter.json {
        reporter.report("status", &report)?;
    } else {
        for c in &report.checks {
            let mark = if c.ok { "ok" } else { "FAIL" };
            println!("[{mark}] {}", c.description);
            if !c.ok && !c.debug.is_empty() {
                println!("       {}", c.debug);
            }
        }
    }
    Ok(if report.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn cmd_which(
    orch: &Orchestrator<'_>,
    version: Option<&str>,
    reporter: &Reporter,
) -> Result<ExitCode> {
    let which = orch.which(version)?;
    if reporter.json {
        reporter.report("which", &which)?;
    } else {
        println!("{}", which.path.display());
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_versions(orch: &Orchestrator<'_>, reporter: &Reporter) -> Result<ExitCode> {
    let report = orch.versions()?;
    if reporter.json {
        reporter.report("versions", &report)?;
        return Ok(ExitCode::SUCCESS);
    }
    for v in &report.catalog {
        let mark = if report.global.as_ref() == Some(v) { "*" } else { " " };
        let state = if report.installed.contains(v) {
            "installed"
        } else {
            ""
        };
        println!("{mark} {v}\t{state}");
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_uninstall(
    orch: &Orchestrator<'_>,
    args: UninstallArgs,
    reporter: &Reporter,
) -> Result<ExitCode> {
    let report = orch.uninstall(args.purge_packages)?;
    for v in &report.uninstalled {
        reporter.progress(&format!("uninstalled {v}"));
    }
    for p in &report.removed_packages {
        reporter.progress(&format!("removed package {p}"));
    }
    reporter.report("uninstall", &report)?;
    Ok(ExitCode::SUCCESS)
}

fn write_json_stdout<T: Serialize>(v: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec(v)?;
    bytes.push(b'\n');
    std::io::stdout()
        .write_all(&bytes)
        .context("write stdout")?;
    Ok(())
}
