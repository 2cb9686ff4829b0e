use std::path::Path;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::ToolError;

/// One invocation of an external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Prefix with `sudo` when `enabled`.
    pub fn privileged(self, enabled: bool) -> Self {
        if !enabled {
            return self;
        }
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: "sudo".to_string(),
            args,
            env: self.env,
        }
    }

    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for a in &self.args {
            out.push(' ');
            out.push_str(a);
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecResult {
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_status: 0,
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    pub fn failure(exit_status: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_status,
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    pub fn ok(&self) -> bool {
        self.exit_status == 0
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    /// A wrapper (`sudo`, a shell) reported `program` itself as missing.
    /// Tools the program runs failing the same way do not count.
    pub fn program_not_found(&self, program: &str) -> bool {
        if self.ok() {
            return false;
        }
        let name = Path::new(program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.to_string());
        let stderr = String::from_utf8_lossy(&self.stderr);
        stderr.lines().any(|line| {
            let parts: Vec<&str> = line.trim().split(": ").collect();
            match parts.as_slice() {
                [.., subject, "command not found" | "not found"] => {
                    *subject == name || *subject == program
                }
                _ => false,
            }
        })
    }
}

/// Seam between the orchestrator and the processes it drives.
///
/// `Err` means the program could not be started at all (most often: it does not
/// exist); a non-zero exit is an `Ok` result with the status filled in.
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> std::io::Result<ExecResult>;
}

/// Blocking runner over `std::process`, no timeout.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> std::io::Result<ExecResult> {
        debug!(command = %spec.display(), "exec");
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        cmd.stdin(Stdio::null());
        cmd.env("LC_ALL", "C");
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }
        let out = cmd.output()?;
        Ok(ExecResult {
            exit_status: out.status.code().unwrap_or(-1),
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }
}

/// Run and turn a non-zero exit into [`ToolError::CommandFailed`].
pub fn run_checked(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
) -> Result<ExecResult, ToolError> {
    let res = run_spawned(runner, spec)?;
    if !res.ok() {
        return Err(ToolError::CommandFailed {
            command: spec.display(),
            status: res.exit_status,
            stderr: res.stderr_str(),
        });
    }
    Ok(res)
}

/// Run, only failing when the program could not be started.
pub fn run_spawned(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
) -> Result<ExecResult, ToolError> {
    runner.run(spec).map_err(|source| ToolError::Spawn {
        command: spec.display(),
        source,
    })
}
