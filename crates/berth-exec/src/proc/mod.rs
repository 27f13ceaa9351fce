use std::{fmt, path::PathBuf, process::ExitStatus, process::Stdio};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    error::{ExecError, ExecResult},
    quote,
    util::{cmd_program, kill_graceful},
};

/// One external command invocation.
#[derive(Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// Written to the child's stdin, which is then closed.
    pub stdin: Option<String>,
    /// Return an error if the exit code is not 0.
    pub fail_on_non_zero: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            stdin: None,
            fail_on_non_zero: true,
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

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Report non-zero exits through [`CommandOutput`] instead of an error.
    pub fn allow_failure(mut self) -> Self {
        self.fail_on_non_zero = false;
        self
    }

    /// Program and arguments, shell-quoted. Environment values are never included.
    pub fn command_line(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(quote::quote(&self.program));
        parts.extend(self.args.iter().map(|a| quote::quote(a)));
        parts.join(" ")
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &env_keys)
            .field("cwd", &self.cwd)
            .field("stdin", &self.stdin.is_some())
            .field("fail_on_non_zero", &self.fail_on_non_zero)
            .finish()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Captured result of [`CommandRunner::output`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    #[inline]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into [`ExecError::NonZeroExit`] for `spec`.
    pub fn check(self, spec: &CommandSpec) -> ExecResult<Self> {
        match self.code {
            Some(0) => Ok(self),
            Some(code) => Err(ExecError::NonZeroExit {
                command: spec.command_line(),
                code,
                stderr: self.stderr,
            }),
            None => Err(ExecError::KilledBySignal {
                command: spec.command_line(),
            }),
        }
    }
}

/// Executes [`CommandSpec`]s.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion with stdout and stderr captured.
    async fn output(&self, spec: &CommandSpec) -> ExecResult<CommandOutput>;

    /// Run to completion with the operator's stdio; returns the exit code.
    async fn status(&self, spec: &CommandSpec) -> ExecResult<i32>;

    /// Run attached to the operator's terminal until exit or `cancel`.
    ///
    /// The exit code is returned as-is regardless of `fail_on_non_zero`; cancellation kills the child.
    async fn interactive(&self, spec: &CommandSpec, cancel: &CancellationToken)
    -> ExecResult<i32>;
}

/// [`CommandRunner`] backed by `tokio::process`.
pub struct ProcRunner;

impl ProcRunner {
    pub fn new() -> Self {
        Self
    }

    fn spawn_error(spec: &CommandSpec, e: std::io::Error) -> ExecError {
        ExecError::Spawn {
            program: spec.program.clone(),
            reason: e.to_string(),
        }
    }
}

impl Default for ProcRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ProcRunner {
    async fn output(&self, spec: &CommandSpec) -> ExecResult<CommandOutput> {
        if spec.program.is_empty() {
            return Err(ExecError::MissingProgram);
        }
        trace!(target: "berth.exec.proc", command = %spec, "spawn");

        let mut cmd = cmd_program(spec);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn().map_err(|e| Self::spawn_error(spec, e))?;
        if let Some(input) = &spec.stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(input.as_bytes()).await?;
            pipe.shutdown().await?;
        }

        let out = child.wait_with_output().await?;
        let output = CommandOutput {
            code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        };
        debug!(target: "berth.exec.proc", command = %spec.program, code = ?output.code, "exit");

        if spec.fail_on_non_zero {
            output.check(spec)
        } else {
            Ok(output)
        }
    }

    async fn status(&self, spec: &CommandSpec) -> ExecResult<i32> {
        if spec.program.is_empty() {
            return Err(ExecError::MissingProgram);
        }
        trace!(target: "berth.exec.proc", command = %spec, "spawn attached");

        let mut cmd = cmd_program(spec);
        let mut child = cmd.spawn().map_err(|e| Self::spawn_error(spec, e))?;
        let status = child.wait().await?;
        let code = exit_code(spec, status)?;

        if code != 0 && spec.fail_on_non_zero {
            return Err(ExecError::NonZeroExit {
                command: spec.command_line(),
                code,
                stderr: String::new(),
            });
        }
        Ok(code)
    }

    async fn interactive(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> ExecResult<i32> {
        if spec.program.is_empty() {
            return Err(ExecError::MissingProgram);
        }
        trace!(target: "berth.exec.proc", command = %spec, "spawn interactive");

        let mut cmd = cmd_program(spec);
        let mut child = cmd.spawn().map_err(|e| Self::spawn_error(spec, e))?;

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                exit_code(spec, status)
            }
            _ = cancel.cancelled() => {
                debug!(target: "berth.exec.proc", "cancelled; killing child");
                let _ = kill_graceful(&mut child).await;
                Err(ExecError::Cancelled)
            }
        }
    }
}

fn exit_code(spec: &CommandSpec, status: ExitStatus) -> ExecResult<i32> {
    status.code().ok_or_else(|| ExecError::KilledBySignal {
        command: spec.command_line(),
    })
}

#[cfg(feature = "shell")]
pub mod shell;
