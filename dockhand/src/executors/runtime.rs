//! External process invocation

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::compose::chain::ComposeChain;
use crate::errors::DockhandError;

/// Captured output of one process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
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

    /// Zero exit code and no stderr line starting with "error"
    pub fn success(&self) -> bool {
        self.code == Some(0) && !stderr_signals_error(&self.stderr)
    }

    /// Stdout on success, stdout and stderr verbatim otherwise
    pub fn message(&self) -> String {
        if self.success() {
            return self.stdout.clone();
        }
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }

    /// Stdout, or an execution error carrying the raw output
    pub fn into_result(self) -> Result<String, DockhandError> {
        if self.success() {
            Ok(self.stdout)
        } else {
            let message = self.message();
            Err(DockhandError::ExecutionError(if message.is_empty() {
                format!("process exited with code {:?}", self.code)
            } else {
                message
            }))
        }
    }
}

fn stderr_signals_error(stderr: &str) -> bool {
    stderr.lines().any(|line| {
        line.trim_start()
            .get(..5)
            .is_some_and(|head| head.eq_ignore_ascii_case("error"))
    })
}

/// Runs external programs
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, DockhandError>;
}

/// [`CommandRunner`] backed by `tokio::process`
#[derive(Debug, Default, Clone)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, DockhandError> {
        debug!("Running: {} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DockhandError::ExecutionError(format!("Failed to run {}: {}", program, e)))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Container runtime CLI (`docker compose ...`)
#[derive(Clone)]
pub struct ComposeRuntime {
    program: String,
    runner: Arc<dyn CommandRunner>,
}

impl ComposeRuntime {
    pub fn new(program: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    /// Run one compose subcommand over `chain`
    pub async fn compose(
        &self,
        chain: &ComposeChain,
        subcommand: &[&str],
    ) -> Result<CommandOutput, DockhandError> {
        let output = self.runner.run(&self.program, &chain.args(subcommand)).await?;
        if !output.success() {
            warn!(
                "{} compose {} for {} failed (code {:?}): {}",
                self.program,
                subcommand.join(" "),
                chain.project,
                output.code,
                output.message()
            );
        }
        Ok(output)
    }
}
