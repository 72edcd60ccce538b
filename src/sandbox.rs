//! Runs a submitted snippet in a child process.
//!
//! Each call gets its own scratch directory (removed when the guard drops),
//! its own interpreter process rooted in that directory, and a hard
//! wall-clock limit after which the child is killed. There are no memory,
//! CPU or network limits.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::config::Config;
use crate::errors::AppError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_INTERPRETER: &str = "python3";
pub const DEFAULT_SCRIPT_NAME: &str = "main.py";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    /// Captured stderr, only when the process exited non-zero.
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CodeSandbox {
    interpreter: PathBuf,
    script_name: String,
    timeout: Duration,
    /// Parent for the per-run scratch directories; system temp dir if unset.
    root: Option<PathBuf>,
}

impl CodeSandbox {
    pub fn new(interpreter: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            script_name: DEFAULT_SCRIPT_NAME.to_string(),
            timeout,
            root: None,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        let sandbox = Self::new(cfg.interpreter.clone(), cfg.exec_timeout)
            .with_script_name(cfg.script_name.clone());
        match &cfg.sandbox_root {
            Some(root) => sandbox.with_root(root.clone()),
            None => sandbox,
        }
    }

    pub fn with_script_name(mut self, name: impl Into<String>) -> Self {
        self.script_name = name.into();
        self
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub async fn execute(&self, source: &str) -> Result<ExecutionResult, AppError> {
        if source.is_empty() {
            return Err(AppError::validation("No code provided"));
        }

        // Dropping `workdir` removes the directory on every path out of here.
        let workdir = self.scratch_dir()?;
        let script = workdir.path().join(&self.script_name);
        tokio::fs::write(&script, source).await?;

        let started = Instant::now();
        let mut child = Command::new(&self.interpreter)
            .arg(&script)
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                anyhow::anyhow!(
                    "failed to start interpreter {}: {}",
                    self.interpreter.display(),
                    e
                )
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let run = async {
            tokio::try_join!(child.wait(), drain(stdout), drain(stderr))
        };

        let waited = tokio::time::timeout(self.timeout, run).await;
        let (status, output, error) = match waited {
            Ok(result) => result?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::error!(error = %e, "failed to kill timed-out child");
                }
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "code execution timed out; child killed"
                );
                return Err(AppError::ExecutionTimeout(self.timeout));
            }
        };

        let success = status.success();
        tracing::info!(
            success,
            exit_code = status.code(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            stdout_bytes = output.len(),
            stderr_bytes = error.len(),
            "code execution finished"
        );

        Ok(ExecutionResult {
            success,
            output,
            error: if success { None } else { Some(error) },
        })
    }

    fn scratch_dir(&self) -> std::io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("linkhub-run-");
        match &self.root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<String> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
