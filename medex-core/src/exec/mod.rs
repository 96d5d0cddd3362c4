//! Uniform capability to run external programs.
//!
//! Everything the indexer shells out to (hashing, probing, transcoding,
//! identify, sound analysis) goes through the [`Exec`] trait so the
//! pipelines can be exercised without any tool installed. [`SystemExec`] is
//! the real implementation; [`script::ScriptedExec`] replays canned
//! behaviour in tests.

pub mod script;
pub mod template;

use crate::error::ExecError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

pub use template::CommandTemplate;

/// Captured result of a completed program run.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

/// Runs external programs. No shell is ever involved; arguments are passed
/// as a vector.
#[async_trait]
pub trait Exec: Send + Sync {
    /// Run to completion, capturing stdout and stderr. A non-zero exit is
    /// an [`ExecError::Failed`].
    async fn run(&self, bin: &str, args: &[String]) -> Result<ExecOutput, ExecError>;

    /// Run a long-lived program, delivering each stderr line to `on_line`
    /// as it appears. Returns the exit code; callers decide what a non-zero
    /// status means for them.
    async fn run_stream(
        &self,
        bin: &str,
        args: &[String],
        on_line: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<i32, ExecError>;

    /// Like [`Exec::run`] but failures are logged and swallowed. Only for
    /// cleanup paths whose outcome never feeds a pipeline decision.
    async fn run_quiet(&self, bin: &str, args: &[String]) -> Option<ExecOutput> {
        match self.run(bin, args).await {
            Ok(output) => Some(output),
            Err(err) => {
                warn!("{err}");
                None
            }
        }
    }
}

/// [`Exec`] backed by `tokio::process`.
pub struct SystemExec;

#[async_trait]
impl Exec for SystemExec {
    async fn run(&self, bin: &str, args: &[String]) -> Result<ExecOutput, ExecError> {
        debug!(bin, ?args, "exec");
        let output = Command::new(bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ExecError::Spawn {
                bin: bin.to_string(),
                source,
            })?;

        let code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(ExecError::Failed {
                bin: bin.to_string(),
                code,
                stderr: tail(&stderr, 10),
            });
        }

        Ok(ExecOutput {
            stdout,
            stderr,
            code,
        })
    }

    async fn run_stream(
        &self,
        bin: &str,
        args: &[String],
        on_line: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<i32, ExecError> {
        debug!(bin, ?args, "exec stream");
        let mut child = Command::new(bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                bin: bin.to_string(),
                source,
            })?;

        // stderr is always piped above, so take() cannot miss.
        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => on_line(&line),
                    Ok(None) => break,
                    Err(source) => {
                        return Err(ExecError::Io {
                            bin: bin.to_string(),
                            source,
                        });
                    }
                }
            }
        }

        let status = child.wait().await.map_err(|source| ExecError::Io {
            bin: bin.to_string(),
            source,
        })?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// Last `n` lines of a program's stderr, for error messages.
fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_the_last_lines() {
        let text = "a\nb\nc\nd";
        assert_eq!(tail(text, 2), "c\nd");
        assert_eq!(tail(text, 10), "a\nb\nc\nd");
    }
}
