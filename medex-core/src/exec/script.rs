//! Scripted [`Exec`] implementation for tests.

use super::{Exec, ExecOutput};
use crate::error::ExecError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// What a scripted binary does when invoked.
#[derive(Debug, Clone, Default)]
pub struct ScriptedResult {
    pub stdout: String,
    pub stderr_lines: Vec<String>,
    pub code: i32,
    /// File written before returning, emulating tools that produce output
    /// artifacts (ffmpeg, convert).
    pub write: Option<(PathBuf, Vec<u8>)>,
}

impl ScriptedResult {
    pub fn stdout<S: Into<String>>(stdout: S) -> Self {
        ScriptedResult {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failure(code: i32) -> Self {
        ScriptedResult {
            code,
            ..Default::default()
        }
    }
}

type Handler = dyn Fn(&[String]) -> ScriptedResult + Send + Sync;

/// Test double that dispatches on the binary name and records every call.
///
/// Handlers receive the rendered argument vector, so a handler can inspect
/// substituted paths, read the input file and write the output file the
/// real tool would have produced.
#[derive(Default)]
pub struct ScriptedExec {
    handlers: Vec<(String, Arc<Handler>)>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedExec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, bin: &str, handler: F) -> Self
    where
        F: Fn(&[String]) -> ScriptedResult + Send + Sync + 'static,
    {
        self.handlers.push((bin.to_string(), Arc::new(handler)));
        self
    }

    /// All recorded invocations, in call order.
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, bin: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(b, _)| b == bin)
            .count()
    }

    fn dispatch(&self, bin: &str, args: &[String]) -> Result<ScriptedResult, ExecError> {
        self.calls
            .lock()
            .unwrap()
            .push((bin.to_string(), args.to_vec()));
        // Match on the basename so templates may carry full tool paths.
        let name = Path::new(bin)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| bin.to_string());
        let handler = self
            .handlers
            .iter()
            .find(|(b, _)| *b == name || *b == bin)
            .map(|(_, h)| h.clone())
            .ok_or_else(|| ExecError::Spawn {
                bin: bin.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not scripted"),
            })?;
        let result = handler(args);
        if let Some((path, bytes)) = &result.write {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            std::fs::write(path, bytes).map_err(|source| ExecError::Io {
                bin: bin.to_string(),
                source,
            })?;
        }
        Ok(result)
    }
}

#[async_trait]
impl Exec for ScriptedExec {
    async fn run(&self, bin: &str, args: &[String]) -> Result<ExecOutput, ExecError> {
        let result = self.dispatch(bin, args)?;
        if result.code != 0 {
            return Err(ExecError::Failed {
                bin: bin.to_string(),
                code: result.code,
                stderr: result.stderr_lines.join("\n"),
            });
        }
        Ok(ExecOutput {
            stdout: result.stdout,
            stderr: result.stderr_lines.join("\n"),
            code: result.code,
        })
    }

    async fn run_stream(
        &self,
        bin: &str,
        args: &[String],
        on_line: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<i32, ExecError> {
        let result = self.dispatch(bin, args)?;
        for line in &result.stderr_lines {
            on_line(line);
        }
        Ok(result.code)
    }
}
