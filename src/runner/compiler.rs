//! Compiler invocation with a wall-clock budget.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use super::TIMEOUT_REASON;
use crate::layout;
use crate::text;

/// Outcome of a compiler run that exited zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput {
    /// Combined, decoded stdout and stderr of the compiler.
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("compilation failed: {reason}")]
pub struct CompileError {
    pub reason: String,
    /// Whatever the compiler printed before failing. Empty when it never ran.
    pub output: String,
}

impl CompileError {
    fn without_output(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            output: String::new(),
        }
    }
}

/// Invokes the configured compiler as `<compiler> -o main <source>` inside
/// the given working directory.
pub struct CompilerRunner {
    compiler_path: PathBuf,
    timeout: Duration,
}

impl CompilerRunner {
    pub fn new(compiler_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            compiler_path: compiler_path.into(),
            timeout,
        }
    }

    pub async fn compile(
        &self,
        source_file: &str,
        cwd: &Path,
    ) -> Result<CompileOutput, CompileError> {
        debug!(
            compiler = %self.compiler_path.display(),
            source = source_file,
            "invoking compiler"
        );

        let mut cmd = Command::new(&self.compiler_path);
        cmd.arg("-o")
            .arg(layout::EXECUTABLE_FILE)
            .arg(source_file)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| CompileError::without_output(format!("failed to spawn compiler: {e}")))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(CompileError::without_output(format!(
                    "failed to wait for compiler: {e}"
                )))
            }
            Err(_) => return Err(CompileError::without_output(TIMEOUT_REASON)),
        };

        let combined = combine_streams(&output.stdout, &output.stderr);
        if output.status.success() {
            Ok(CompileOutput { output: combined })
        } else {
            let reason = match output.status.code() {
                Some(code) => format!("compiler exit code {code}"),
                None => "compiler terminated by signal".to_string(),
            };
            Err(CompileError {
                reason,
                output: combined,
            })
        }
    }
}

/// Diagnostics go through the lossy decoder: a garbled warning is still more
/// useful to a student than an encoding error.
fn combine_streams(stdout: &[u8], stderr: &[u8]) -> String {
    let mut combined = Vec::with_capacity(stdout.len() + stderr.len());
    combined.extend_from_slice(stdout);
    combined.extend_from_slice(stderr);
    text::normalize_newlines(&text::decode_text_lossy(&combined))
}
