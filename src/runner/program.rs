//! Runs a compiled submission with an optional stdin payload.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::TIMEOUT_REASON;
use crate::text;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramOutput {
    /// Decoded stdout with line endings normalized to `\n`.
    pub stdout: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("run failed: {reason}")]
pub struct RunError {
    pub reason: String,
}

impl RunError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

pub struct ProgramRunner;

impl ProgramRunner {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(
        &self,
        executable: &Path,
        cwd: &Path,
        stdin_bytes: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<ProgramOutput, RunError> {
        debug!(program = %executable.display(), "running program");

        let mut cmd = Command::new(executable);
        cmd.current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // With no configured input the program must see EOF, not a pipe
        // that never closes.
        cmd.stdin(match stdin_bytes {
            Some(_) => Stdio::piped(),
            None => Stdio::null(),
        });

        let mut child = cmd
            .spawn()
            .map_err(|e| RunError::new(format!("failed to spawn program: {e}")))?;

        // Feed stdin while draining output, all under the one deadline. A
        // program that never reads a large input would otherwise park the
        // write on a full pipe before the clock starts.
        let stdin_pipe = child.stdin.take();
        let feed = async move {
            if let (Some(mut stdin), Some(input)) = (stdin_pipe, stdin_bytes) {
                // A program that exits without draining stdin closes the
                // pipe; that is its business, not a run failure.
                if let Err(e) = stdin.write_all(input).await {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(RunError::new(format!("failed to write stdin: {e}")));
                    }
                }
            }
            Ok(())
        };
        let gather = async {
            let (fed, waited) = tokio::join!(feed, child.wait_with_output());
            fed?;
            waited.map_err(|e| RunError::new(format!("failed to wait for program: {e}")))
        };
        let output = match tokio::time::timeout(timeout, gather).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(RunError::new(TIMEOUT_REASON)),
        };

        if !output.status.success() {
            let reason = match output.status.code() {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            };
            return Err(RunError::new(reason));
        }

        let stdout = text::decode_text(&output.stdout)
            .map_err(|e| RunError::new(format!("undecodable stdout: {e}")))?;
        Ok(ProgramOutput {
            stdout: text::normalize_newlines(&stdout),
        })
    }
}

impl Default for ProgramRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn pipes_stdin_and_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let exe = write_script(dir.path(), "main", "cat");
        let runner = ProgramRunner::new();

        let out = runner
            .run(&exe, dir.path(), Some(b"1 2\n"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout, "1 2\n");
    }

    #[tokio::test]
    async fn absent_stdin_reads_as_eof() {
        let dir = tempfile::tempdir().unwrap();
        let exe = write_script(dir.path(), "main", "cat\necho done");
        let runner = ProgramRunner::new();

        let out = runner
            .run(&exe, dir.path(), None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout, "done\n");
    }

    #[tokio::test]
    async fn crlf_output_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let exe = write_script(dir.path(), "main", "printf 'a\\r\\nb\\r\\n'");
        let runner = ProgramRunner::new();

        let out = runner
            .run(&exe, dir.path(), None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout, "a\nb\n");
    }

    #[tokio::test]
    async fn overrunning_program_reports_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let exe = write_script(dir.path(), "main", "sleep 5");
        let runner = ProgramRunner::new();

        let err = runner
            .run(&exe, dir.path(), None, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.reason, "timeout");
    }

    #[tokio::test]
    async fn timeout_covers_stdin_larger_than_the_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let exe = write_script(dir.path(), "main", "sleep 5");
        let runner = ProgramRunner::new();
        let input = vec![b'x'; 256 * 1024];

        let started = std::time::Instant::now();
        let err = runner
            .run(&exe, dir.path(), Some(&input), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err.reason, "timeout");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn large_stdin_round_trips_through_the_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let exe = write_script(dir.path(), "main", "cat");
        let runner = ProgramRunner::new();
        let input = "x".repeat(256 * 1024);

        let out = runner
            .run(&exe, dir.path(), Some(input.as_bytes()), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(out.stdout.len(), input.len());
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_run_failure() {
        let dir = tempfile::tempdir().unwrap();
        let exe = write_script(dir.path(), "main", "exit 3");
        let runner = ProgramRunner::new();

        let err = runner
            .run(&exe, dir.path(), None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.reason, "exit code 3");
    }

    #[tokio::test]
    async fn undecodable_stdout_is_a_run_failure() {
        let dir = tempfile::tempdir().unwrap();
        let exe = write_script(dir.path(), "main", "printf '\\377\\377'");
        let runner = ProgramRunner::new();

        let err = runner
            .run(&exe, dir.path(), None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.reason.starts_with("undecodable stdout"));
    }

    #[tokio::test]
    async fn runs_with_sandbox_as_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.txt"), "from-cwd\n").unwrap();
        let exe = write_script(dir.path(), "main", "cat data.txt");
        let runner = ProgramRunner::new();

        let out = runner
            .run(&exe, dir.path(), None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout, "from-cwd\n");
    }
}
