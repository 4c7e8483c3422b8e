//! Synchronous-feeling execution of one external command at a time. The rest
//! of the crate never touches `tokio::process` directly; it goes through
//! [`Exec`].

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use derive_getters::Getters;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_stream::StreamExt;
use tokio_util::codec::{BytesCodec, FramedRead};

use crate::log::*;

/// What came back from a capture-mode execution.
///
/// Capture mode never surfaces an `Err`: downstream parsing inspects the
/// returned payload instead of relying on error propagation. A nonzero exit
/// of the spawned command, or a failure to spawn it at all, is a
/// [`Captured::Failure`] carrying whatever output was collected before
/// things went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Captured {
    /// The command ran to completion with exit status 0. Combined
    /// stdout+stderr bytes.
    Output(Vec<u8>),
    /// The command exited nonzero or could not be launched.
    Failure {
        /// Partial combined output (the launch error text when nothing was
        /// ever spawned).
        output: Vec<u8>,
        /// Human-readable exit status or spawn error.
        reason: String,
    },
}

/// Runs external commands inside the boxman workspace directory.
#[derive(Getters, Debug, Clone)]
pub struct Exec {
    workspace: PathBuf,
    debug: bool,
}

impl Exec {
    pub fn new<P: Into<PathBuf>>(workspace: P, debug: bool) -> Self {
        Self {
            workspace: workspace.into(),
            debug,
        }
    }

    /// Run a command with inherited stdio, failing loudly on a nonzero exit.
    /// The command is split into words; no shell is involved.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self, command: &str) -> Result<()> {
        self.log_invocation(command);
        let words = shell_words::split(command.trim())
            .with_context(|| format!("splitting command '{}' failed", command))?;
        let (head, args) = words
            .split_first()
            .context("cannot run an empty command")?;

        let status = Command::new(head)
            .args(args)
            .current_dir(&self.workspace)
            .status()
            .await
            .with_context(|| format!("spawning command '{}' failed", head))?;
        if !status.success() {
            anyhow::bail!("command '{}' failed: {}", command, status);
        }
        Ok(())
    }

    /// Run a command through `sh -c`, feeding one empty line to stdin and
    /// collecting stdout+stderr into a single buffer.
    ///
    /// The command runs as a redirected group, `{ <command>\n} 2>&1`, so both
    /// streams share one pipe and their relative byte order is exactly what
    /// the command produced. Draining two pipes on this side cannot
    /// reconstruct that order.
    ///
    /// This resolves to a [`Captured`] value in every case, including a
    /// nonzero exit and a spawn failure, so callers can always inspect the
    /// payload.
    #[tracing::instrument(skip(self))]
    pub async fn capture(&self, command: &str) -> Captured {
        self.log_invocation(command);
        let merged = format!("{{ {}\n}} 2>&1", command.trim());
        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(&merged)
            .current_dir(&self.workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                let reason = format!("spawning command '{}' failed: {}", command, err);
                error!("{}", reason);
                return Captured::Failure {
                    output: reason.clone().into_bytes(),
                    reason,
                };
            }
        };

        // Interactive prompts inside the command get an empty answer instead
        // of hanging forever on a closed-but-empty stdin.
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(b"\n").await;
        }

        let mut stdout = FramedRead::new(child.stdout.take().unwrap(), BytesCodec::new());
        let mut stderr = FramedRead::new(child.stderr.take().unwrap(), BytesCodec::new());
        let mut output: Vec<u8> = vec![];
        loop {
            tokio::select! {
                Some(next) = stdout.next() => {
                    if let Ok(bytes) = next {
                        output.extend_from_slice(&bytes);
                    }
                }
                Some(next) = stderr.next() => {
                    if let Ok(bytes) = next {
                        output.extend_from_slice(&bytes);
                    }
                }
                else => {
                    break;
                }
            }
        }

        match child.wait().await {
            Ok(status) if status.success() => Captured::Output(output),
            Ok(status) => Captured::Failure {
                output,
                reason: status.to_string(),
            },
            Err(err) => Captured::Failure {
                output,
                reason: format!("waiting for command '{}' failed: {}", command, err),
            },
        }
    }

    fn log_invocation(&self, command: &str) {
        if self.debug {
            debug!("executing: {}", command.trim());
            debug!("workspace: {}", self.workspace.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec() -> Exec {
        Exec::new(std::env::temp_dir(), false)
    }

    #[tokio::test]
    async fn test_capture_collects_combined_output() {
        let captured = exec().capture("echo out; echo err 1>&2").await;
        match captured {
            Captured::Output(bytes) => {
                let text = String::from_utf8(bytes).unwrap();
                assert!(text.contains("out"));
                assert!(text.contains("err"));
            }
            other => panic!("expected output, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_capture_preserves_cross_stream_ordering() {
        let captured = exec()
            .capture("echo one; echo two 1>&2; echo three")
            .await;
        assert_eq!(
            captured,
            Captured::Output(b"one\ntwo\nthree\n".to_vec()),
            "stderr lines must land between the stdout lines that surround them"
        );
    }

    #[tokio::test]
    async fn test_capture_nonzero_exit_is_a_failure_payload_not_an_error() {
        let captured = exec().capture("echo partial; exit 3").await;
        match captured {
            Captured::Failure { output, reason } => {
                assert!(String::from_utf8(output).unwrap().contains("partial"));
                assert!(reason.contains('3'), "reason was: {}", reason);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_capture_spawn_failure_yields_error_text() {
        let exec = Exec::new("/this/directory/does/not/exist", false);
        match exec.capture("echo hi").await {
            Captured::Failure { output, reason } => {
                assert_eq!(String::from_utf8(output).unwrap(), reason);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_capture_feeds_an_empty_line_to_stdin() {
        let captured = exec().capture("read line; echo \"got:$line:\"").await;
        assert_eq!(
            captured,
            Captured::Output(b"got::\n".to_vec()),
            "stdin should deliver exactly one empty line"
        );
    }

    #[tokio::test]
    async fn test_run_rejects_nonzero_exit() {
        assert!(exec().run("false").await.is_err());
        assert!(exec().run("true").await.is_ok());
    }
}
