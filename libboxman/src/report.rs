//! Normalization of raw captured output into job results, and rendering of
//! the per-job report that gets printed for humans.
//!
//! The remote-shell invocation wraps every user command with a framing
//! protocol: a single 0x04 delimiter byte plus a newline before the command
//! runs, and a literal `return_code: <exit status>` trailer after it. Parsing
//! here depends on exactly that framing.

use anyhow::{Context, Result};
use derive_getters::Getters;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::exec::Captured;

/// How a job ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Ran to completion and exited 0.
    Success,
    /// Ran to completion but exited nonzero. Reportable, not an error.
    Finished,
    /// The underlying executor never produced a parseable exit code.
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Success => write!(f, "Success"),
            JobStatus::Finished => write!(f, "Finished"),
            JobStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Exit code of the remote command, when one could be recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnCode {
    Code(i32),
    NotApplicable,
}

impl std::fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReturnCode::Code(code) => write!(f, "{}", code),
            ReturnCode::NotApplicable => write!(f, "N.A."),
        }
    }
}

/// Normalized outcome of one job on one host.
///
/// Invariants: `status == Success` iff `return_code == Code(0)`;
/// `status == Failed` iff `return_code == NotApplicable`.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    status: JobStatus,
    return_code: ReturnCode,
    output: String,
}

impl JobResult {
    pub fn new(status: JobStatus, return_code: ReturnCode, output: String) -> Self {
        Self {
            status,
            return_code,
            output,
        }
    }

    /// A result for a job whose executor fell over before producing a
    /// parseable exit code.
    pub fn failed<S: Into<String>>(output: S) -> Self {
        Self {
            status: JobStatus::Failed,
            return_code: ReturnCode::NotApplicable,
            output: output.into(),
        }
    }

    pub fn prepend_output(&mut self, prefix: &str) {
        self.output = format!("{}\n{}", prefix, self.output);
    }
}

/// What a single-host job hands back, depending on its report switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// `report = false`: the bare parsed record, for composition.
    Record(JobResult),
    /// `report = true, report_alone = false`: the rendered report, for a
    /// dispatcher that prints everything itself.
    Report(String),
    /// `report = true, report_alone = true`: already printed, nothing to
    /// hand back.
    Done,
}

/// Parse a capture-mode payload into a [`JobResult`].
///
/// A failure payload parses unconditionally (`Failed` / `N.A.`). A success
/// payload must carry the `return_code:` trailer; its absence is an
/// unrecoverable framing error for this job.
#[tracing::instrument]
pub fn parse_captured(captured: &Captured) -> Result<JobResult> {
    match captured {
        Captured::Failure { output, .. } => Ok(JobResult::failed(
            String::from_utf8_lossy(output).into_owned(),
        )),
        Captured::Output(bytes) => {
            let text = String::from_utf8_lossy(bytes);

            let output_re =
                Regex::new(r"(?ms)^\x04(.+?)\nreturn_code").context("compiling output regex")?;
            let output = output_re
                .captures(&text)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();

            let code_re =
                Regex::new(r"return_code: (\d+)").context("compiling return-code regex")?;
            let code: i32 = code_re
                .captures(&text)
                .and_then(|caps| caps.get(1))
                .context("output carries no 'return_code:' marker")?
                .as_str()
                .parse()
                .context("parsing return code digits")?;

            let status = if code == 0 {
                JobStatus::Success
            } else {
                JobStatus::Finished
            };
            Ok(JobResult::new(status, ReturnCode::Code(code), output))
        }
    }
}

/// Which single-host job produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    Command,
    Script,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Command => write!(f, "run_command"),
            JobKind::Script => write!(f, "run_script"),
        }
    }
}

/// The structured per-job report. Rendering is separate from the fields so
/// the field contract stays testable independent of formatting.
#[derive(Getters, Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    node: String,
    kind: JobKind,
    description: String,
    result: JobResult,
    /// Remote job folder, for script jobs.
    remote_folder: Option<String>,
    /// Local folder output files were fetched into, for script jobs that
    /// produced any.
    local_folder: Option<String>,
}

impl JobReport {
    pub fn command<S: Into<String>>(node: S, command: S, result: JobResult) -> Self {
        Self {
            node: node.into(),
            kind: JobKind::Command,
            description: command.into(),
            result,
            remote_folder: None,
            local_folder: None,
        }
    }

    pub fn script<S: Into<String>>(
        node: S,
        script: S,
        result: JobResult,
        remote_folder: String,
        local_folder: Option<String>,
    ) -> Self {
        Self {
            node: node.into(),
            kind: JobKind::Script,
            description: script.into(),
            result,
            remote_folder: Some(remote_folder),
            local_folder,
        }
    }

    pub fn render(&self) -> String {
        let mut lines = vec![
            String::new(),
            String::new(),
            "========= JOB REPORT =========".to_string(),
            format!("node_name: {}", self.node),
            format!("job_description: {} \"{}\"", self.kind, self.description),
            format!(
                "job_status/node_return_code: {} / {}",
                self.result.status(),
                self.result.return_code()
            ),
        ];
        if let Some(remote) = &self.remote_folder {
            lines.push(format!("node job_folder: {}", remote));
            lines.push(format!(
                "local output folder: {}",
                self.local_folder.as_deref().unwrap_or("N.A.")
            ));
        }
        lines.push(format!("console output:\n{}\n", self.result.output()));
        lines.join("\n")
    }
}

impl std::fmt::Display for JobReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured(text: &str) -> Captured {
        Captured::Output(text.as_bytes().to_vec())
    }

    #[test]
    fn test_success_payload_parses_output_between_markers() {
        let result = parse_captured(&captured("\u{4}\nhi\nreturn_code: 0\n")).unwrap();
        assert_eq!(*result.status(), JobStatus::Success);
        assert_eq!(*result.return_code(), ReturnCode::Code(0));
        assert_eq!(result.output(), "hi");
    }

    #[test]
    fn test_nonzero_exit_is_finished_with_empty_output() {
        let result = parse_captured(&captured("\u{4}\nreturn_code: 3\n")).unwrap();
        assert_eq!(*result.status(), JobStatus::Finished);
        assert_eq!(*result.return_code(), ReturnCode::Code(3));
        assert_eq!(result.output(), "");
    }

    #[test]
    fn test_multiline_output_survives_parsing() {
        let result =
            parse_captured(&captured("\u{4}\nline one\nline two\nreturn_code: 0\n")).unwrap();
        assert_eq!(result.output(), "line one\nline two");
    }

    #[test]
    fn test_failure_payload_is_failed_with_partial_text() {
        let result = parse_captured(&Captured::Failure {
            output: b"ssh: connect refused".to_vec(),
            reason: "exit status: 255".into(),
        })
        .unwrap();
        assert_eq!(*result.status(), JobStatus::Failed);
        assert_eq!(*result.return_code(), ReturnCode::NotApplicable);
        assert_eq!(result.output(), "ssh: connect refused");
    }

    #[test]
    fn test_missing_return_code_marker_is_a_framing_error() {
        assert!(parse_captured(&captured("\u{4}\nonly output, no trailer\n")).is_err());
    }

    #[test]
    fn test_status_and_return_code_invariants() {
        for code in [0, 1, 3, 127] {
            let result =
                parse_captured(&captured(&format!("\u{4}\nx\nreturn_code: {}\n", code))).unwrap();
            assert_eq!(
                *result.status() == JobStatus::Success,
                *result.return_code() == ReturnCode::Code(0)
            );
            assert_ne!(*result.status(), JobStatus::Failed);
        }
        let failed = JobResult::failed("boom");
        assert_eq!(*failed.return_code(), ReturnCode::NotApplicable);
    }

    #[test]
    fn test_report_render_round_trips_parsed_fields() {
        let result = parse_captured(&captured("\u{4}\nhello world\nreturn_code: 7\n")).unwrap();
        let report = JobReport::command("node1", "greet", result.clone());
        let rendered = report.render();

        let code_re = Regex::new(r"node_return_code: \w+ / (\d+)").unwrap();
        let code: i32 = code_re.captures(&rendered).unwrap()[1].parse().unwrap();
        assert_eq!(ReturnCode::Code(code), *result.return_code());

        let output = rendered
            .split("console output:\n")
            .nth(1)
            .unwrap()
            .trim_end();
        assert_eq!(output, result.output());
    }

    #[test]
    fn test_script_report_renders_folder_lines() {
        let report = JobReport::script(
            "node2",
            "job.sh",
            JobResult::new(JobStatus::Success, ReturnCode::Code(0), "ok".into()),
            "~/boxman_experiment/job.sh_1700000000/".into(),
            None,
        );
        let rendered = report.render();
        assert!(rendered.contains("node job_folder: ~/boxman_experiment/job.sh_1700000000/"));
        assert!(rendered.contains("local output folder: N.A."));
    }
}
