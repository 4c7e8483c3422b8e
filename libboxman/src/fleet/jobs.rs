//! Single-host jobs: run a shell command or a whole script on one VM.
//!
//! Both jobs honor two independent switches. `report = false` hands back the
//! bare parsed record for composition. With `report = true`,
//! `report_alone = true` prints the rendered report on the spot, while
//! `report_alone = false` returns it; the parallel dispatcher relies on the
//! latter so workers do not all print redundantly.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

use super::{Fleet, REMOTE_EXPERIMENT_ROOT};
use crate::log::*;
use crate::report::{self, JobOutcome, JobReport, JobResult, JobStatus, ReturnCode};

impl Fleet {
    /// The remote-shell invocation that frames a user command for parsing:
    /// a 0x04 delimiter byte plus newline before it runs, a literal
    /// `return_code: <exit status>` after.
    ///
    /// The user command runs in a subshell so that an `exit` (or any other
    /// shell-terminating construct) still leaves the trailer to be echoed.
    /// The `$?` is escaped so the local shell hands it through to the VM's
    /// shell untouched.
    pub fn remote_shell_invocation(&self, name: &str, command: &str) -> String {
        format!(
            "{} ssh {} -c \"printf '\\4\\n';( {} ); echo \\\"return_code: \\$?\\\"\"",
            self.manager(),
            name,
            command
        )
    }

    /// Run one framed command and parse the capture into a record.
    async fn command_record(&self, name: &str, command: &str) -> Result<JobResult> {
        debug!("execute \"{}\" on node {}......", command, name);
        let invocation = self.remote_shell_invocation(name, command);
        let captured = self.exec.capture(&invocation).await;
        report::parse_captured(&captured)
            .with_context(|| format!("parsing result of \"{}\" on node {}", command, name))
    }

    /// Run a shell command on the named VM.
    pub async fn run_command(
        &self,
        name: &str,
        command: &str,
        report: bool,
        report_alone: bool,
    ) -> Result<JobOutcome> {
        let result = self.command_record(name, command).await?;
        if !report {
            return Ok(JobOutcome::Record(result));
        }

        let rendered = JobReport::command(name, command, result).render();
        if report_alone {
            println!("{}", rendered);
            Ok(JobOutcome::Done)
        } else {
            Ok(JobOutcome::Report(rendered))
        }
    }

    /// Ship a local script to the named VM, run it there, and bring its
    /// console output, plus any files it left in `output/`, back home.
    pub async fn run_script(
        &self,
        name: &str,
        script_path: &Path,
        data: Option<&Path>,
        report: bool,
        report_alone: bool,
    ) -> Result<JobOutcome> {
        let script_name = script_path
            .file_name()
            .with_context(|| format!("script path {} has no file name", script_path.display()))?
            .to_string_lossy()
            .to_string();
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock is before the unix epoch")?
            .as_secs();
        let job_folder = format!("{}_{}", script_name, stamp);
        let remote_job_dir = format!("{}/{}", REMOTE_EXPERIMENT_ROOT, job_folder);
        let remote_script = format!("{}/{}", remote_job_dir, script_name);

        // Ensure the remote root exists: probe via listing, create when the
        // listing reports there is no such directory.
        let probe = self
            .command_record(name, &format!("ls -d {}/", REMOTE_EXPERIMENT_ROOT))
            .await?;
        if probe.output().contains("No such file or directory") {
            self.command_record(name, &format!("mkdir {}", REMOTE_EXPERIMENT_ROOT))
                .await?;
        }

        // Fresh job folder, then the script itself.
        self.command_record(name, &format!("mkdir {}", remote_job_dir))
            .await?;
        self.upload(name, &script_path.to_string_lossy(), &remote_script, false)
            .await?;

        // Data lands in a `data` subdirectory regardless of what the local
        // source was called.
        if let Some(data) = data {
            if data.is_dir() {
                self.upload(name, &data.to_string_lossy(), &remote_job_dir, true)
                    .await?;
                let data_folder = data
                    .file_name()
                    .with_context(|| format!("data path {} has no file name", data.display()))?
                    .to_string_lossy()
                    .to_string();
                self.command_record(
                    name,
                    &format!(
                        "mv {base}/{folder} {base}/data",
                        base = remote_job_dir,
                        folder = data_folder
                    ),
                )
                .await?;
            } else {
                let data_dir = format!("{}/data/", remote_job_dir);
                self.command_record(name, &format!("mkdir {}", data_dir))
                    .await?;
                self.upload(name, &data.to_string_lossy(), &data_dir, false)
                    .await?;
            }
        }

        // Run it, console output redirected into the job folder. A nonzero
        // exit flows through as Finished; a Failed record means the manager
        // invocation itself fell over and this job cannot continue.
        // `sh script arg`, not dot-sourcing: POSIX `.` takes no arguments,
        // so a sourced script would see an empty job-dir argument.
        let run_result = self
            .command_record(
                name,
                &format!(
                    "sh {script} {args} 2>&1 > {dir}/console_output.txt",
                    script = remote_script,
                    args = remote_job_dir,
                    dir = remote_job_dir
                ),
            )
            .await?;
        if *run_result.status() == JobStatus::Failed {
            anyhow::bail!(
                "executing script '{}' on node {} failed: {}",
                script_name,
                name,
                run_result.output()
            );
        }
        let mut result = run_result;

        // The script's own output went to console_output.txt; stitch it in
        // front of whatever the wrapper captured.
        let console = self
            .command_record(name, &format!("cat {}/console_output.txt", remote_job_dir))
            .await?;
        result.prepend_output(console.output());

        // Fetch output files when the script produced any.
        let output_query = self
            .command_record(name, &format!("ls {}/output/", remote_job_dir))
            .await?;
        let have_output = *output_query.return_code() == ReturnCode::Code(0)
            && !output_query.output().is_empty();
        let mut local_folder = None;
        if have_output {
            let local_dir = self
                .experiment_dir()
                .join(name)
                .join(&job_folder)
                .join("output");
            std::fs::create_dir_all(&local_dir).with_context(|| {
                format!("creating local output folder {} failed", local_dir.display())
            })?;
            self.download(
                name,
                &format!("{}/output/", remote_job_dir),
                &local_dir,
                false,
                true,
            )
            .await?;
            local_folder = Some(format!("{}/", local_dir.display()));
        }

        if !report {
            return Ok(JobOutcome::Record(result));
        }

        let script_display = script_path.to_string_lossy().to_string();
        let rendered = JobReport::script(
            name.to_string(),
            script_display,
            result,
            format!("{}/", remote_job_dir),
            local_folder,
        )
        .render();
        if report_alone {
            println!("{}", rendered);
            Ok(JobOutcome::Done)
        } else {
            Ok(JobOutcome::Report(rendered))
        }
    }
}
