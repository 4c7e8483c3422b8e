//! The fleet orchestrator: owns the workspace, the manager binary name, the
//! connection cache, and every operation the CLI fronts.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use derive_getters::Getters;

use crate::exec::{Captured, Exec};
use crate::log::*;
use crate::transfer::{self, ConnectionCache, ConnectionInfo, Direction};

pub mod jobs;
pub mod vagrantfile;

/// Base image used when no Vagrantfile exists yet.
pub const DEFAULT_IMAGE: &str = "ubuntu/xenial64";

/// Remote root directory under which script jobs get their folders.
pub const REMOTE_EXPERIMENT_ROOT: &str = "~/boxman_experiment";

/// A named group of Vagrant VMs sharing one workspace directory.
#[derive(Getters, Debug, Clone)]
pub struct Fleet {
    workspace: PathBuf,
    experiment_dir: PathBuf,
    vagrantfile_path: PathBuf,
    /// The VM-manager binary. `vagrant`, unless a test swaps in a shim.
    manager: String,
    scp_program: String,
    #[getter(skip)]
    exec: Exec,
    #[getter(skip)]
    connections: ConnectionCache,
}

impl Fleet {
    /// Open the default workspace (`$BOXMAN_HOME`, else `~/boxman`),
    /// creating it, and a starter Vagrantfile, when missing.
    pub fn new(debug: bool) -> Result<Self> {
        which::which("vagrant").context(
            "the 'vagrant' binary is not on PATH; install Vagrant before using boxman",
        )?;
        Self::with_programs(Self::default_workspace()?, "vagrant", "scp", debug)
    }

    /// Open a specific workspace with specific manager/scp binaries.
    pub fn with_programs<P: Into<PathBuf>>(
        workspace: P,
        manager: &str,
        scp_program: &str,
        debug: bool,
    ) -> Result<Self> {
        let workspace = workspace.into();
        let experiment_dir = workspace.join("experiment");
        std::fs::create_dir_all(&experiment_dir).with_context(|| {
            format!(
                "creating workspace directories under {} failed",
                workspace.display()
            )
        })?;

        let fleet = Self {
            vagrantfile_path: workspace.join("Vagrantfile"),
            exec: Exec::new(&workspace, debug),
            experiment_dir,
            workspace,
            manager: manager.into(),
            scp_program: scp_program.into(),
            connections: ConnectionCache::new(),
        };
        if !fleet.vagrantfile_path.exists() {
            fleet.create(
                &["node1".to_string(), "node2".to_string()],
                DEFAULT_IMAGE,
                None,
                None,
            )?;
        }
        Ok(fleet)
    }

    pub fn default_workspace() -> Result<PathBuf> {
        if let Ok(home) = std::env::var("BOXMAN_HOME") {
            return Ok(PathBuf::from(home));
        }
        Ok(dirs::home_dir()
            .context("could not determine a home directory")?
            .join("boxman"))
    }

    /// Render the Vagrantfile for the given hosts and image, overwriting the
    /// previous one wholesale. Same inputs, byte-identical file.
    pub fn create(
        &self,
        hosts: &[String],
        image: &str,
        output: Option<&Path>,
        template: Option<&str>,
    ) -> Result<PathBuf> {
        let path = output.unwrap_or(&self.vagrantfile_path).to_path_buf();
        let contents = vagrantfile::render(hosts, image, template);
        std::fs::write(&path, contents)
            .with_context(|| format!("writing Vagrantfile to {} failed", path.display()))?;
        info!("wrote Vagrantfile for {} host(s) to {}", hosts.len(), path.display());
        Ok(path)
    }

    // Lifecycle passthroughs. No host name targets every host the manager
    // knows about.

    pub async fn start(&self, name: Option<&str>) -> Result<()> {
        self.manager_run("up", name).await
    }

    pub async fn stop(&self, name: Option<&str>) -> Result<()> {
        self.manager_run("halt", name).await
    }

    pub async fn suspend(&self, name: Option<&str>) -> Result<()> {
        self.manager_run("suspend", name).await
    }

    pub async fn destroy(&self, name: Option<&str>, force: bool) -> Result<()> {
        let verb = if force { "destroy -f" } else { "destroy" };
        self.manager_run(verb, name).await
    }

    pub async fn status(&self, name: Option<&str>) -> Result<()> {
        self.manager_run("status", name).await
    }

    /// Drop the caller into an interactive shell on the VM.
    pub async fn ssh(&self, name: &str) -> Result<()> {
        self.manager_run("ssh", Some(name)).await
    }

    async fn manager_run(&self, verb: &str, name: Option<&str>) -> Result<()> {
        let command = format!("{} {} {}", self.manager, verb, name.unwrap_or(""));
        self.exec.run(&command).await
    }

    /// Every host name the manager currently knows about. A status query
    /// that fails yields an empty list rather than an error; callers decide
    /// whether that is fatal.
    pub async fn host_names(&self) -> Vec<String> {
        let captured = self.exec.capture(&format!("{} status", self.manager)).await;
        match captured {
            Captured::Output(bytes) => parse_status_hosts(&String::from_utf8_lossy(&bytes)),
            Captured::Failure { reason, .. } => {
                warn!("querying manager status failed: {}", reason);
                vec![]
            }
        }
    }

    /// Copy a local file or directory onto the VM.
    pub async fn upload(
        &self,
        name: &str,
        source: &str,
        dest: &str,
        recursive: bool,
    ) -> Result<()> {
        debug!("upload {} to node {} at {}...", source, name, dest);
        let info = self.connection_info(name).await?;
        let recursive = transfer::wants_recursion(source, recursive);
        transfer::scp(
            &self.scp_program,
            Direction::Upload,
            &info,
            source,
            dest,
            recursive,
        )
        .await
    }

    /// Copy a remote file or directory from the VM. With `prefix_dest`, the
    /// host name is spliced into the local destination so multi-host fan-in
    /// does not collide.
    pub async fn download(
        &self,
        name: &str,
        source: &str,
        dest: &Path,
        prefix_dest: bool,
        recursive: bool,
    ) -> Result<()> {
        debug!("download {} from node {} into {}...", source, name, dest.display());
        let dest = if prefix_dest {
            if dest.is_dir() {
                let host_dir = dest.join(name);
                std::fs::create_dir_all(&host_dir).with_context(|| {
                    format!("creating host directory {} failed", host_dir.display())
                })?;
                host_dir
            } else {
                transfer::insert_host_component(dest, name)
            }
        } else {
            dest.to_path_buf()
        };

        let info = self.connection_info(name).await?;
        let recursive = transfer::wants_recursion(source, recursive);
        transfer::scp(
            &self.scp_program,
            Direction::Download,
            &info,
            source,
            &dest.to_string_lossy(),
            recursive,
        )
        .await
    }

    /// Per-host connection info, resolved once per process via the
    /// manager's ssh-config query and cached for every later transfer.
    async fn connection_info(&self, name: &str) -> Result<ConnectionInfo> {
        self.connections
            .resolve(name, || async {
                let query = format!("{} ssh-config {}", self.manager, name);
                match self.exec.capture(&query).await {
                    Captured::Output(bytes) => {
                        transfer::parse_ssh_config(&String::from_utf8_lossy(&bytes))
                            .with_context(|| format!("parsing ssh-config for node {}", name))
                    }
                    Captured::Failure { output, reason } => Err(anyhow::anyhow!(
                        "querying ssh-config for node {} failed: {} ({})",
                        name,
                        reason,
                        String::from_utf8_lossy(&output).trim()
                    )),
                }
            })
            .await
    }
}

/// Pull host names out of a `vagrant status` dump: the block between the
/// first and second blank lines, first token of each line.
pub fn parse_status_hosts(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let mut blanks = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.trim().is_empty())
        .map(|(i, _)| i);
    let (first, second) = match (blanks.next(), blanks.next()) {
        (Some(first), Some(second)) => (first, second),
        _ => return vec![],
    };
    lines[first + 1..second]
        .iter()
        .filter_map(|line| line.split_whitespace().next())
        .map(|name| name.to_string())
        .collect()
}
