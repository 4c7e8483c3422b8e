//! File transfer to and from VMs via the local `scp` binary, plus the
//! per-host connection-info cache.
//!
//! Connection parameters come from `vagrant ssh-config <host>`, parsed from
//! its `Key value` line-oriented output. Each host is resolved at most once
//! per process; concurrent first use by different hosts never contends on a
//! shared slot.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use derive_getters::Getters;
use tokio::process::Command;
use tokio::sync::{Mutex, OnceCell};

use crate::log::*;

/// Everything `scp` needs to reach one VM.
#[derive(Getters, Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    user: String,
    ip: String,
    port: String,
    key_file: String,
}

/// Parse the `Key value` lines of a `vagrant ssh-config` dump.
pub fn parse_ssh_config(text: &str) -> Result<ConnectionInfo> {
    let mut fields: HashMap<&str, &str> = HashMap::new();
    for line in text.lines() {
        let mut words = line.split_whitespace();
        if let (Some(key), Some(value)) = (words.next(), words.next()) {
            fields.insert(key, value);
        }
    }

    let get = |key: &str| -> Result<String> {
        fields
            .get(key)
            .map(|v| v.to_string())
            .with_context(|| format!("ssh-config output carries no '{}' line", key))
    };
    Ok(ConnectionInfo {
        user: get("User")?,
        ip: get("HostName")?,
        port: get("Port")?,
        key_file: get("IdentityFile")?,
    })
}

/// Process-wide cache of per-host [`ConnectionInfo`], populated lazily on
/// first transfer and never invalidated within a run.
///
/// Each host gets its own `OnceCell` slot, so two workers racing on the same
/// host resolve it exactly once while workers on different hosts proceed
/// independently.
#[derive(Debug, Clone, Default)]
pub struct ConnectionCache {
    slots: Arc<Mutex<HashMap<String, Arc<OnceCell<ConnectionInfo>>>>>,
}

impl ConnectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the host's connection info, running `resolver` on the first
    /// miss.
    pub async fn resolve<F, Fut>(&self, host: &str, resolver: F) -> Result<ConnectionInfo>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ConnectionInfo>>,
    {
        let cell = {
            let mut slots = self.slots.lock().await;
            slots.entry(host.to_string()).or_default().clone()
        };
        let info = cell.get_or_try_init(resolver).await?;
        Ok(info.clone())
    }
}

/// Which way a transfer moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// Build the full argument vector for one `scp` invocation.
pub fn scp_args(
    direction: Direction,
    info: &ConnectionInfo,
    source: &str,
    dest: &str,
    recursive: bool,
) -> Vec<String> {
    let mut args: Vec<String> = vec![];
    if recursive {
        args.push("-r".into());
    }
    args.extend(
        [
            "-P",
            info.port(),
            "-q",
            "-o",
            "LogLevel=QUIET",
            "-o",
            "StrictHostKeyChecking=no",
            "-i",
            info.key_file(),
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    let remote_prefix = format!("{}@{}:", info.user(), info.ip());
    match direction {
        Direction::Upload => {
            args.push(source.into());
            args.push(format!("{}{}", remote_prefix, dest));
        }
        Direction::Download => {
            args.push(format!("{}{}", remote_prefix, source));
            args.push(dest.into());
        }
    }
    args
}

/// Run one `scp`. The exit status is logged, not propagated; transfers are
/// best-effort the way the manager's own `scp` passthrough is.
#[tracing::instrument]
pub async fn scp(
    scp_program: &str,
    direction: Direction,
    info: &ConnectionInfo,
    source: &str,
    dest: &str,
    recursive: bool,
) -> Result<()> {
    let args = scp_args(direction, info, source, dest, recursive);
    debug!("scp {}", args.join(" "));
    let status = Command::new(scp_program)
        .args(&args)
        .status()
        .await
        .with_context(|| format!("spawning '{}' failed", scp_program))?;
    if !status.success() {
        warn!("scp exited with {}", status);
    }
    Ok(())
}

/// A transfer recurses when asked to, or when the source path names a
/// directory by its trailing separator.
pub fn wants_recursion(source: &str, recursive: bool) -> bool {
    recursive || source.ends_with('/')
}

/// Rewrite a download destination so each host's files land in their own
/// subtree: `a/b/file` becomes `a/b/<host>/file`.
pub fn insert_host_component(dest: &Path, host: &str) -> PathBuf {
    match dest.file_name() {
        Some(name) => dest.with_file_name(host).join(name),
        None => dest.join(host),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SSH_CONFIG: &str = "Host node1\n  HostName 127.0.0.1\n  User vagrant\n  Port 2222\n  UserKnownHostsFile /dev/null\n  StrictHostKeyChecking no\n  IdentityFile /keys/node1/private_key\n";

    fn info() -> ConnectionInfo {
        parse_ssh_config(SSH_CONFIG).unwrap()
    }

    #[test]
    fn test_ssh_config_parses_key_value_lines() {
        let info = info();
        assert_eq!(info.user(), "vagrant");
        assert_eq!(info.ip(), "127.0.0.1");
        assert_eq!(info.port(), "2222");
        assert_eq!(info.key_file(), "/keys/node1/private_key");
    }

    #[test]
    fn test_ssh_config_missing_field_is_an_error() {
        assert!(parse_ssh_config("Host node1\n  User vagrant\n").is_err());
    }

    #[test]
    fn test_upload_args_place_remote_on_the_right() {
        let args = scp_args(Direction::Upload, &info(), "./script.sh", "~/dest.sh", false);
        assert_eq!(
            args,
            vec![
                "-P",
                "2222",
                "-q",
                "-o",
                "LogLevel=QUIET",
                "-o",
                "StrictHostKeyChecking=no",
                "-i",
                "/keys/node1/private_key",
                "./script.sh",
                "vagrant@127.0.0.1:~/dest.sh",
            ]
        );
    }

    #[test]
    fn test_download_args_place_remote_on_the_left_and_recurse() {
        let args = scp_args(Direction::Download, &info(), "~/out/", "./local", true);
        assert_eq!(args[0], "-r");
        assert_eq!(args[args.len() - 2], "vagrant@127.0.0.1:~/out/");
        assert_eq!(args[args.len() - 1], "./local");
    }

    #[test]
    fn test_trailing_separator_forces_recursion() {
        assert!(wants_recursion("~/output/", false));
        assert!(wants_recursion("~/output", true));
        assert!(!wants_recursion("~/output", false));
    }

    #[test]
    fn test_host_component_is_inserted_before_the_file_name() {
        assert_eq!(
            insert_host_component(Path::new("/tmp/results/file.txt"), "node2"),
            Path::new("/tmp/results/node2/file.txt")
        );
    }

    #[tokio::test]
    async fn test_cache_resolves_each_host_once() -> Result<()> {
        use std::sync::atomic::{AtomicU32, Ordering};
        let calls = Arc::new(AtomicU32::new(0));
        let cache = ConnectionCache::new();

        for _ in 0..3 {
            let calls = calls.clone();
            let resolved = cache
                .resolve("node1", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    parse_ssh_config(SSH_CONFIG)
                })
                .await?;
            assert_eq!(resolved.port(), "2222");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }
}
