use anyhow::Result;
use async_trait::async_trait;
use clap::ArgMatches;
use thiserror::Error;

use boxman::fleet::Fleet;

pub mod run;
pub mod transfer;
pub mod vm;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("There is no host in the current vagrant environment.")]
    NoHostsDiscovered,
    #[error("Required argument `{0}` is missing.")]
    RequiredArgumentMissing(String),
    #[error("Invalid subcommand `{0}`.")]
    InvalidSubcommand(String),
    #[error("No subcommand provided.")]
    NoSubcommandProvided,
}

pub struct CliContext<'a> {
    pub fleet: Fleet,
    pub matches: &'a ArgMatches,
}

impl<'a> CliContext<'a> {
    pub fn new(fleet: Fleet, matches: &'a ArgMatches) -> Self {
        Self { fleet, matches }
    }
}

#[async_trait]
pub trait Command<'a> {
    async fn run(&self, context: &'a CliContext) -> Result<()>;
}

/// The host list the user asked for, if any. The `--vms` value is a plain
/// comma-separated list of names.
pub fn requested_hosts(matches: &ArgMatches) -> Option<Vec<String>> {
    matches.get_one::<String>("vms").map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect()
    })
}

/// Hosts a batch operation targets: the `--vms` list when given, otherwise
/// every host the manager knows about. No hosts at all is a precondition
/// failure that aborts before anything is dispatched.
pub async fn resolve_hosts(ctx: &CliContext<'_>, matches: &ArgMatches) -> Result<Vec<String>> {
    if let Some(hosts) = requested_hosts(matches) {
        if !hosts.is_empty() {
            return Ok(hosts);
        }
    }
    let hosts = ctx.fleet.host_names().await;
    if hosts.is_empty() {
        return Err(CommandError::NoHostsDiscovered.into());
    }
    Ok(hosts)
}

/// Read a required string argument or fail with a [`CommandError`].
pub fn required<'a>(matches: &'a ArgMatches, id: &str) -> Result<&'a String> {
    matches
        .get_one::<String>(id)
        .ok_or_else(|| CommandError::RequiredArgumentMissing(id.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{Arg, Command as ClapCommand};

    fn matches_for(vms: Option<&str>) -> ArgMatches {
        let cmd = ClapCommand::new("test").arg(Arg::new("vms").long("vms"));
        match vms {
            Some(list) => cmd.get_matches_from(["test", "--vms", list]),
            None => cmd.get_matches_from(["test"]),
        }
    }

    #[test]
    fn test_vms_list_splits_on_commas() {
        let matches = matches_for(Some("node1, node2,node3"));
        assert_eq!(
            requested_hosts(&matches),
            Some(vec![
                "node1".to_string(),
                "node2".to_string(),
                "node3".to_string()
            ])
        );
    }

    #[test]
    fn test_missing_vms_flag_is_none() {
        assert_eq!(requested_hosts(&matches_for(None)), None);
    }

    #[test]
    fn test_empty_entries_are_dropped() {
        let matches = matches_for(Some("node1,,"));
        assert_eq!(requested_hosts(&matches), Some(vec!["node1".to_string()]));
    }
}
