//! `run command` / `run script`: the batch jobs that fan out across hosts.
//!
//! One host calls the job directly with `report_alone = true` so the report
//! prints immediately and no polling delay is ever observable. More than one
//! host goes through the parallel dispatcher with `report_alone = false`, so
//! workers hand their reports back for completion-order printing.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;

use boxman::dispatch;

use super::{required, resolve_hosts, CliContext, CommandError};

pub struct RunCommand;

impl RunCommand {
    pub fn new() -> Self {
        Self
    }

    async fn subcommand_command(
        &self,
        ctx: &CliContext<'_>,
        matches: &clap::ArgMatches,
    ) -> Result<()> {
        let command = required(matches, "command")?.clone();
        let hosts = resolve_hosts(ctx, matches).await?;

        if hosts.len() > 1 {
            let fleet = ctx.fleet.clone();
            dispatch::run_parallel(&hosts, move |host| {
                let fleet = fleet.clone();
                let command = command.clone();
                async move { fleet.run_command(&host, &command, true, false).await }
            })
            .await?;
        } else {
            ctx.fleet.run_command(&hosts[0], &command, true, true).await?;
        }
        Ok(())
    }

    async fn subcommand_script(
        &self,
        ctx: &CliContext<'_>,
        matches: &clap::ArgMatches,
    ) -> Result<()> {
        let script = PathBuf::from(required(matches, "script")?);
        let data = matches.get_one::<String>("data").map(PathBuf::from);
        let hosts = resolve_hosts(ctx, matches).await?;

        if hosts.len() > 1 {
            let fleet = ctx.fleet.clone();
            dispatch::run_parallel(&hosts, move |host| {
                let fleet = fleet.clone();
                let script = script.clone();
                let data = data.clone();
                async move {
                    fleet
                        .run_script(&host, &script, data.as_deref(), true, false)
                        .await
                }
            })
            .await?;
        } else {
            ctx.fleet
                .run_script(&hosts[0], &script, data.as_deref(), true, true)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<'a> super::Command<'a> for RunCommand {
    async fn run(&self, ctx: &'a CliContext) -> Result<()> {
        match ctx.matches.subcommand() {
            Some(("command", matches)) => self.subcommand_command(ctx, matches).await,
            Some(("script", matches)) => self.subcommand_script(ctx, matches).await,
            Some((name, _)) => Err(CommandError::InvalidSubcommand(name.to_string()).into()),
            None => Err(CommandError::NoSubcommandProvided.into()),
        }
    }
}
