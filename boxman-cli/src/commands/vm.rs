//! Lifecycle verbs: thin passthroughs to the manager binary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{required, requested_hosts, CliContext, CommandError};

pub struct VmCommand {
    verb: String,
}

impl VmCommand {
    pub fn for_verb<S: Into<String>>(verb: S) -> Self {
        Self { verb: verb.into() }
    }

    async fn subcommand_create(&self, ctx: &CliContext<'_>) -> Result<()> {
        let matches = ctx.matches;
        let hosts = requested_hosts(matches)
            .filter(|hosts| !hosts.is_empty())
            .ok_or_else(|| CommandError::RequiredArgumentMissing("vms".into()))?;
        let image = required(matches, "image")?;

        let template = match matches.get_one::<String>("template") {
            Some(path) => Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("reading template file {} failed", path))?,
            ),
            None => None,
        };
        let output = matches.get_one::<String>("output").map(PathBuf::from);

        ctx.fleet
            .create(&hosts, image, output.as_deref(), template.as_deref())?;
        Ok(())
    }

    async fn lifecycle(&self, ctx: &CliContext<'_>, name: Option<&str>) -> Result<()> {
        match self.verb.as_str() {
            "start" | "resume" => ctx.fleet.start(name).await,
            "stop" => ctx.fleet.stop(name).await,
            "suspend" => ctx.fleet.suspend(name).await,
            "destroy" => ctx.fleet.destroy(name, ctx.matches.get_flag("force")).await,
            "ls" => ctx.fleet.status(name).await,
            verb => Err(CommandError::InvalidSubcommand(verb.to_string()).into()),
        }
    }
}

#[async_trait]
impl<'a> super::Command<'a> for VmCommand {
    async fn run(&self, ctx: &'a CliContext) -> Result<()> {
        match self.verb.as_str() {
            "create" => self.subcommand_create(ctx).await,
            "info" => ctx.fleet.status(Some(required(ctx.matches, "name")?)).await,
            "ssh" => ctx.fleet.ssh(required(ctx.matches, "name")?).await,
            _ => {
                // No --vms targets every host in one manager call; an
                // explicit list gets one sequential call per host.
                match requested_hosts(ctx.matches).filter(|hosts| !hosts.is_empty()) {
                    None => self.lifecycle(ctx, None).await,
                    Some(hosts) => {
                        for host in hosts {
                            self.lifecycle(ctx, Some(&host)).await?;
                        }
                        Ok(())
                    }
                }
            }
        }
    }
}
