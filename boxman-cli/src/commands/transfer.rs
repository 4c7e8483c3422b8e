//! `upload` / `download`: scp passthroughs, fanned out when more than one
//! host is targeted. Multi-host downloads get the host name spliced into the
//! local destination so results do not collide.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;

use boxman::dispatch;
use boxman::report::JobOutcome;

use super::{required, resolve_hosts, CliContext, CommandError};

pub struct TransferCommand {
    verb: String,
}

impl TransferCommand {
    pub fn for_verb<S: Into<String>>(verb: S) -> Self {
        Self { verb: verb.into() }
    }
}

#[async_trait]
impl<'a> super::Command<'a> for TransferCommand {
    async fn run(&self, ctx: &'a CliContext) -> Result<()> {
        let matches = ctx.matches;
        let source = required(matches, "from")?.clone();
        let dest = required(matches, "to")?.clone();
        let recursive = matches.get_flag("recursive");
        let hosts = resolve_hosts(ctx, matches).await?;

        let download = match self.verb.as_str() {
            "download" => true,
            "upload" => false,
            verb => return Err(CommandError::InvalidSubcommand(verb.to_string()).into()),
        };

        if hosts.len() > 1 {
            let fleet = ctx.fleet.clone();
            dispatch::run_parallel(&hosts, move |host| {
                let fleet = fleet.clone();
                let source = source.clone();
                let dest = dest.clone();
                async move {
                    if download {
                        fleet
                            .download(&host, &source, &PathBuf::from(dest), true, recursive)
                            .await?;
                    } else {
                        fleet.upload(&host, &source, &dest, recursive).await?;
                    }
                    Ok(JobOutcome::Done)
                }
            })
            .await?;
        } else if download {
            ctx.fleet
                .download(&hosts[0], &source, &PathBuf::from(dest), false, recursive)
                .await?;
        } else {
            ctx.fleet.upload(&hosts[0], &source, &dest, recursive).await?;
        }
        Ok(())
    }
}
