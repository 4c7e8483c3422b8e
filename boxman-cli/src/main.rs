#![forbid(unsafe_code)]

use anyhow::Result;
use clap::{command, Arg, ArgAction};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::util::SubscriberInitExt;

use crate::commands::Command;

mod commands;

use boxman::log::*;

#[tokio::main]
async fn main() -> Result<()> {
    boxman::log::install_color_eyre().map_err(|err| anyhow::anyhow!("{err}"))?;

    // Command configuration
    let matches = command!()
        .name("boxman")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Turn debugging information on. Overrides -q. Can specify up to -vv.")
                .action(ArgAction::Count)
                .global(true),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Silence all output. Overridden by -v.")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .help("Log every manager invocation and the workspace it runs in.")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            command!("create")
                .about("Generate the Vagrantfile for a set of VMs.")
                .arg(vms_arg().required(true))
                .arg(
                    Arg::new("image")
                        .help("Base box identifier.")
                        .long("image")
                        .default_value(boxman::fleet::DEFAULT_IMAGE),
                )
                .arg(
                    Arg::new("template")
                        .help("Path to a Vagrantfile template with {array}/{image} substitution points.")
                        .long("template"),
                )
                .arg(
                    Arg::new("output")
                        .help("Where to write the Vagrantfile. Defaults to the workspace.")
                        .long("output"),
                ),
        )
        .subcommand(lifecycle_command("start", "Bring VMs up."))
        .subcommand(lifecycle_command("resume", "Resume suspended VMs."))
        .subcommand(lifecycle_command("stop", "Halt VMs."))
        .subcommand(lifecycle_command("suspend", "Suspend VMs."))
        .subcommand(
            lifecycle_command("destroy", "Destroy VMs.").arg(
                Arg::new("force")
                    .help("Don't ask the manager for confirmation.")
                    .short('f')
                    .long("force")
                    .action(ArgAction::SetTrue),
            ),
        )
        .subcommand(lifecycle_command("ls", "Show the status of VMs."))
        .subcommand(
            command!("info")
                .about("Show the status of one VM.")
                .arg(Arg::new("name").help("Name of the VM.").required(true)),
        )
        .subcommand(
            command!("ssh")
                .about("Open an interactive shell on one VM.")
                .arg(Arg::new("name").help("Name of the VM.").required(true)),
        )
        .subcommand(
            command!("upload")
                .about("Copy a local file or directory onto VMs.")
                .arg(from_arg())
                .arg(to_arg())
                .arg(recursive_arg())
                .arg(vms_arg()),
        )
        .subcommand(
            command!("download")
                .about("Copy a remote file or directory from VMs.")
                .arg(from_arg())
                .arg(to_arg())
                .arg(recursive_arg())
                .arg(vms_arg()),
        )
        .subcommand(
            command!("run")
                .about("Run work across VMs and collect per-host reports.")
                .subcommand(
                    command!("command")
                        .about("Run a shell command.")
                        .arg(
                            Arg::new("command")
                                .help("The command to run on each VM.")
                                .required(true),
                        )
                        .arg(vms_arg()),
                )
                .subcommand(
                    command!("script")
                        .about("Ship a script to each VM, run it, and fetch its output.")
                        .arg(
                            Arg::new("script")
                                .help("Local path of the script.")
                                .required(true),
                        )
                        .arg(
                            Arg::new("data")
                                .help("Local file or directory shipped alongside the script as `data`.")
                                .long("data"),
                        )
                        .arg(vms_arg()),
                ),
        )
        .subcommand_required(true)
        .get_matches();

    // Set up logging
    let logging_config = tracing_subscriber::fmt::SubscriberBuilder::default()
        .with_timer(tracing_subscriber::fmt::time::UtcTime::new(
            time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        ))
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::NONE)
        .compact();

    let quiet = matches.get_flag("quiet");
    let verbose = matches.get_count("verbose") as usize;
    let debug = matches.get_flag("debug");
    let logging_config = if quiet && verbose == 0 {
        logging_config.with_max_level(LevelFilter::ERROR)
    } else if verbose > 0 {
        let level = match verbose {
            1 => LevelFilter::WARN,
            2 => LevelFilter::INFO,
            3 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        };
        logging_config.with_max_level(level)
    } else if debug {
        logging_config.with_max_level(LevelFilter::DEBUG)
    } else {
        logging_config.with_max_level(LevelFilter::ERROR)
    };

    let subscriber = logging_config.finish();
    subscriber.init();

    // Run the commands
    if let Some((subcommand, sub_matches)) = matches.subcommand() {
        let fleet = boxman::fleet::Fleet::new(debug)?;
        let ctx = commands::CliContext::new(fleet, sub_matches);
        debug!(
            "matched subcommand {} with matches: {:?}",
            &subcommand,
            &sub_matches.ids().map(|id| id.as_str()).collect::<Vec<_>>()
        );
        match subcommand {
            "create" | "start" | "resume" | "stop" | "suspend" | "destroy" | "ls" | "info"
            | "ssh" => {
                commands::vm::VmCommand::for_verb(subcommand)
                    .run(&ctx)
                    .await?
            }
            "upload" | "download" => {
                commands::transfer::TransferCommand::for_verb(subcommand)
                    .run(&ctx)
                    .await?
            }
            "run" => commands::run::RunCommand::new().run(&ctx).await?,
            _ => return Err(anyhow::anyhow!("Unrecognized subcommand: {}", subcommand)),
        }
    }
    Ok(())
}

fn vms_arg() -> Arg {
    Arg::new("vms")
        .help("Comma-separated list of VM names, e.g. node1,node2.")
        .long("vms")
}

fn from_arg() -> Arg {
    Arg::new("from")
        .help("Source path.")
        .long("from")
        .required(true)
}

fn to_arg() -> Arg {
    Arg::new("to")
        .help("Destination path.")
        .long("to")
        .required(true)
}

fn recursive_arg() -> Arg {
    Arg::new("recursive")
        .help("Copy directories recursively.")
        .short('r')
        .action(ArgAction::SetTrue)
}

fn lifecycle_command(name: &'static str, about: &'static str) -> clap::Command {
    clap::Command::new(name).about(about).arg(vms_arg())
}
