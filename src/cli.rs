use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};

use crate::config::{self, Settings};
use crate::daemon::protocol::{StartResult, StopResult, METHOD_LIST, METHOD_START, METHOD_STOP};
use crate::daemon::{Daemon, DaemonClient};
use crate::device::{DeviceIntrospector, ProcSocketTable, ShellDeviceServices};
use crate::Result;

#[derive(Parser)]
#[command(name = "devbridge")]
#[command(version)]
#[command(about = "Device introspection and adbd supervision", long_about = None)]
pub struct Cli {
    /// Settings file layered over ~/.devbridge/settings.json
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Query live device state
    Common(CommonArgs),

    /// Run the control daemon in the foreground
    Daemon,

    /// Manage adbd instances through the control daemon
    Adbd {
        #[command(subcommand)]
        command: AdbdCommands,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct CommonArgs {
    /// Package of the foreground activity
    #[arg(long)]
    pub top_package: bool,

    /// Class name of the foreground activity
    #[arg(long)]
    pub top_activity: bool,

    /// Installed package archive matching PATH
    #[arg(long, value_name = "PATH")]
    pub apk_file: Option<String>,

    /// Unix-domain sockets as JSON
    #[arg(long)]
    pub unix_sock: bool,

    /// Intent-filter path patterns declared by PACKAGE, as JSON
    #[arg(long, value_name = "PACKAGE")]
    pub path_patterns: Option<String>,
}

#[derive(Subcommand)]
pub enum AdbdCommands {
    /// Start adbd on every port in START..=END
    Start {
        /// First port (malformed input uses the configured default)
        start: Option<String>,
        /// Last port (malformed input uses the configured default)
        end: Option<String>,
    },
    /// Stop every running adbd
    Stop,
    /// List running adbd instances
    List,
}

pub async fn run(cli: Cli) -> Result<()> {
    let settings = config::resolve(cli.config.as_deref());
    match cli.command {
        Commands::Common(args) => run_common(&settings, args),
        Commands::Daemon => Daemon::run(settings).await,
        Commands::Adbd { command } => run_adbd(cli.config.as_deref(), command).await,
    }
}

fn run_common(settings: &Settings, args: CommonArgs) -> Result<()> {
    let introspector = DeviceIntrospector::new(
        Arc::new(ShellDeviceServices::new(settings.device_command_timeout())),
        Arc::new(ProcSocketTable::default()),
    );

    if args.top_package {
        print_optional(introspector.top_package()?);
    } else if args.top_activity {
        print_optional(introspector.top_activity()?);
    } else if let Some(path) = args.apk_file {
        print_optional(introspector.resolve_package_file(&path)?);
    } else if args.unix_sock {
        println!("{}", serde_json::to_string_pretty(&introspector.list_local_sockets()?)?);
    } else if let Some(package) = args.path_patterns {
        println!("{}", serde_json::to_string_pretty(&introspector.path_patterns(&package)?)?);
    }
    Ok(())
}

fn print_optional(value: Option<String>) {
    if let Some(v) = value {
        println!("{}", v);
    }
}

async fn run_adbd(config: Option<&std::path::Path>, command: AdbdCommands) -> Result<()> {
    let mut client = DaemonClient::new(&config::state_dir());
    client.ensure_daemon(config).await?;

    match command {
        AdbdCommands::Start { start, end } => {
            let result: StartResult =
                serde_json::from_value(client.call(METHOD_START, json!({ "start": start, "end": end })).await?)?;
            for port in &result.running {
                println!("start port {}", port);
            }
            for failure in &result.failed {
                eprintln!("{}", failure.message);
            }
        }
        AdbdCommands::Stop => {
            let result: StopResult = serde_json::from_value(client.call(METHOD_STOP, Value::Null).await?)?;
            for failure in &result.failed {
                eprintln!("{}", failure.message);
            }
            println!("stop all adbd");
        }
        AdbdCommands::List => {
            let value = client.call(METHOD_LIST, Value::Null).await?;
            let daemons = value.get("daemons").cloned().unwrap_or(Value::Array(vec![]));
            println!("{}", serde_json::to_string_pretty(&daemons)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_flags_are_mutually_exclusive() {
        assert!(Cli::try_parse_from(["devbridge", "common", "--top-package", "--unix-sock"]).is_err());
        assert!(Cli::try_parse_from(["devbridge", "common"]).is_err());
        assert!(Cli::try_parse_from(["devbridge", "common", "--apk-file", "/a.apk"]).is_ok());
    }

    #[test]
    fn test_adbd_start_ports_are_optional_text() {
        let cli = Cli::try_parse_from(["devbridge", "adbd", "start", "abc"]).unwrap();
        match cli.command {
            Commands::Adbd { command: AdbdCommands::Start { start, end } } => {
                assert_eq!(start.as_deref(), Some("abc"));
                assert!(end.is_none());
            }
            _ => panic!("expected adbd start"),
        }
    }
}
