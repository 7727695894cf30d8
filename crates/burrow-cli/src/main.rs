//! burrow CLI
//!
//! Entry points for the backup agent:
//! - `ping`: check in with the coordinator and serve scheduled transfers
//! - `update-config`: provision identity material and publish it
//! - `rsyncd`: run the transfer daemon standalone

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burrow::commands::{self, PingArgs};
use burrow_agent::publish::AuthOverride;
use burrow_core::config::DEFAULT_CONFIG_DIR;

#[derive(Parser)]
#[command(name = "burrow")]
#[command(author, version, about = "Client-side backup agent")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration directory
    #[arg(
        short = 'c',
        long,
        global = true,
        env = "BURROW_CONFIG_DIR",
        default_value = DEFAULT_CONFIG_DIR
    )]
    config_dir: PathBuf,

    /// Debug logging; failures are returned with full context
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check in with the coordinator and serve scheduled backups
    Ping {
        /// Wait a random number of seconds, up to this value, before starting
        #[arg(short, long, value_parser = parse_wait)]
        wait: Option<Duration>,

        /// Expose the restore directory to a storage unit instead
        #[arg(long)]
        restore: bool,

        /// Storage unit to restore from, when sources live on several
        #[arg(long, requires = "restore")]
        restore_storage: Option<String>,

        /// Program deciding whether to check in (overrides gonogo_program)
        #[arg(long)]
        gonogo_program: Option<String>,
    },

    /// Provision identity material and publish the configuration
    UpdateConfig {
        /// Wait a random number of seconds, up to this value, before starting
        #[arg(short, long, value_parser = parse_wait)]
        wait: Option<Duration>,

        /// Registration credential name (overrides api_auth_name)
        #[arg(long, requires = "api_auth_secret")]
        api_auth_name: Option<String>,

        /// Registration credential secret (overrides api_auth_secret)
        #[arg(long, requires = "api_auth_name")]
        api_auth_secret: Option<String>,
    },

    /// Run the transfer daemon against var_dir/rsyncd.conf
    Rsyncd {
        /// Let the daemon detach from the terminal
        #[arg(long)]
        detach: bool,

        /// Arguments passed through to the daemon
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn parse_wait(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("{:?} is not a number of seconds", value))?;
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let debug = cli.debug;
    match run(cli).await {
        Ok(()) => Ok(()),
        Err(e) if debug => Err(e),
        Err(e) => {
            tracing::error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ping {
            wait,
            restore,
            restore_storage,
            gonogo_program,
        } => {
            let args = PingArgs {
                wait,
                restore,
                restore_storage,
                gonogo_program,
                debug: cli.debug,
            };
            commands::ping_command(&cli.config_dir, args).await
        }
        Commands::UpdateConfig {
            wait,
            api_auth_name,
            api_auth_secret,
        } => {
            let auth = match (api_auth_name, api_auth_secret) {
                (Some(name), Some(secret)) => Some(AuthOverride { name, secret }),
                _ => None,
            };
            commands::update_config_command(&cli.config_dir, wait, auth).await
        }
        Commands::Rsyncd { detach, args } => {
            commands::rsyncd_command(&cli.config_dir, detach, &args)
        }
    }
}
