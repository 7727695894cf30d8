//! Checkin and restore runs

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use burrow_agent::session::RunOutcome;
use burrow_agent::{gonogo, ApiClient, Mode, Orchestrator, PingOptions, ProcessSessionRunner};
use burrow_core::config;

/// Options for `burrow ping`
#[derive(Debug, Clone, Default)]
pub struct PingArgs {
    pub wait: Option<Duration>,
    pub restore: bool,
    pub restore_storage: Option<String>,
    pub gonogo_program: Option<String>,
    pub debug: bool,
}

/// Check in (or restore) once
pub async fn ping_command(config_dir: &Path, args: PingArgs) -> Result<()> {
    let config = config::resolve(config_dir)
        .with_context(|| format!("Failed to load configuration from {:?}", config_dir))?;

    let gonogo = gonogo::resolve(args.gonogo_program.as_deref(), &config.gonogo_program)?;
    let mode = if args.restore {
        Mode::Restore {
            storage: args.restore_storage,
        }
    } else {
        Mode::Checkin
    };

    // The URL is checked by the run itself; an unprovisioned agent exits quietly
    let client = ApiClient::new(config.api_url.clone().unwrap_or_default(), config.api_timeout)?;
    let runner = ProcessSessionRunner::new(config.clone());
    let orchestrator = Orchestrator::new(config, client, runner);

    let options = PingOptions {
        mode,
        wait: args.wait,
        gonogo,
        verbose: args.debug,
    };
    match orchestrator.run(&options).await? {
        RunOutcome::Skipped(reason) => tracing::debug!("Nothing done: {:?}", reason),
        RunOutcome::Completed { sessions } => {
            tracing::debug!("Completed {} session(s)", sessions)
        }
    }
    Ok(())
}
