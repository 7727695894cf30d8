//! Standalone transfer daemon

use std::path::Path;

use anyhow::{Context, Result};

use burrow_agent::launcher;
use burrow_core::config;

/// Replace this process with the transfer daemon
pub fn rsyncd_command(config_dir: &Path, detach: bool, passthrough: &[String]) -> Result<()> {
    let config = config::resolve(config_dir)
        .with_context(|| format!("Failed to load configuration from {:?}", config_dir))?;

    let argv = launcher::launcher_argv(&config, detach, passthrough);
    let err = launcher::exec(&argv);
    Err(err).with_context(|| format!("Failed to execute {:?}", argv))
}
