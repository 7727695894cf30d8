//! Go/no-go gate
//!
//! An optional external program decides whether a checkin may proceed.
//! Exit status zero means go; anything else, including failure to start,
//! means the run ends quietly.

use tokio::process::Command;

use burrow_core::config::GoNoGo;
use burrow_core::ConfigError;

/// Gate argv, a command-line value taking precedence over configuration
///
/// A command-line value is always shell-split.
pub fn resolve(cli: Option<&str>, configured: &GoNoGo) -> Result<Vec<String>, ConfigError> {
    match cli {
        Some(raw) if !raw.trim().is_empty() => GoNoGo::Shell(raw.to_string()).argv(),
        _ => configured.argv(),
    }
}

/// Run the gate; an empty argv always allows
pub async fn allows(argv: &[String]) -> bool {
    let Some((program, args)) = argv.split_first() else {
        return true;
    };

    tracing::debug!("Running go/no-go program: {:?}", argv);
    match Command::new(program).args(args).status().await {
        Ok(status) if status.success() => true,
        Ok(status) => {
            tracing::debug!("Go/no-go program exited with {}, skipping this run", status);
            false
        }
        Err(e) => {
            tracing::debug!("Go/no-go program {:?} could not run: {}", program, e);
            false
        }
    }
}
