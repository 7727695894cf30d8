//! Standalone transfer daemon launcher
//!
//! Runs the transfer daemon against `var_dir/rsyncd.conf`, a file managed
//! by the administrator or by configuration management rather than by the
//! per-session machinery.

use std::io;
use std::path::PathBuf;
use std::process::Command;

use burrow_core::ResolvedConfig;

/// Config file the launcher points the daemon at
pub fn config_file(config: &ResolvedConfig) -> PathBuf {
    config.var_dir.join("rsyncd.conf")
}

/// Daemon argv: the configured command, mode flags, config file, then `passthrough`
pub fn launcher_argv(config: &ResolvedConfig, detach: bool, passthrough: &[String]) -> Vec<String> {
    let mut argv = config.rsyncd_command.clone();
    if !detach {
        argv.push("--no-detach".to_string());
    }
    argv.push("--daemon".to_string());
    argv.push(format!("--config={}", config_file(config).display()));
    argv.extend(passthrough.iter().cloned());
    argv
}

/// Replace this process with `argv`
///
/// Only returns on failure.
#[cfg(unix)]
pub fn exec(argv: &[String]) -> io::Error {
    use std::os::unix::process::CommandExt;

    let Some((program, args)) = argv.split_first() else {
        return io::Error::new(io::ErrorKind::InvalidInput, "rsyncd_command is empty");
    };
    tracing::debug!("Executing: {:?}", argv);
    Command::new(program).args(args).exec()
}

/// Run `argv` to completion and exit with its status
#[cfg(not(unix))]
pub fn exec(argv: &[String]) -> io::Error {
    let Some((program, args)) = argv.split_first() else {
        return io::Error::new(io::ErrorKind::InvalidInput, "rsyncd_command is empty");
    };
    tracing::debug!("Executing: {:?}", argv);
    match Command::new(program).args(args).status() {
        Ok(status) => std::process::exit(status.code().unwrap_or(1)),
        Err(e) => e,
    }
}
