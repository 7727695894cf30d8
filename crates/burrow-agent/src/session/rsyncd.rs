//! Per-session transfer daemon
//!
//! Each session gets its own daemon configuration in a private temporary
//! directory. The daemon runs attached to this process for exactly the
//! duration of the session.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tempfile::TempDir;
use tokio::process::{Child, Command};

use burrow_core::atomic::write_atomic;
use burrow_core::ResolvedConfig;

use super::plan::SessionPlan;
use crate::error::SessionError;

pub const CONFIG_FILE: &str = "rsyncd.conf";
pub const SECRETS_FILE: &str = "rsyncd.secrets";

const SECRET_MODE: u32 = 0o600;

/// Whether `name` can be written as a `[module]` header
///
/// Brackets, slashes and control characters would end or split the
/// header, and surrounding whitespace is trimmed by the daemon.
pub fn is_valid_module_name(name: &str) -> bool {
    !name.is_empty()
        && name.trim() == name
        && !name
            .chars()
            .any(|c| c.is_control() || matches!(c, '[' | ']' | '/'))
}

/// Whether `path` can be written as a single-line `path =` value
pub fn is_valid_module_path(path: &Path) -> bool {
    path.to_str()
        .is_some_and(|p| !p.is_empty() && !p.chars().any(char::is_control))
}

/// Render the daemon configuration for `plan`
pub fn render_config(config: &ResolvedConfig, plan: &SessionPlan, secrets_file: &Path) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "address = {}", config.rsyncd_local_address);
    let _ = writeln!(out, "port = {}", plan.port);
    let _ = writeln!(out, "log file = /dev/stdout");
    let _ = writeln!(out, "uid = {}", config.rsyncd_user);
    let _ = writeln!(out, "gid = {}", config.rsyncd_group);
    let _ = writeln!(out, "list = false");
    out.push('\n');

    if let Some(restore) = &plan.restore {
        push_module(
            &mut out,
            &restore.module,
            &restore.path,
            &restore.credentials.username,
            secrets_file,
            false,
        );
    }
    for (name, source) in &plan.sources {
        push_module(
            &mut out,
            name,
            &source.path,
            &source.credentials.username,
            secrets_file,
            true,
        );
    }
    out
}

fn push_module(
    out: &mut String,
    name: &str,
    path: &Path,
    user: &str,
    secrets_file: &Path,
    read_only: bool,
) {
    let _ = writeln!(out, "[{}]", name);
    let _ = writeln!(out, "    path = {}", path.display());
    let _ = writeln!(out, "    auth users = {}", user);
    let _ = writeln!(out, "    secrets file = {}", secrets_file.display());
    let _ = writeln!(out, "    read only = {}", read_only);
    out.push('\n');
}

/// Render `user:password` lines, restore module first
pub fn render_secrets(plan: &SessionPlan) -> String {
    let restore = plan.restore.iter().map(|r| &r.credentials);
    let sources = plan.sources.values().map(|s| &s.credentials);
    restore
        .chain(sources)
        .map(|c| format!("{}:{}\n", c.username, c.password))
        .collect()
}

/// Daemon argv for a rendered config file
pub fn daemon_argv(config: &ResolvedConfig, config_file: &Path) -> Vec<String> {
    let mut argv = config.rsyncd_command.clone();
    argv.push("--no-detach".to_string());
    argv.push("--daemon".to_string());
    argv.push(format!("--config={}", config_file.display()));
    argv
}

/// A running transfer daemon and its private configuration
pub struct TransferDaemon {
    child: Child,
    workdir: TempDir,
}

impl TransferDaemon {
    /// Write the session's configuration and start the daemon
    pub fn start(config: &ResolvedConfig, plan: &SessionPlan) -> Result<Self, SessionError> {
        if config.rsyncd_command.is_empty() {
            return Err(SessionError::EmptyCommand("rsyncd_command"));
        }
        let workdir = tempfile::Builder::new().prefix("burrow-rsyncd.").tempdir()?;
        let config_file = workdir.path().join(CONFIG_FILE);
        let secrets_file = workdir.path().join(SECRETS_FILE);

        write_atomic(&secrets_file, render_secrets(plan).as_bytes(), Some(SECRET_MODE))?;
        write_atomic(
            &config_file,
            render_config(config, plan, &secrets_file).as_bytes(),
            Some(SECRET_MODE),
        )?;

        let argv = daemon_argv(config, &config_file);
        let (program, args) = argv
            .split_first()
            .ok_or(SessionError::EmptyCommand("rsyncd_command"))?;
        tracing::debug!("Starting transfer daemon: {:?}", argv);

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SessionError::Spawn {
                program: program.clone(),
                source,
            })?;

        Ok(Self { child, workdir })
    }

    /// Directory holding the rendered config and secrets
    pub fn workdir(&self) -> PathBuf {
        self.workdir.path().to_path_buf()
    }

    /// Ask the daemon to exit and wait for it
    pub async fn stop(mut self) {
        terminate(&mut self.child);
        match self.child.wait().await {
            Ok(status) => tracing::debug!("Transfer daemon exited with {}", status),
            Err(e) => tracing::warn!("Failed to wait for transfer daemon: {}", e),
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    // SAFETY: pid belongs to a child we have not yet reaped
    let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if result != 0 {
        tracing::debug!(
            "SIGTERM to transfer daemon failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::debug!("Failed to kill transfer daemon: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::plan::{PlannedSource, RestoreTarget};
    use burrow_protocol::{Credentials, SessionAction, StorageUnit};
    use std::collections::BTreeMap;

    fn creds(user: &str, pass: &str) -> Credentials {
        Credentials {
            username: user.to_string(),
            password: pass.to_string(),
        }
    }

    fn plan(restore: bool) -> SessionPlan {
        let mut sources = BTreeMap::new();
        let mut target = None;
        if restore {
            target = Some(RestoreTarget {
                module: "burrow-restore".to_string(),
                path: PathBuf::from("/var/backups/restore"),
                credentials: creds("ru", "rp"),
            });
        } else {
            sources.insert(
                "etc".to_string(),
                PlannedSource {
                    path: PathBuf::from("/etc"),
                    credentials: creds("u1", "p1"),
                },
            );
            sources.insert(
                "home".to_string(),
                PlannedSource {
                    path: PathBuf::from("/home"),
                    credentials: creds("u2", "p2"),
                },
            );
        }
        SessionPlan {
            action: if restore {
                SessionAction::Restore
            } else {
                SessionAction::Checkin
            },
            storage: StorageUnit {
                name: "unit1".to_string(),
                ssh_ping_host: "unit1.example".to_string(),
                ssh_ping_host_keys: Vec::new(),
                ssh_ping_port: 22,
                ssh_ping_user: "burrow".to_string(),
            },
            port: 50000,
            sources,
            restore: target,
            verbose: false,
        }
    }

    #[test]
    fn test_checkin_config() {
        let config = ResolvedConfig::default();
        let text = render_config(&config, &plan(false), Path::new("/tmp/x/rsyncd.secrets"));

        let expected = "\
address = 127.0.0.1
port = 50000
log file = /dev/stdout
uid = root
gid = *
list = false

[etc]
    path = /etc
    auth users = u1
    secrets file = /tmp/x/rsyncd.secrets
    read only = true

[home]
    path = /home
    auth users = u2
    secrets file = /tmp/x/rsyncd.secrets
    read only = true

";
        assert_eq!(text, expected);
        assert_eq!(render_secrets(&plan(false)), "u1:p1\nu2:p2\n");
    }

    #[test]
    fn test_restore_module_writable() {
        let mut config = ResolvedConfig::default();
        config.rsyncd_user = "backup".to_string();
        let text = render_config(&config, &plan(true), Path::new("/s"));

        assert!(text.contains("uid = backup\n"));
        assert!(text.contains("[burrow-restore]\n    path = /var/backups/restore\n"));
        assert!(text.contains("    read only = false\n"));
        assert!(!text.contains("read only = true"));
        assert_eq!(render_secrets(&plan(true)), "ru:rp\n");
    }

    #[test]
    fn test_daemon_argv() {
        let mut config = ResolvedConfig::default();
        config.rsyncd_command = vec!["/usr/bin/rsync".to_string(), "-v".to_string()];
        assert_eq!(
            daemon_argv(&config, Path::new("/tmp/d/rsyncd.conf")),
            vec![
                "/usr/bin/rsync",
                "-v",
                "--no-detach",
                "--daemon",
                "--config=/tmp/d/rsyncd.conf"
            ]
        );
    }

    #[test]
    fn test_module_name_validation() {
        assert!(is_valid_module_name("home"));
        assert!(is_valid_module_name("my source"));
        assert!(!is_valid_module_name(""));
        assert!(!is_valid_module_name("evil]\n[root"));
        assert!(!is_valid_module_name("a]b"));
        assert!(!is_valid_module_name("line\nbreak"));
        assert!(!is_valid_module_name(" padded"));
        assert!(!is_valid_module_name("a/b"));
    }

    #[test]
    fn test_module_path_validation() {
        assert!(is_valid_module_path(Path::new("/srv/data dir")));
        assert!(!is_valid_module_path(Path::new("/srv/a\nread only = false")));
        assert!(!is_valid_module_path(Path::new("")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_writes_private_files_and_stops() {
        use std::os::unix::fs::PermissionsExt;

        let mut config = ResolvedConfig::default();
        // Stand-in daemon that ignores its flags and runs until signalled
        config.rsyncd_command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "exec sleep 30".to_string(),
            "daemon".to_string(),
        ];

        let daemon = TransferDaemon::start(&config, &plan(false)).unwrap();
        let workdir = daemon.workdir();
        for name in [CONFIG_FILE, SECRETS_FILE] {
            let mode = std::fs::metadata(workdir.join(name)).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "{}", name);
        }
        assert_eq!(
            std::fs::read_to_string(workdir.join(SECRETS_FILE)).unwrap(),
            "u1:p1\nu2:p2\n"
        );

        daemon.stop().await;
        assert!(!workdir.exists());
    }

    #[test]
    fn test_empty_command_rejected() {
        let mut config = ResolvedConfig::default();
        config.rsyncd_command = Vec::new();
        assert!(matches!(
            TransferDaemon::start(&config, &plan(false)),
            Err(SessionError::EmptyCommand("rsyncd_command"))
        ));
    }
}
