//! Reverse tunnel to a storage unit
//!
//! The tunnel client is pinned to the host keys the coordinator
//! advertised, never prompts, and forwards the session port on the
//! storage side back to the local transfer daemon. The session descriptor
//! goes down its stdin; the storage unit closes the connection when it is
//! done with us.

use std::io::{self, Write as _};
use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};

use burrow_core::ResolvedConfig;
use burrow_protocol::StorageUnit;

use super::plan::SessionPlan;
use crate::error::SessionError;

const DEFAULT_SSH_PORT: u16 = 22;

/// How a tunnel wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelEnd {
    /// The tunnel client exited on its own
    Closed,
    /// The operator interrupted the wait
    Interrupted,
}

/// Known-hosts lines pinning `storage`'s advertised keys
pub fn known_hosts(storage: &StorageUnit) -> String {
    let host = if storage.ssh_ping_port == DEFAULT_SSH_PORT {
        storage.ssh_ping_host.clone()
    } else {
        format!("[{}]:{}", storage.ssh_ping_host, storage.ssh_ping_port)
    };
    storage
        .ssh_ping_host_keys
        .iter()
        .map(|key| format!("{} {}\n", host, key))
        .collect()
}

/// Tunnel client argv
pub fn ssh_argv(
    config: &ResolvedConfig,
    storage: &StorageUnit,
    port: u16,
    known_hosts_file: &Path,
    private_key_file: &Path,
) -> Vec<String> {
    let mut argv = config.ssh_command.clone();
    argv.extend([
        "-T".to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        format!("UserKnownHostsFile={}", known_hosts_file.display()),
        "-o".to_string(),
        "StrictHostKeyChecking=yes".to_string(),
        "-o".to_string(),
        "CheckHostIP=no".to_string(),
        "-i".to_string(),
        private_key_file.display().to_string(),
        "-R".to_string(),
        format!("{}:{}:{}", port, config.rsyncd_local_address, port),
        "-p".to_string(),
        storage.ssh_ping_port.to_string(),
        "-l".to_string(),
        storage.ssh_ping_user.clone(),
        storage.ssh_ping_host.clone(),
        config.ssh_remote_command.clone(),
    ]);
    argv
}

/// Open the tunnel, hand over the session descriptor and wait for it to close
///
/// A non-zero exit from the tunnel client is logged, not returned: the
/// storage unit decides how a session ends.
pub async fn run(config: &ResolvedConfig, plan: &SessionPlan) -> Result<TunnelEnd, SessionError> {
    if config.ssh_command.is_empty() {
        return Err(SessionError::EmptyCommand("ssh_command"));
    }

    let mut pinned = tempfile::Builder::new()
        .prefix("burrow-known-hosts.")
        .tempfile()?;
    pinned.write_all(known_hosts(&plan.storage).as_bytes())?;
    pinned.flush()?;

    let private_key_file = config
        .ssh_key
        .as_ref()
        .map(|key| key.private_key_file.clone())
        .unwrap_or_else(|| config.ssh_private_key_path());
    let argv = ssh_argv(config, &plan.storage, plan.port, pinned.path(), &private_key_file);
    let (program, args) = argv
        .split_first()
        .ok_or(SessionError::EmptyCommand("ssh_command"))?;
    tracing::debug!("Opening tunnel: {:?}", argv);

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| SessionError::Spawn {
            program: program.clone(),
            source,
        })?;

    let request = plan.request();
    tracing::trace!("Session request: {:?}", request);
    // Held open until the tunnel closes; the far side may read lazily
    let mut stdin = child.stdin.take();
    if let Some(stdin) = stdin.as_mut() {
        match send(stdin, request.to_wire()?.as_bytes()).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                tracing::debug!("Tunnel client closed its input before the request was sent");
            }
            Err(e) => return Err(e.into()),
        }
    }

    let end = tokio::select! {
        status = child.wait() => {
            match status? {
                status if status.success() => tracing::debug!("Tunnel closed"),
                status => tracing::warn!("Tunnel client exited with {}", status),
            }
            TunnelEnd::Closed
        }
        Ok(()) = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, closing tunnel to {}", plan.storage.name);
            if let Err(e) = child.kill().await {
                tracing::debug!("Failed to kill tunnel client: {}", e);
            }
            TunnelEnd::Interrupted
        }
    };

    drop(stdin);
    drop(pinned);
    Ok(end)
}

async fn send(stdin: &mut ChildStdin, bytes: &[u8]) -> io::Result<()> {
    stdin.write_all(bytes).await?;
    stdin.flush().await
}
