//! Identity provisioning
//!
//! [`fill`] generates whatever identity material is missing and persists
//! it in the var tier. Every step is gated on an existence check, so
//! calling it repeatedly only ever fills gaps; nothing already on record
//! is regenerated.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde_json::{json, Map};

use super::{ResolvedConfig, SshKeyPair};
use crate::atomic::write_json;
use crate::credentials::{generate_id, generate_secret};
use crate::error::ConfigError;

/// Comment embedded in generated public keys
pub const KEY_COMMENT: &str = "burrow-agent";

/// Var-tier fragment holding the machine identity
const MACHINE_FRAGMENT: &str = "10-machine_uuid.json";

/// Var-tier fragment that once held persisted restore credentials
const LEGACY_RESTORE_FRAGMENT: &str = "10-restore.json";

const SECRET_MODE: u32 = 0o600;

/// A side effect performed by [`fill`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionAction {
    CreatedDirectory(PathBuf),
    MachineIdentity(PathBuf),
    SshKeyPair(PathBuf),
    SourceCredentials { source: String, path: PathBuf },
    RemovedLegacy(PathBuf),
}

/// Result of [`fill`]: the completed config and what was written
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub config: ResolvedConfig,
    pub actions: Vec<ProvisionAction>,
}

/// Fill gaps in `config`'s identity material and persist them
pub fn fill(mut config: ResolvedConfig) -> Result<Provisioned, ConfigError> {
    let mut actions = Vec::new();

    for dir in [
        config.config_d(),
        config.sources_d(),
        config.var_config_d(),
        config.var_sources_d(),
    ] {
        if !dir.is_dir() {
            fs::create_dir_all(&dir).map_err(|e| ConfigError::io(&dir, e))?;
            actions.push(ProvisionAction::CreatedDirectory(dir));
        }
    }

    if config.machine_uuid.is_none() || config.machine_secret.is_none() {
        let uuid = config.machine_uuid.get_or_insert_with(generate_id).clone();
        let secret = config
            .machine_secret
            .get_or_insert_with(generate_secret)
            .clone();
        let path = config.var_config_d().join(MACHINE_FRAGMENT);
        write_json(
            &path,
            &json!({"machine_uuid": uuid, "machine_secret": secret}),
            Some(SECRET_MODE),
        )
        .map_err(|e| ConfigError::io(&path, e))?;
        tracing::info!("Generated machine identity {}", uuid);
        actions.push(ProvisionAction::MachineIdentity(path));
    }

    if !config.restore_path.is_dir() {
        create_private_dir(&config.restore_path)
            .map_err(|e| ConfigError::io(&config.restore_path, e))?;
        actions.push(ProvisionAction::CreatedDirectory(config.restore_path.clone()));
    }

    // Restore credentials are generated per session now
    let legacy = config.var_config_d().join(LEGACY_RESTORE_FRAGMENT);
    if legacy.exists() {
        fs::remove_file(&legacy).map_err(|e| ConfigError::io(&legacy, e))?;
        actions.push(ProvisionAction::RemovedLegacy(legacy));
    }

    if config.ssh_key.is_none() {
        let pair = generate_key_pair(&config)?;
        actions.push(ProvisionAction::SshKeyPair(pair.private_key_file.clone()));
        config.ssh_key = Some(pair);
    }

    let var_sources_d = config.var_sources_d();
    for (name, source) in config.sources.iter_mut() {
        if source.username.is_some() && source.password.is_some() {
            continue;
        }
        let username = source.username.get_or_insert_with(generate_id).clone();
        let password = source.password.get_or_insert_with(generate_secret).clone();

        let path = var_sources_d.join(format!("10-{}.json", file_stem(name)));
        let mut fragment = Map::new();
        fragment.insert(
            name.clone(),
            json!({"username": username, "password": password}),
        );
        write_json(&path, &fragment, Some(SECRET_MODE)).map_err(|e| ConfigError::io(&path, e))?;
        tracing::info!("Generated credentials for source {}", name);
        actions.push(ProvisionAction::SourceCredentials {
            source: name.clone(),
            path,
        });
    }

    Ok(Provisioned { config, actions })
}

/// Run the key generator for `<var_dir>/ssh_key`
fn generate_key_pair(config: &ResolvedConfig) -> Result<SshKeyPair, ConfigError> {
    let private_key = config.ssh_private_key_path();
    if private_key.exists() {
        return Err(ConfigError::Provision(format!(
            "{} exists without its public key; refusing to regenerate",
            private_key.display()
        )));
    }

    let (program, prefix) = config
        .ssh_keygen_command
        .split_first()
        .ok_or_else(|| ConfigError::Invalid("ssh_keygen_command is empty".to_string()))?;

    tracing::info!("Generating {} key pair at {:?}", config.ssh_key_type, private_key);
    let status = Command::new(program)
        .args(prefix)
        .args(["-q", "-t", &config.ssh_key_type, "-N", "", "-C", KEY_COMMENT, "-f"])
        .arg(&private_key)
        .stdin(Stdio::null())
        .status()
        .map_err(|e| ConfigError::Provision(format!("failed to run {}: {}", program, e)))?;
    if !status.success() {
        return Err(ConfigError::Provision(format!(
            "{} exited with {}",
            program, status
        )));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&private_key, fs::Permissions::from_mode(SECRET_MODE))
            .map_err(|e| ConfigError::io(&private_key, e))?;
    }

    SshKeyPair::load(&config.var_dir)?.ok_or_else(|| {
        ConfigError::Provision(format!("{} produced no public key", program))
    })
}

/// Create a directory (and parents) readable only by the owner
fn create_private_dir(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}

/// Source name made safe for use in a file name
///
/// Bytes outside `[A-Za-z0-9._-]` are percent-encoded, so distinct names
/// never share a file.
fn file_stem(name: &str) -> String {
    let mut stem = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{:02X}", byte));
        }
    }
    stem
}
