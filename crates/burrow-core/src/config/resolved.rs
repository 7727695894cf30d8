//! The resolved agent configuration

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use burrow_protocol::Credentials;

use super::serde_utils::duration_secs;
use super::{DEFAULT_VAR_DIR, SSH_KEY_FILE};
use crate::error::ConfigError;

/// Configuration for one agent invocation
///
/// Built fresh by [`super::resolve`] on every run. Fields marked
/// `serde(skip)` are never read from fragments: they are derived from the
/// filesystem during resolution.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolvedConfig {
    /// Administrator config directory (etc tier)
    #[serde(skip)]
    pub config_dir: PathBuf,

    /// Agent state directory (var tier)
    pub var_dir: PathBuf,

    /// Lock directory; probed when unset
    pub lock_dir: Option<PathBuf>,

    /// Coordination service base URL
    pub api_url: Option<String>,

    /// Timeout for each coordination request
    #[serde(with = "duration_secs")]
    pub api_timeout: Duration,

    /// Registration credential name
    pub api_auth_name: Option<String>,

    /// Registration credential secret
    pub api_auth_secret: Option<String>,

    /// Nameless registration secret from older deployments
    pub api_auth: Option<Value>,

    pub machine_uuid: Option<String>,
    pub machine_secret: Option<String>,

    /// Unit name as configured; see [`ResolvedConfig::unit_name`]
    #[serde(rename = "unit_name")]
    pub configured_unit_name: Option<String>,
    pub environment_name: Option<String>,
    pub service_name: Option<String>,

    /// Opaque marker passed back to the coordinator on publish
    pub published: Option<Value>,

    /// Tunnel client argv prefix
    pub ssh_command: Vec<String>,

    /// Key generator argv prefix
    pub ssh_keygen_command: Vec<String>,

    /// Key type passed to the key generator
    pub ssh_key_type: String,

    /// Command run on the storage unit through the tunnel
    pub ssh_remote_command: String,

    /// Key pair found in `var_dir`
    #[serde(skip)]
    pub ssh_key: Option<SshKeyPair>,

    /// Transfer daemon argv prefix
    pub rsyncd_command: Vec<String>,
    pub rsyncd_local_address: String,
    pub rsyncd_user: String,
    pub rsyncd_group: String,

    /// Pause between starting the transfer daemon and opening the tunnel
    #[serde(with = "duration_secs")]
    pub rsyncd_settle_delay: Duration,

    /// Local destination exposed in restore mode
    pub restore_path: PathBuf,
    pub restore_module: String,

    /// Program gating each checkin
    pub gonogo_program: GoNoGo,

    /// Sources with a `path`, keyed by name
    #[serde(skip)]
    pub sources: BTreeMap<String, SourceConfig>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from(super::DEFAULT_CONFIG_DIR),
            var_dir: PathBuf::from(DEFAULT_VAR_DIR),
            lock_dir: None,
            api_url: None,
            api_timeout: Duration::from_secs(5),
            api_auth_name: None,
            api_auth_secret: None,
            api_auth: None,
            machine_uuid: None,
            machine_secret: None,
            configured_unit_name: None,
            environment_name: None,
            service_name: None,
            published: None,
            ssh_command: vec!["ssh".to_string()],
            ssh_keygen_command: vec!["ssh-keygen".to_string()],
            ssh_key_type: "ed25519".to_string(),
            ssh_remote_command: "burrow-storage-ping".to_string(),
            ssh_key: None,
            rsyncd_command: vec!["rsync".to_string()],
            rsyncd_local_address: "127.0.0.1".to_string(),
            rsyncd_user: "root".to_string(),
            // "*" lets rsyncd pick the user's group
            rsyncd_group: "*".to_string(),
            rsyncd_settle_delay: Duration::from_secs(3),
            restore_path: PathBuf::from("/var/backups/burrow-agent/restore"),
            restore_module: "burrow-restore".to_string(),
            gonogo_program: GoNoGo::None,
            sources: BTreeMap::new(),
        }
    }
}

impl ResolvedConfig {
    /// Unit name, falling back to the host name
    ///
    /// The fallback is recomputed on every run and never written to disk.
    pub fn unit_name(&self) -> String {
        self.configured_unit_name
            .clone()
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned())
    }

    /// Etc-tier `config.d`
    pub fn config_d(&self) -> PathBuf {
        self.config_dir.join(super::CONFIG_D)
    }

    /// Etc-tier `sources.d`
    pub fn sources_d(&self) -> PathBuf {
        self.config_dir.join(super::SOURCES_D)
    }

    /// Var-tier `config.d`
    pub fn var_config_d(&self) -> PathBuf {
        self.var_dir.join(super::CONFIG_D)
    }

    /// Var-tier `sources.d`
    pub fn var_sources_d(&self) -> PathBuf {
        self.var_dir.join(super::SOURCES_D)
    }

    /// Expected private key location
    pub fn ssh_private_key_path(&self) -> PathBuf {
        self.var_dir.join(SSH_KEY_FILE)
    }
}

/// A generated SSH key pair on record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshKeyPair {
    pub private_key_file: PathBuf,
    pub public_key_file: PathBuf,
    /// Public key line, trailing whitespace removed
    pub public_key: String,
}

impl SshKeyPair {
    /// Load the key pair at `<var_dir>/ssh_key{,.pub}` if its public half exists
    pub fn load(var_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let private_key_file = var_dir.join(SSH_KEY_FILE);
        let public_key_file = var_dir.join(format!("{}.pub", SSH_KEY_FILE));
        if !public_key_file.is_file() {
            return Ok(None);
        }

        let public_key = fs::read_to_string(&public_key_file)
            .map_err(|e| ConfigError::io(&public_key_file, e))?
            .trim_end()
            .to_string();

        Ok(Some(Self {
            private_key_file,
            public_key_file,
            public_key,
        }))
    }
}

/// One declared backup source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Local directory exposed to the storage unit
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Remaining keys, forwarded untouched to the coordinator
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SourceConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            username: None,
            password: None,
            extra: Map::new(),
        }
    }

    /// Long-lived credentials, if both halves are configured
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

/// Go/no-go program as written in configuration
///
/// A string is shell-split; an array is used verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Option<GoNoGoValue>")]
pub enum GoNoGo {
    #[default]
    None,
    Command(Vec<String>),
    Shell(String),
}

/// On-disk shape of `gonogo_program`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum GoNoGoValue {
    Shell(String),
    Command(Vec<String>),
}

impl From<Option<GoNoGoValue>> for GoNoGo {
    fn from(value: Option<GoNoGoValue>) -> Self {
        match value {
            None => GoNoGo::None,
            Some(GoNoGoValue::Shell(raw)) => GoNoGo::Shell(raw),
            Some(GoNoGoValue::Command(args)) => GoNoGo::Command(args),
        }
    }
}

impl GoNoGo {
    /// Normalize into an argument vector; empty means no gate
    pub fn argv(&self) -> Result<Vec<String>, ConfigError> {
        match self {
            GoNoGo::None => Ok(Vec::new()),
            GoNoGo::Command(args) => Ok(args.clone()),
            GoNoGo::Shell(raw) => shlex::split(raw).ok_or_else(|| {
                ConfigError::Invalid(format!("gonogo_program has unbalanced quoting: {}", raw))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_fill_unset_keys() {
        let config: ResolvedConfig = serde_json::from_value(json!({
            "api_url": "https://coord.example",
            "rsyncd_user": "backup"
        }))
        .unwrap();

        assert_eq!(config.api_url.as_deref(), Some("https://coord.example"));
        assert_eq!(config.rsyncd_user, "backup");
        assert_eq!(config.rsyncd_group, "*");
        assert_eq!(config.rsyncd_command, vec!["rsync"]);
        assert_eq!(config.ssh_key_type, "ed25519");
        assert_eq!(config.api_timeout, Duration::from_secs(5));
        assert_eq!(config.gonogo_program, GoNoGo::None);
    }

    #[test]
    fn test_unit_name_falls_back_to_hostname() {
        let config = ResolvedConfig::default();
        let host = gethostname::gethostname().to_string_lossy().into_owned();
        assert_eq!(config.unit_name(), host);

        let config: ResolvedConfig = serde_json::from_value(json!({"unit_name": "web-1"})).unwrap();
        assert_eq!(config.unit_name(), "web-1");
    }

    #[test]
    fn test_gonogo_forms() {
        let config: ResolvedConfig =
            serde_json::from_value(json!({"gonogo_program": "check_load -c '1,5,15'"})).unwrap();
        assert_eq!(
            config.gonogo_program.argv().unwrap(),
            vec!["check_load", "-c", "1,5,15"]
        );

        let config: ResolvedConfig =
            serde_json::from_value(json!({"gonogo_program": ["check_load", "-c", "1 5"]})).unwrap();
        assert_eq!(
            config.gonogo_program.argv().unwrap(),
            vec!["check_load", "-c", "1 5"]
        );

        let config: ResolvedConfig =
            serde_json::from_value(json!({"gonogo_program": null})).unwrap();
        assert!(config.gonogo_program.argv().unwrap().is_empty());
    }

    #[test]
    fn test_gonogo_unbalanced_quotes() {
        let gonogo = GoNoGo::Shell("check 'oops".to_string());
        assert!(matches!(gonogo.argv(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_source_keeps_extra_keys() {
        let source: SourceConfig = serde_json::from_value(json!({
            "path": "/data",
            "username": "u",
            "frequency": "daily"
        }))
        .unwrap();

        assert_eq!(source.extra["frequency"], json!("daily"));
        assert!(source.credentials().is_none());
        assert_eq!(
            serde_json::to_value(&source).unwrap(),
            json!({"path": "/data", "username": "u", "frequency": "daily"})
        );
    }

    #[test]
    fn test_key_pair_requires_public_half() {
        let dir = TempDir::new().unwrap();
        assert!(SshKeyPair::load(dir.path()).unwrap().is_none());

        fs::write(dir.path().join("ssh_key"), "PRIVATE").unwrap();
        assert!(SshKeyPair::load(dir.path()).unwrap().is_none());

        fs::write(dir.path().join("ssh_key.pub"), "ssh-ed25519 AAAA burrow-agent\n").unwrap();
        let pair = SshKeyPair::load(dir.path()).unwrap().unwrap();
        assert_eq!(pair.public_key, "ssh-ed25519 AAAA burrow-agent");
        assert_eq!(pair.private_key_file, dir.path().join("ssh_key"));
    }
}
