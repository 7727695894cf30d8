//! Layered configuration for the burrow agent
//!
//! Configuration lives in two tiers:
//!
//! - the etc tier (`config_dir`, default `/etc/burrow-agent`), written by
//!   the administrator, and
//! - the var tier (`var_dir`, default `/var/lib/burrow-agent`), written by
//!   the agent itself when it provisions identity material.
//!
//! Each tier has a `config.d` directory of fragments merged in file-name
//! order. The var tier forms the base and the etc tier is merged on top,
//! so administrator settings always win. Sources are declared the same
//! way under `sources.d`.

mod merge;
mod provision;
mod resolved;
pub mod serde_utils;

pub use merge::{deep_merge, fragment_files, load_fragment, load_tier, merged, Fragment, Tier};
pub use provision::{fill, ProvisionAction, Provisioned, KEY_COMMENT};
pub use resolved::{GoNoGo, GoNoGoValue, ResolvedConfig, SourceConfig, SshKeyPair};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::ConfigError;

/// Default administrator configuration directory
pub const DEFAULT_CONFIG_DIR: &str = "/etc/burrow-agent";

/// Default agent state directory
pub const DEFAULT_VAR_DIR: &str = "/var/lib/burrow-agent";

/// Fragment directory name for general configuration
pub const CONFIG_D: &str = "config.d";

/// Fragment directory name for source declarations
pub const SOURCES_D: &str = "sources.d";

/// Private key file name inside `var_dir`
pub const SSH_KEY_FILE: &str = "ssh_key";

/// Resolve the configuration rooted at `config_dir`
///
/// Read-only: nothing is generated or written. Missing identity material
/// stays unset until [`fill`] provisions it.
pub fn resolve(config_dir: impl AsRef<Path>) -> Result<ResolvedConfig, ConfigError> {
    let config_dir = config_dir.as_ref().to_path_buf();

    let etc = load_tier(&config_dir.join(CONFIG_D), Tier::Etc)?;
    let var_dir = match etc.get("var_dir") {
        None => PathBuf::from(DEFAULT_VAR_DIR),
        Some(Value::String(dir)) => PathBuf::from(dir),
        Some(other) => {
            return Err(ConfigError::Invalid(format!(
                "var_dir must be a string, got {}",
                other
            )))
        }
    };
    let var = load_tier(&var_dir.join(CONFIG_D), Tier::Var)?;

    let mut config: ResolvedConfig = serde_json::from_value(Value::Object(merged(var, etc)))
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

    // Only the etc tier (or the default) decides where the var tier lives
    config.config_dir = config_dir;
    config.var_dir = var_dir;
    config.ssh_key = SshKeyPair::load(&config.var_dir)?;
    config.sources = load_sources(&config.config_dir, &config.var_dir)?;

    tracing::debug!(
        "Resolved config from {:?} and {:?} ({} sources)",
        config.config_dir,
        config.var_dir,
        config.sources.len()
    );

    Ok(config)
}

/// Merge source declarations; entries without a `path` are dropped
pub fn load_sources(
    config_dir: &Path,
    var_dir: &Path,
) -> Result<BTreeMap<String, SourceConfig>, ConfigError> {
    let var = load_tier(&var_dir.join(SOURCES_D), Tier::Var)?;
    let etc = load_tier(&config_dir.join(SOURCES_D), Tier::Etc)?;

    let mut sources = BTreeMap::new();
    for (name, entry) in merged(var, etc) {
        let has_path = entry.as_object().is_some_and(|e| e.contains_key("path"));
        if !has_path {
            tracing::debug!("Ignoring source {:?} without a path", name);
            continue;
        }
        let source: SourceConfig = serde_json::from_value(entry)
            .map_err(|e| ConfigError::Invalid(format!("source {}: {}", name, e)))?;
        sources.insert(name, source);
    }
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    /// Etc and var roots inside one temp dir, with var_dir pointed at the latter
    pub(crate) struct Layout {
        pub _root: TempDir,
        pub etc: PathBuf,
        pub var: PathBuf,
    }

    impl Layout {
        pub fn new() -> Self {
            let root = TempDir::new().unwrap();
            let etc = root.path().join("etc");
            let var = root.path().join("var");
            fs::create_dir_all(etc.join(CONFIG_D)).unwrap();
            fs::create_dir_all(etc.join(SOURCES_D)).unwrap();
            fs::create_dir_all(var.join(CONFIG_D)).unwrap();
            fs::create_dir_all(var.join(SOURCES_D)).unwrap();
            let layout = Self {
                _root: root,
                etc,
                var,
            };
            layout.etc_config(
                "00-var.json",
                json!({"var_dir": layout.var.to_string_lossy()}),
            );
            layout
        }

        pub fn etc_config(&self, name: &str, value: Value) {
            fs::write(self.etc.join(CONFIG_D).join(name), value.to_string()).unwrap();
        }

        pub fn var_config(&self, name: &str, value: Value) {
            fs::write(self.var.join(CONFIG_D).join(name), value.to_string()).unwrap();
        }

        pub fn etc_source(&self, name: &str, value: Value) {
            fs::write(self.etc.join(SOURCES_D).join(name), value.to_string()).unwrap();
        }

        pub fn var_source(&self, name: &str, value: Value) {
            fs::write(self.var.join(SOURCES_D).join(name), value.to_string()).unwrap();
        }
    }

    #[test]
    fn test_etc_wins_over_var() {
        let layout = Layout::new();
        layout.var_config(
            "10-machine_uuid.json",
            json!({"machine_uuid": "var-uuid", "machine_secret": "var-secret", "rsyncd_user": "nobody"}),
        );
        layout.etc_config("50-admin.json", json!({"machine_uuid": "etc-uuid"}));

        let config = resolve(&layout.etc).unwrap();
        assert_eq!(config.machine_uuid.as_deref(), Some("etc-uuid"));
        assert_eq!(config.machine_secret.as_deref(), Some("var-secret"));
        assert_eq!(config.rsyncd_user, "nobody");
    }

    #[test]
    fn test_same_tier_order_by_filename() {
        let layout = Layout::new();
        layout.etc_config("20-b.json", json!({"environment_name": "second"}));
        layout.etc_config("10-a.json", json!({"environment_name": "first"}));

        let config = resolve(&layout.etc).unwrap();
        assert_eq!(config.environment_name.as_deref(), Some("second"));
    }

    #[test]
    fn test_var_tier_cannot_move_var_dir() {
        let layout = Layout::new();
        layout.var_config("10-x.json", json!({"var_dir": "/elsewhere"}));

        let config = resolve(&layout.etc).unwrap();
        assert_eq!(config.var_dir, layout.var);
    }

    #[test]
    fn test_defaults_without_any_fragments() {
        let root = TempDir::new().unwrap();
        let config = resolve(root.path()).unwrap();

        assert_eq!(config.config_dir, root.path());
        assert_eq!(config.var_dir, PathBuf::from(DEFAULT_VAR_DIR));
        assert_eq!(config.rsyncd_local_address, "127.0.0.1");
        assert!(config.api_url.is_none());
    }

    #[test]
    fn test_wrong_type_is_invalid() {
        let layout = Layout::new();
        layout.etc_config("10-bad.json", json!({"rsyncd_command": 7}));
        assert!(matches!(resolve(&layout.etc), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_oversized_timeout_is_invalid() {
        let layout = Layout::new();
        layout.etc_config("10-api.json", json!({"api_timeout": 1e30}));
        assert!(matches!(resolve(&layout.etc), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_fragment_aborts_resolution() {
        let layout = Layout::new();
        fs::write(layout.etc.join(SOURCES_D).join("10-bad.json"), "{").unwrap();
        layout.etc_source("20-good.json", json!({"home": {"path": "/home"}}));

        assert!(matches!(
            resolve(&layout.etc),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_sources_without_path_dropped() {
        let layout = Layout::new();
        layout.etc_source(
            "10-sources.json",
            json!({
                "home": {"path": "/home"},
                "nopath": {"username": "u", "password": "p", "frequency": "daily"},
                "scalar": "oops"
            }),
        );

        let config = resolve(&layout.etc).unwrap();
        assert_eq!(config.sources.keys().collect::<Vec<_>>(), vec!["home"]);
    }

    #[test]
    fn test_var_source_credentials_overlay() {
        let layout = Layout::new();
        layout.etc_source("10-home.json", json!({"home": {"path": "/home"}}));
        layout.var_source(
            "10-home.json",
            json!({"home": {"username": "gen-user", "password": "gen-pass", "path": "/ignored"}}),
        );
        layout.var_source("10-orphan.json", json!({"orphan": {"username": "x", "password": "y"}}));

        let config = resolve(&layout.etc).unwrap();
        let home = &config.sources["home"];
        assert_eq!(home.path, PathBuf::from("/home"));
        assert_eq!(home.username.as_deref(), Some("gen-user"));
        assert_eq!(home.password.as_deref(), Some("gen-pass"));
        assert!(!config.sources.contains_key("orphan"));
    }

    #[test]
    fn test_ssh_key_fields_from_var_dir() {
        let layout = Layout::new();
        fs::write(layout.var.join("ssh_key"), "PRIVATE").unwrap();
        fs::write(layout.var.join("ssh_key.pub"), "ssh-ed25519 AAAA c\n").unwrap();

        let config = resolve(&layout.etc).unwrap();
        let key = config.ssh_key.unwrap();
        assert_eq!(key.public_key, "ssh-ed25519 AAAA c");
        assert_eq!(key.private_key_file, layout.var.join("ssh_key"));
    }
}
