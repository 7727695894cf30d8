//! Fragment discovery and deep merge
//!
//! A tier is one `*.d` directory. Its fragments are merged in file-name
//! order, later files winning. Mappings merge recursively; any other
//! value (arrays included) replaces what was there.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::ConfigError;

/// JSON object used as the merge accumulator
pub type Fragment = Map<String, Value>;

/// Which precedence tier a directory belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Administrator-authored (`config_dir`); JSON or TOML
    Etc,
    /// Written by the agent (`var_dir`); JSON only
    Var,
}

impl Tier {
    /// Whether a fragment with this file name is read in this tier
    pub fn accepts(self, path: &Path) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => true,
            Some("toml") => self == Tier::Etc,
            _ => false,
        }
    }
}

/// Merge `overlay` into `base`; `overlay` wins on scalar collisions
pub fn deep_merge(base: &mut Fragment, overlay: Fragment) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Merge two fragments by value, `overlay` on top of `base`
pub fn merged(mut base: Fragment, overlay: Fragment) -> Fragment {
    deep_merge(&mut base, overlay);
    base
}

/// Fragment files in `dir` for `tier`, sorted by file name
///
/// A missing directory has no fragments.
pub fn fragment_files(dir: &Path, tier: Tier) -> Result<Vec<PathBuf>, ConfigError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(dir).map_err(|e| ConfigError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| ConfigError::io(dir, e))?.path();
        if path.is_file() && tier.accepts(&path) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Load one fragment
///
/// Unreadable files are skipped (`Ok(None)`); malformed ones are fatal.
pub fn load_fragment(path: &Path) -> Result<Option<Fragment>, ConfigError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            tracing::debug!("Skipping unreadable config fragment {:?}", path);
            return Ok(None);
        }
        Err(e) => return Err(ConfigError::io(path, e)),
    };

    let parse_error = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };
    let value: Value = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&text).map_err(|e| parse_error(e.to_string()))?,
        _ => serde_json::from_str(&text).map_err(|e| parse_error(e.to_string()))?,
    };

    match value {
        Value::Object(map) => Ok(Some(map)),
        _ => Err(ConfigError::NotAMapping {
            path: path.to_path_buf(),
        }),
    }
}

/// Merge every fragment of one tier directory
pub fn load_tier(dir: &Path, tier: Tier) -> Result<Fragment, ConfigError> {
    let mut acc = Fragment::new();
    for path in fragment_files(dir, tier)? {
        if let Some(fragment) = load_fragment(&path)? {
            tracing::trace!("Merging config fragment {:?}", path);
            deep_merge(&mut acc, fragment);
        }
    }
    Ok(acc)
}
