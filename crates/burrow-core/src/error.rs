//! Core error types for burrow

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A fragment or directory could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A fragment is not valid JSON/TOML
    #[error("Error loading {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// A fragment parsed, but its top level is not a mapping
    #[error("Error loading {}: top level is not a mapping", path.display())]
    NotAMapping { path: PathBuf },

    /// The merged configuration has a value of the wrong type
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Identity material could not be provisioned
    #[error("Provisioning failed: {0}")]
    Provision(String),
}

impl ConfigError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Process-exclusion lock errors
#[derive(Error, Debug)]
pub enum LockError {
    /// Another process holds the lock
    #[error("Lock {} is held by another process", path.display())]
    Held { path: PathBuf },

    /// None of the candidate lock directories exist
    #[error("Suitable lock directory not found")]
    NoLockDir,

    /// The lock file could not be opened or written
    #[error("Lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
