//! burrow-core: Configuration and local state for the burrow backup agent
//!
//! This crate resolves the layered on-disk configuration, provisions the
//! machine's identity material, and provides the two filesystem
//! primitives everything else relies on: atomic file replacement and a
//! per-operation process lock.

pub mod atomic;
pub mod config;
pub mod credentials;
pub mod error;
pub mod lock;

pub use atomic::AtomicFile;
pub use config::{ResolvedConfig, SourceConfig};
pub use error::{ConfigError, LockError};
pub use lock::RuntimeLock;
