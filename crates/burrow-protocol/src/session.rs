//! Tunnel session descriptor
//!
//! Once the reverse tunnel is up, the agent writes a single line of JSON
//! describing the session to the remote command's stdin, followed by a
//! line containing only `.`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Line that terminates the session descriptor
pub const SESSION_TERMINATOR: &str = ".";

/// What the storage unit should do with the tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionAction {
    /// Pull scheduled sources
    Checkin,
    /// Push data back into the restore module
    Restore,
}

/// Transfer daemon login for one module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Descriptor sent to the storage unit over the tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub action: SessionAction,
    /// Port the transfer daemon is reachable on through the tunnel
    pub port: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sources: BTreeMap<String, Credentials>,
    pub verbose: bool,
}

impl SessionRequest {
    /// Encode the descriptor as written to the tunnel: JSON, newline, `.`, newline
    pub fn to_wire(&self) -> serde_json::Result<String> {
        let mut out = serde_json::to_string(self)?;
        out.push('\n');
        out.push_str(SESSION_TERMINATOR);
        out.push('\n');
        Ok(out)
    }
}
