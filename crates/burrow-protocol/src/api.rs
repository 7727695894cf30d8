//! Coordination API messages
//!
//! Every command is a JSON `POST` to `<api_url>/<command>`. Requests carry
//! the machine identity under a `machine` key; replies nest their payload
//! the same way.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Command used for a routine checkin
pub const CHECKIN_COMMAND: &str = "agent_ping_checkin";

/// Command used to open a restore session
pub const RESTORE_COMMAND: &str = "agent_ping_restore";

/// Command used to publish local configuration
pub const UPDATE_CONFIG_COMMAND: &str = "update_config";

/// Machine identity presented on every ping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineIdentity {
    pub uuid: String,
    pub secret: String,
}

/// Body of `agent_ping_checkin` and `agent_ping_restore`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRequest {
    pub machine: MachineIdentity,
}

impl PingRequest {
    pub fn new(uuid: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            machine: MachineIdentity {
                uuid: uuid.into(),
                secret: secret.into(),
            },
        }
    }
}

/// A remote storage unit, as advertised by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUnit {
    /// Unique storage unit name
    pub name: String,
    /// Host the tunnel client connects to
    pub ssh_ping_host: String,
    /// Host public keys (`<type> <base64>`), pinned for the tunnel
    pub ssh_ping_host_keys: Vec<String>,
    /// SSH port on the storage unit
    pub ssh_ping_port: u16,
    /// Login user on the storage unit
    pub ssh_ping_user: String,
}

/// A source entry in a ping reply
///
/// Sources without a storage assignment are never scheduled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAssignment {
    #[serde(default)]
    pub storage: Option<StorageUnit>,
}

/// Reply to `agent_ping_checkin`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckinReply {
    pub machine: CheckinMachine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckinMachine {
    /// Sources due for backup now, keyed by source name
    pub scheduled_sources: BTreeMap<String, SourceAssignment>,
}

/// Reply to `agent_ping_restore`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReply {
    pub machine: RestoreMachine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreMachine {
    /// Every source the coordinator knows for this machine
    pub sources: BTreeMap<String, SourceAssignment>,
}

/// Registration credential sent with `update_config`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiAuth {
    /// Named credential (preferred)
    Named { name: String, secret: String },
    /// Nameless secret from older deployments, passed through as configured
    Legacy(Value),
}

/// Machine section of `update_config`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishedMachine {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<Value>,
    /// Full source declarations, credentials included
    pub sources: BTreeMap<String, Value>,
}

/// Body of `update_config`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateConfigRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<ApiAuth>,
    pub machine: PublishedMachine,
}
