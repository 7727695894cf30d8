//! burrow-protocol: Wire types for the burrow backup agent
//!
//! This crate defines the JSON messages exchanged with the coordination
//! service and the session descriptor the agent hands to a storage unit
//! over the reverse tunnel.

pub mod api;
pub mod session;

pub use api::{
    ApiAuth, CheckinMachine, CheckinReply, MachineIdentity, PingRequest, PublishedMachine,
    RestoreMachine, RestoreReply, SourceAssignment, StorageUnit, UpdateConfigRequest,
};
pub use session::{Credentials, SessionAction, SessionRequest, SESSION_TERMINATOR};
