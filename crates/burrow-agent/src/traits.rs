//! Seams between session logic and the outside world

use async_trait::async_trait;

use burrow_protocol::{CheckinReply, PingRequest, RestoreReply, UpdateConfigRequest};

use crate::error::{ApiError, SessionError};
use crate::session::SessionPlan;

/// The coordination service, as seen by the agent
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Ask which sources are due and where they go
    async fn checkin(&self, request: &PingRequest) -> Result<CheckinReply, ApiError>;

    /// Ask which storage units hold this machine's sources
    async fn restore(&self, request: &PingRequest) -> Result<RestoreReply, ApiError>;

    /// Publish the local configuration; the reply body is not used
    async fn update_config(&self, request: &UpdateConfigRequest) -> Result<(), ApiError>;
}

/// Runs one transfer session against one storage unit
#[async_trait]
pub trait SessionRunner: Send + Sync {
    async fn run(&self, plan: &SessionPlan) -> Result<(), SessionError>;
}
