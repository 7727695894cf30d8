//! burrow-agent: Session orchestration for the burrow backup agent
//!
//! The agent checks in with the coordination service, and for every
//! storage unit with work scheduled it starts a local transfer daemon and
//! opens a reverse tunnel through which the storage unit pulls (or, in
//! restore mode, pushes) files. It also publishes the machine's local
//! configuration to the coordinator.

pub mod api;
pub mod error;
pub mod gonogo;
pub mod launcher;
pub mod publish;
pub mod session;
pub mod traits;

pub use api::ApiClient;
pub use error::{ApiError, PublishError, SessionError};
pub use session::{Mode, Orchestrator, PingOptions, ProcessSessionRunner, RunOutcome, SkipReason};
pub use traits::{Coordinator, SessionRunner};
