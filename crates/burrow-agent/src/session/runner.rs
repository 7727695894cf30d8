//! Session runner backed by real subprocesses

use async_trait::async_trait;

use burrow_core::ResolvedConfig;

use super::plan::SessionPlan;
use super::rsyncd::TransferDaemon;
use super::tunnel::{self, TunnelEnd};
use crate::error::SessionError;
use crate::traits::SessionRunner;

/// Runs sessions with the configured transfer daemon and tunnel client
pub struct ProcessSessionRunner {
    config: ResolvedConfig,
}

impl ProcessSessionRunner {
    pub fn new(config: ResolvedConfig) -> Self {
        Self { config }
    }

    async fn settle_and_tunnel(&self, plan: &SessionPlan) -> Result<TunnelEnd, SessionError> {
        tokio::select! {
            _ = tokio::time::sleep(self.config.rsyncd_settle_delay) => {}
            Ok(()) = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted before the tunnel opened");
                return Ok(TunnelEnd::Interrupted);
            }
        }
        tunnel::run(&self.config, plan).await
    }
}

#[async_trait]
impl SessionRunner for ProcessSessionRunner {
    async fn run(&self, plan: &SessionPlan) -> Result<(), SessionError> {
        tracing::info!(
            "Starting {:?} session with {} on port {}",
            plan.action,
            plan.storage.name,
            plan.port
        );

        let daemon = TransferDaemon::start(&self.config, plan)?;
        // The daemon is stopped on every path out of the tunnel phase
        let result = self.settle_and_tunnel(plan).await;
        daemon.stop().await;

        let end = result?;
        tracing::info!("Session with {} finished ({:?})", plan.storage.name, end);
        Ok(())
    }
}
