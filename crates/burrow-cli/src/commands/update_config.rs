//! Provision identity material and publish the configuration

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use burrow_agent::publish::{publish, AuthOverride, UPDATE_CONFIG_LOCK_NAME};
use burrow_agent::session::jitter;
use burrow_agent::ApiClient;
use burrow_core::{config, RuntimeLock};

pub async fn update_config_command(
    config_dir: &Path,
    wait: Option<Duration>,
    auth: Option<AuthOverride>,
) -> Result<()> {
    jitter(wait).await;

    let config = config::resolve(config_dir)
        .with_context(|| format!("Failed to load configuration from {:?}", config_dir))?;
    let _lock = RuntimeLock::acquire(UPDATE_CONFIG_LOCK_NAME, config.lock_dir.as_deref())?;

    let provisioned = config::fill(config).context("Failed to provision agent identity")?;
    tracing::debug!("Provisioning took {} action(s)", provisioned.actions.len());

    let config = provisioned.config;
    let client = ApiClient::new(config.api_url.clone().unwrap_or_default(), config.api_timeout)?;
    publish(&config, auth.as_ref(), &client).await?;

    tracing::info!("Configuration published");
    Ok(())
}
