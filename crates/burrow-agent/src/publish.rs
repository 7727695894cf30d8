//! Publishing local configuration to the coordinator
//!
//! This is how the coordinator learns the machine's identity, its public
//! key, and every source with its transfer credentials.

use std::collections::BTreeMap;

use burrow_core::ResolvedConfig;
use burrow_protocol::{ApiAuth, PublishedMachine, UpdateConfigRequest};

use crate::error::PublishError;
use crate::traits::Coordinator;

/// Lock held while publishing
pub const UPDATE_CONFIG_LOCK_NAME: &str = "burrow-update-config";

/// Registration credential given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOverride {
    pub name: String,
    pub secret: String,
}

/// Pick the registration credential
///
/// Command line first, then the configured name and secret, then the
/// legacy nameless secret.
pub fn resolve_auth(
    config: &ResolvedConfig,
    cli: Option<&AuthOverride>,
) -> Result<ApiAuth, PublishError> {
    if let Some(auth) = cli {
        return Ok(ApiAuth::Named {
            name: auth.name.clone(),
            secret: auth.secret.clone(),
        });
    }

    match (&config.api_auth_name, &config.api_auth_secret, &config.api_auth) {
        (Some(name), Some(secret), _) => Ok(ApiAuth::Named {
            name: name.clone(),
            secret: secret.clone(),
        }),
        (_, _, Some(legacy)) => Ok(ApiAuth::Legacy(legacy.clone())),
        (Some(_), None, None) => Err(PublishError::IncompleteConfig("api_auth_secret".into())),
        (None, Some(_), None) => Err(PublishError::IncompleteConfig("api_auth_name".into())),
        (None, None, None) => Err(PublishError::IncompleteConfig("api_auth".into())),
    }
}

/// Build the `update_config` body
pub fn build_request(
    config: &ResolvedConfig,
    auth: ApiAuth,
) -> Result<UpdateConfigRequest, PublishError> {
    let mut sources = BTreeMap::new();
    for (name, source) in &config.sources {
        let value = serde_json::to_value(source).map_err(|source| PublishError::Encode {
            source_name: name.clone(),
            source,
        })?;
        sources.insert(name.clone(), value);
    }

    Ok(UpdateConfigRequest {
        auth: Some(auth),
        machine: PublishedMachine {
            uuid: config.machine_uuid.clone(),
            secret: config.machine_secret.clone(),
            environment_name: config.environment_name.clone(),
            service_name: config.service_name.clone(),
            unit_name: Some(config.unit_name()),
            ssh_public_key: config.ssh_key.as_ref().map(|key| key.public_key.clone()),
            published: config.published.clone(),
            sources,
        },
    })
}

/// Validate and send the local configuration
pub async fn publish<C>(
    config: &ResolvedConfig,
    cli_auth: Option<&AuthOverride>,
    coordinator: &C,
) -> Result<(), PublishError>
where
    C: Coordinator + ?Sized,
{
    if config.api_url.is_none() {
        return Err(PublishError::IncompleteConfig("api_url".into()));
    }
    let auth = resolve_auth(config, cli_auth)?;
    let request = build_request(config, auth)?;

    tracing::info!(
        "Publishing configuration ({} sources) to the coordinator",
        request.machine.sources.len()
    );
    coordinator.update_config(&request).await?;
    Ok(())
}
