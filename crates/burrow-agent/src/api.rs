//! Coordination service client
//!
//! Every exchange is one JSON POST to `<api_url>/<command>`. A reply is
//! accepted only when the status is a success, the content type is JSON
//! and the body decodes into the expected type.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use burrow_protocol::api::{CHECKIN_COMMAND, RESTORE_COMMAND, UPDATE_CONFIG_COMMAND};
use burrow_protocol::{CheckinReply, PingRequest, RestoreReply, UpdateConfigRequest};

use crate::error::ApiError;
use crate::traits::Coordinator;

const JSON_MEDIA_TYPE: &str = "application/json";

/// HTTP client bound to one coordination service
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ApiClient {
    /// Create a client; the base URL is validated on first use
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = base_url.into();
        let http = reqwest::Client::builder()
            .build()
            .map_err(|source| ApiError::Transport {
                url: base_url.clone(),
                source,
            })?;

        Ok(Self {
            http,
            base_url,
            timeout,
        })
    }

    /// Absolute URL for `command`
    ///
    /// The base is treated as a directory whether or not it ends in `/`.
    pub fn command_url(&self, command: &str) -> Result<Url, ApiError> {
        let mut base = self.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        Url::parse(&base)
            .and_then(|base| base.join(command))
            .map_err(|e| ApiError::Url {
                url: self.base_url.clone(),
                message: e.to_string(),
            })
    }

    /// POST `body` to `command` and decode the reply
    pub async fn call<B, T>(&self, command: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.command_url(command)?;
        let url_text = url.to_string();
        tracing::debug!("API request: {}", url_text);
        if let Ok(text) = serde_json::to_string(body) {
            tracing::trace!("API request body: {}", text);
        }

        let response = self
            .http
            .post(url)
            .header(ACCEPT, JSON_MEDIA_TYPE)
            .json(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                url: url_text.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                url: url_text,
                status,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if !is_json_content_type(content_type.as_deref()) {
            return Err(ApiError::ContentType {
                url: url_text,
                content_type,
            });
        }

        let bytes = response.bytes().await.map_err(|source| ApiError::Transport {
            url: url_text.clone(),
            source,
        })?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode {
            url: url_text.clone(),
            message: e.to_string(),
        })?;
        tracing::debug!("API response: {} from {}", status, url_text);
        tracing::trace!("API response body: {}", value);

        serde_json::from_value(value).map_err(|e| ApiError::Decode {
            url: url_text,
            message: e.to_string(),
        })
    }
}

/// `application/json`, parameters and case ignored
fn is_json_content_type(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|media| media.trim().eq_ignore_ascii_case(JSON_MEDIA_TYPE))
        .unwrap_or(false)
}

#[async_trait]
impl Coordinator for ApiClient {
    async fn checkin(&self, request: &PingRequest) -> Result<CheckinReply, ApiError> {
        self.call(CHECKIN_COMMAND, request).await
    }

    async fn restore(&self, request: &PingRequest) -> Result<RestoreReply, ApiError> {
        self.call(RESTORE_COMMAND, request).await
    }

    async fn update_config(&self, request: &UpdateConfigRequest) -> Result<(), ApiError> {
        let _: Value = self.call(UPDATE_CONFIG_COMMAND, request).await?;
        Ok(())
    }
}
