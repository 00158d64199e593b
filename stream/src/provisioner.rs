use anyhow::Context;
use async_trait::async_trait;
use relayr_shared::{payload_preview, user_agent, ChannelCredentials, ProvisioningError, SdkConfig, StreamError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Obtains per-device transport credentials from the platform.
#[async_trait]
pub trait CredentialProvisioner: Send + Sync {
    async fn provision(
        &self,
        device_id: &str,
        transport: &str,
    ) -> Result<ChannelCredentials, ProvisioningError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelRequest<'a> {
    device_id: &'a str,
    transport: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelResponse {
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    transport: Option<String>,
    credentials: ChannelCredentials,
}

// 通过 relayr REST API 创建数据通道
pub struct ApiProvisioner {
    http: reqwest::Client,
    api: String,
    token: String,
}

impl ApiProvisioner {
    pub fn new(config: &SdkConfig, token: impl Into<String>) -> Result<Self, StreamError> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent(&config.client_name, env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            api: config.api.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    async fn create_channel(
        &self,
        device_id: &str,
        transport: &str,
    ) -> anyhow::Result<ChannelCredentials> {
        let url = format!("{}/channels", self.api);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&ChannelRequest {
                device_id,
                transport,
            })
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "platform answered {}: {}",
                status,
                payload_preview(body.as_bytes(), 200)
            );
        }

        let channel: ChannelResponse = response
            .json()
            .await
            .context("Malformed channel response")?;

        debug!(
            "Created {} channel {:?} for device {}",
            transport, channel.channel_id, device_id
        );

        let mut credentials = channel.credentials;
        if credentials.transport.is_empty() {
            credentials.transport = channel.transport.unwrap_or_else(|| transport.to_string());
        }

        Ok(credentials)
    }
}

#[async_trait]
impl CredentialProvisioner for ApiProvisioner {
    async fn provision(
        &self,
        device_id: &str,
        transport: &str,
    ) -> Result<ChannelCredentials, ProvisioningError> {
        self.create_channel(device_id, transport)
            .await
            .map_err(|e| ProvisioningError::new(device_id, format!("{:#}", e)))
    }
}
