use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// 设备引用：只用于申请通道凭证
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Device {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Device {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Transport credentials granted by the platform for one device.
///
/// Immutable once issued. A fresh set is requested every time a device is
/// (re)added to a stream, nothing is persisted.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCredentials {
    #[serde(default)]
    pub transport: String,
    pub client_id: String,
    #[serde(rename = "user")]
    pub username: String,
    pub password: String,
    pub topic: String,
}

impl fmt::Debug for ChannelCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelCredentials")
            .field("transport", &self.transport)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("topic", &self.topic)
            .finish()
    }
}

// 从 broker 收到的原始消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    /// Decodes the payload as UTF-8, consuming the message.
    pub fn into_text(self) -> Result<(String, String), StreamError> {
        let topic = self.topic;
        match String::from_utf8(self.payload) {
            Ok(text) => Ok((topic, text)),
            Err(source) => Err(StreamError::Decode { topic, source }),
        }
    }
}

// 凭证申请失败
#[derive(Debug, thiserror::Error)]
#[error("failed to provision credentials for device {device_id}: {reason}")]
pub struct ProvisioningError {
    pub device_id: String,
    pub reason: String,
}

impl ProvisioningError {
    pub fn new(device_id: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            device_id: device_id.into(),
            reason: reason.to_string(),
        }
    }
}

// 流式客户端错误类型
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Payload on topic {topic} is not valid UTF-8: {source}")]
    Decode {
        topic: String,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("No known device matches id {0}")]
    UnknownDevice(String),

    #[error("Cannot {operation} a session in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("A stream needs at least one device")]
    NoDevices,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
