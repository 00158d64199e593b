pub mod config;
pub mod mqtt;
pub mod readings;
pub mod types;
pub mod utils;

pub use crate::config::{load_config, load_config_from, SdkConfig};
pub use mqtt::{BrokerConfig, DEFAULT_TRANSPORT};
pub use readings::{resolve_device, Reading, ReadingsPayload};
pub use types::{ChannelCredentials, Device, InboundMessage, ProvisioningError, StreamError};
pub use utils::{payload_preview, user_agent};
