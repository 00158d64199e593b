//! Telemetry streaming for relayr devices.
//!
//! An [`MqttStream`] owns one broker connection shared by a set of devices.
//! Messages go either to a caller supplied handler or to an in-memory queue
//! that is drained with [`MqttStream::drain_all`].

pub mod broker;
pub mod dispatcher;
pub mod events;
pub mod provisioner;
pub mod queue;
pub mod registry;
pub mod rumqtt;
pub mod session;

#[cfg(test)]
mod testing;

pub use broker::{BrokerClient, BrokerConnector, BrokerEvent, BrokerEvents};
pub use dispatcher::{Dispatcher, MessageHandler};
pub use events::SessionEvent;
pub use provisioner::{ApiProvisioner, CredentialProvisioner};
pub use queue::MessageQueue;
pub use registry::TopicRegistry;
pub use rumqtt::RumqttConnector;
pub use session::{MqttStream, MqttStreamBuilder, SessionState};

pub use relayr_shared::{
    BrokerConfig, ChannelCredentials, Device, InboundMessage, ProvisioningError, SdkConfig,
    StreamError,
};
