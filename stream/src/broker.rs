use async_trait::async_trait;
use relayr_shared::{BrokerConfig, ChannelCredentials, InboundMessage, StreamError};
use std::sync::Arc;

// broker 连接上发生的事件
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    Connected,
    ConnectionRefused(String),
    Disconnected(String),
    Message(InboundMessage),
    SubscribeAck(u16),
    UnsubscribeAck(u16),
}

/// Outgoing half of a broker connection.
///
/// Calls only queue the request; the matching acknowledgement arrives later
/// through [`BrokerEvents`].
pub trait BrokerClient: Send + Sync {
    fn subscribe(&self, topics: &[String]) -> Result<(), StreamError>;

    fn unsubscribe(&self, topic: &str) -> Result<(), StreamError>;

    fn disconnect(&self) -> Result<(), StreamError>;
}

/// Incoming half of a broker connection. `None` means the connection is gone
/// for good.
#[async_trait]
pub trait BrokerEvents: Send {
    async fn next_event(&mut self) -> Option<BrokerEvent>;
}

pub trait BrokerConnector: Send + Sync {
    fn connect(
        &self,
        credentials: &ChannelCredentials,
        broker: &BrokerConfig,
    ) -> Result<(Arc<dyn BrokerClient>, Box<dyn BrokerEvents>), StreamError>;
}
