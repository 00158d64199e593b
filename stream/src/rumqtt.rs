use crate::broker::{BrokerClient, BrokerConnector, BrokerEvent, BrokerEvents};
use async_trait::async_trait;
use relayr_shared::{payload_preview, BrokerConfig, ChannelCredentials, InboundMessage, StreamError};
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, ConnectionError, Event, EventLoop, Incoming, MqttOptions,
    Outgoing, QoS, SubscribeFilter, Transport,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// 请求通道容量
const REQUEST_CAPACITY: usize = 64;

/// Connects to the relayr broker with `rumqttc`.
///
/// The event loop is polled by the session worker; once it reports an error
/// it is dropped, so a lost connection is never re-established behind the
/// caller's back.
#[derive(Debug, Default, Clone)]
pub struct RumqttConnector;

impl RumqttConnector {
    pub fn new() -> Self {
        Self
    }

    pub fn mqtt_options(credentials: &ChannelCredentials, broker: &BrokerConfig) -> MqttOptions {
        let mut mqtt_options =
            MqttOptions::new(credentials.client_id.clone(), &broker.host, broker.port);

        // 设置认证信息
        mqtt_options.set_credentials(credentials.username.clone(), credentials.password.clone());

        // 设置保持连接
        mqtt_options.set_keep_alive(Duration::from_secs(broker.keep_alive_secs));
        mqtt_options.set_clean_session(true);

        if broker.use_tls {
            // rustls + 系统根证书
            mqtt_options.set_transport(Transport::Tls(Default::default()));
        }

        mqtt_options
    }
}

impl BrokerConnector for RumqttConnector {
    fn connect(
        &self,
        credentials: &ChannelCredentials,
        broker: &BrokerConfig,
    ) -> Result<(Arc<dyn BrokerClient>, Box<dyn BrokerEvents>), StreamError> {
        let mqtt_options = Self::mqtt_options(credentials, broker);
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        info!(
            "Connecting to MQTT broker {} as {} (tls: {})",
            broker.address(),
            credentials.client_id,
            broker.use_tls
        );

        Ok((
            Arc::new(RumqttClient { client }),
            Box::new(RumqttEvents {
                event_loop,
                finished: false,
            }),
        ))
    }
}

pub struct RumqttClient {
    client: AsyncClient,
}

impl BrokerClient for RumqttClient {
    fn subscribe(&self, topics: &[String]) -> Result<(), StreamError> {
        match topics {
            [] => Ok(()),
            [topic] => {
                self.client
                    .try_subscribe(topic.as_str(), QoS::AtMostOnce)
                    .map_err(|e| request_error(&format!("subscribe to {}", topic), e))?;
                debug!("Subscribe request queued for {}", topic);
                Ok(())
            }
            _ => {
                let filters = topics
                    .iter()
                    .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtMostOnce));
                self.client
                    .try_subscribe_many(filters)
                    .map_err(|e| request_error(&format!("subscribe to {} topics", topics.len()), e))?;
                debug!("Subscribe request queued for {} topics", topics.len());
                Ok(())
            }
        }
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), StreamError> {
        self.client
            .try_unsubscribe(topic)
            .map_err(|e| request_error(&format!("unsubscribe from {}", topic), e))?;
        debug!("Unsubscribe request queued for {}", topic);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), StreamError> {
        self.client
            .try_disconnect()
            .map_err(|e| request_error("disconnect", e))?;
        Ok(())
    }
}

// 请求队列已满或事件循环已关闭，都视为连接问题
fn request_error(action: &str, error: ClientError) -> StreamError {
    StreamError::Connection(format!("Failed to {}: {}", action, error))
}

pub struct RumqttEvents {
    event_loop: EventLoop,
    finished: bool,
}

#[async_trait]
impl BrokerEvents for RumqttEvents {
    async fn next_event(&mut self) -> Option<BrokerEvent> {
        if self.finished {
            return None;
        }

        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(incoming)) => match incoming {
                    Incoming::ConnAck(connack) => {
                        if connack.code == ConnectReturnCode::Success {
                            info!("MQTT connection established");
                            return Some(BrokerEvent::Connected);
                        }
                        self.finished = true;
                        return Some(BrokerEvent::ConnectionRefused(format!("{:?}", connack.code)));
                    }
                    Incoming::Publish(publish) => {
                        debug!(
                            "Received MQTT message on topic: {} ({})",
                            publish.topic,
                            payload_preview(&publish.payload, 64)
                        );
                        return Some(BrokerEvent::Message(InboundMessage::new(
                            publish.topic,
                            publish.payload.to_vec(),
                        )));
                    }
                    Incoming::SubAck(suback) => {
                        debug!("Subscribe acknowledged: {:?}", suback.return_codes);
                        return Some(BrokerEvent::SubscribeAck(suback.pkid));
                    }
                    Incoming::UnsubAck(unsuback) => {
                        debug!("Unsubscribe acknowledged: {}", unsuback.pkid);
                        return Some(BrokerEvent::UnsubscribeAck(unsuback.pkid));
                    }
                    Incoming::Disconnect => {
                        warn!("MQTT broker initiated disconnect");
                        self.finished = true;
                        return Some(BrokerEvent::Disconnected(
                            "broker initiated disconnect".to_string(),
                        ));
                    }
                    Incoming::PingResp => {}
                    other => {
                        debug!("Received other MQTT packet: {:?}", other);
                    }
                },
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("Disconnect sent to MQTT broker");
                    self.finished = true;
                    return Some(BrokerEvent::Disconnected("client disconnect".to_string()));
                }
                Ok(Event::Outgoing(_)) => {}
                Err(ConnectionError::ConnectionRefused(code)) => {
                    warn!("MQTT connection refused: {:?}", code);
                    self.finished = true;
                    return Some(BrokerEvent::ConnectionRefused(format!("{:?}", code)));
                }
                Err(e) => {
                    warn!("MQTT connection error: {}", e);
                    self.finished = true;
                    return Some(BrokerEvent::Disconnected(e.to_string()));
                }
            }
        }
    }
}
