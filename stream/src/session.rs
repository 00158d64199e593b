use crate::broker::{BrokerClient, BrokerConnector, BrokerEvent, BrokerEvents};
use crate::dispatcher::{Dispatcher, MessageHandler};
use crate::events::SessionEvent;
use crate::provisioner::{ApiProvisioner, CredentialProvisioner};
use crate::registry::TopicRegistry;
use crate::rumqtt::RumqttConnector;
use relayr_shared::{
    BrokerConfig, ChannelCredentials, Device, InboundMessage, SdkConfig, StreamError,
    DEFAULT_TRANSPORT,
};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// stop() 之后等待 broker 确认断开的最长时间
const STOP_GRACE: Duration = Duration::from_secs(5);
const EVENT_CAPACITY: usize = 256;

// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

// 注册表和订阅调用共用一把锁
struct Shared {
    state: SessionState,
    registry: TopicRegistry,
    client: Option<Arc<dyn BrokerClient>>,
}

struct Worker {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// One broker connection streaming data for a set of devices.
///
/// `created --start()--> running --stop()--> stopped`. A stopped stream
/// cannot be restarted, build a new one instead.
pub struct MqttStream {
    session_id: String,
    transport: String,
    broker: BrokerConfig,
    credentials: ChannelCredentials,
    provisioner: Arc<dyn CredentialProvisioner>,
    connector: Arc<dyn BrokerConnector>,
    dispatcher: Dispatcher,
    shared: Arc<Mutex<Shared>>,
    worker: Mutex<Option<Worker>>,
    events: broadcast::Sender<SessionEvent>,
}

pub struct MqttStreamBuilder {
    provisioner: Arc<dyn CredentialProvisioner>,
    connector: Arc<dyn BrokerConnector>,
    devices: Vec<Device>,
    transport: String,
    handler: Option<MessageHandler>,
    broker: BrokerConfig,
}

impl MqttStreamBuilder {
    pub fn devices(mut self, devices: impl IntoIterator<Item = Device>) -> Self {
        self.devices.extend(devices);
        self
    }

    pub fn transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = transport.into();
        self
    }

    /// Messages are passed to `handler` instead of being queued.
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn broker(mut self, broker: BrokerConfig) -> Self {
        self.broker = broker;
        self
    }

    /// Requests credentials for every device, in order. The first failure
    /// aborts the build and names the device.
    pub async fn build(self) -> Result<MqttStream, StreamError> {
        if self.devices.is_empty() {
            return Err(StreamError::NoDevices);
        }

        let session_id = format!("stream-{}", uuid::Uuid::new_v4());
        let mut registry = TopicRegistry::new();
        let mut primary: Option<ChannelCredentials> = None;

        for device in &self.devices {
            let credentials = self
                .provisioner
                .provision(&device.id, &self.transport)
                .await?;
            debug!(
                "[{}] Device {} streams on topic {}",
                session_id, device.id, credentials.topic
            );
            registry.add(device.id.clone(), credentials.topic.clone());
            if primary.is_none() {
                primary = Some(credentials);
            }
        }

        let credentials = primary.ok_or(StreamError::NoDevices)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        info!(
            "[{}] Created MQTT stream for {} device(s)",
            session_id,
            registry.len()
        );

        Ok(MqttStream {
            session_id,
            transport: self.transport,
            broker: self.broker,
            credentials,
            provisioner: self.provisioner,
            connector: self.connector,
            dispatcher: Dispatcher::new(self.handler),
            shared: Arc::new(Mutex::new(Shared {
                state: SessionState::Created,
                registry,
                client: None,
            })),
            worker: Mutex::new(None),
            events,
        })
    }
}

impl MqttStream {
    pub fn builder(
        provisioner: Arc<dyn CredentialProvisioner>,
        connector: Arc<dyn BrokerConnector>,
    ) -> MqttStreamBuilder {
        MqttStreamBuilder {
            provisioner,
            connector,
            devices: Vec::new(),
            transport: DEFAULT_TRANSPORT.to_string(),
            handler: None,
            broker: BrokerConfig::default(),
        }
    }

    /// Builder wired to the relayr REST API and broker described by `config`.
    pub fn from_config(config: &SdkConfig, token: &str) -> Result<MqttStreamBuilder, StreamError> {
        let provisioner = Arc::new(ApiProvisioner::new(config, token)?);
        Ok(Self::builder(provisioner, Arc::new(RumqttConnector::new())).broker(config.broker()))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn state(&self) -> SessionState {
        self.shared.lock().await.state
    }

    pub async fn topics(&self) -> BTreeSet<String> {
        self.shared.lock().await.registry.all()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Buffered messages in arrival order. Always empty when a handler was
    /// given.
    pub fn drain_all(&self) -> Vec<InboundMessage> {
        match self.dispatcher.queue() {
            Some(queue) => queue.drain_all(),
            None => Vec::new(),
        }
    }

    /// Spawns the connection worker and returns without waiting for the
    /// broker. Connection progress is reported through [`Self::events`].
    pub async fn start(&self) -> Result<(), StreamError> {
        let mut shared = self.shared.lock().await;
        if shared.state != SessionState::Created {
            return Err(StreamError::InvalidState {
                operation: "start",
                state: shared.state.to_string(),
            });
        }

        let (client, broker_events) = self.connector.connect(&self.credentials, &self.broker)?;
        shared.client = Some(client.clone());
        shared.state = SessionState::Running;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let context = WorkerContext {
            session_id: self.session_id.clone(),
            shared: self.shared.clone(),
            client,
            dispatcher: self.dispatcher.clone(),
            events: self.events.clone(),
        };
        let handle = tokio::spawn(context.run(broker_events, shutdown_rx));

        *self.worker.lock().await = Some(Worker {
            shutdown: shutdown_tx,
            handle,
        });

        info!(
            "[{}] Started MQTT stream against {}",
            self.session_id,
            self.broker.address()
        );
        Ok(())
    }

    /// Unsubscribes every topic, disconnects and waits for the worker to
    /// exit. Unsubscribe and disconnect failures are only logged. Calling it
    /// again is a no-op.
    pub async fn stop(&self) -> Result<(), StreamError> {
        {
            let mut shared = self.shared.lock().await;
            let state = shared.state;
            match state {
                SessionState::Stopping | SessionState::Stopped => {
                    debug!("[{}] Stream already stopped", self.session_id);
                    return Ok(());
                }
                SessionState::Created => {
                    shared.state = SessionState::Stopped;
                    drop(shared);
                    info!("[{}] Stopped MQTT stream before start", self.session_id);
                    let _ = self.events.send(SessionEvent::Stopped);
                    return Ok(());
                }
                SessionState::Running => {}
            }

            shared.state = SessionState::Stopping;

            if let Some(client) = shared.client.as_ref() {
                for topic in shared.registry.all() {
                    if let Err(e) = client.unsubscribe(&topic) {
                        warn!("[{}] Unsubscribe from {} failed: {}", self.session_id, topic, e);
                    }
                }
                if let Err(e) = client.disconnect() {
                    warn!("[{}] Disconnect failed: {}", self.session_id, e);
                }
            }
        }

        if let Some(worker) = self.worker.lock().await.take() {
            let _ = worker.shutdown.send(());
            if let Err(e) = worker.handle.await {
                error!("[{}] Stream worker ended abnormally: {}", self.session_id, e);
            }
        }

        {
            let mut shared = self.shared.lock().await;
            shared.state = SessionState::Stopped;
            shared.client = None;
        }

        info!("[{}] Stopped MQTT stream", self.session_id);
        let _ = self.events.send(SessionEvent::Stopped);
        Ok(())
    }

    /// Requests credentials for `device` and starts listening to its topic.
    /// On failure the registry is left as it was.
    pub async fn add_device(&self, device: &Device) -> Result<(), StreamError> {
        let credentials = self
            .provisioner
            .provision(&device.id, &self.transport)
            .await?;
        let topic = credentials.topic;

        let mut shared = self.shared.lock().await;
        Self::ensure_mutable(shared.state, "add a device to")?;

        let previous = shared.registry.add(device.id.clone(), topic.clone());

        if shared.state == SessionState::Running {
            if let Some(client) = shared.client.clone() {
                if let Err(e) = client.subscribe(std::slice::from_ref(&topic)) {
                    match previous {
                        Some(previous) => {
                            shared.registry.add(device.id.clone(), previous);
                        }
                        None => {
                            shared.registry.remove(&device.id);
                        }
                    }
                    return Err(e);
                }

                if let Some(previous) = previous.filter(|previous| *previous != topic) {
                    if let Err(e) = client.unsubscribe(&previous) {
                        warn!(
                            "[{}] Unsubscribe from replaced topic {} failed: {}",
                            self.session_id, previous, e
                        );
                    }
                }
            }
        }

        info!("[{}] Added device {} on {}", self.session_id, device.id, topic);
        Ok(())
    }

    /// Stops listening to `device`. A device that is not registered is
    /// ignored.
    pub async fn remove_device(&self, device: &Device) -> Result<(), StreamError> {
        {
            let shared = self.shared.lock().await;
            Self::ensure_mutable(shared.state, "remove a device from")?;
            if !shared.registry.contains(&device.id) {
                debug!("[{}] Device {} is not registered", self.session_id, device.id);
                return Ok(());
            }
        }

        let credentials = self
            .provisioner
            .provision(&device.id, &self.transport)
            .await?;

        // 申请凭证期间会话可能已被 stop
        let mut shared = self.shared.lock().await;
        Self::ensure_mutable(shared.state, "remove a device from")?;
        let Some(topic) = shared.registry.remove(&device.id) else {
            return Ok(());
        };

        if credentials.topic != topic {
            debug!(
                "[{}] Platform now reports topic {} for device {}, dropping registered {}",
                self.session_id, credentials.topic, device.id, topic
            );
        }

        if shared.state == SessionState::Running {
            if let Some(client) = shared.client.as_ref() {
                if let Err(e) = client.unsubscribe(&topic) {
                    warn!("[{}] Unsubscribe from {} failed: {}", self.session_id, topic, e);
                }
            }
        }

        info!("[{}] Removed device {}", self.session_id, device.id);
        Ok(())
    }

    fn ensure_mutable(state: SessionState, operation: &'static str) -> Result<(), StreamError> {
        match state {
            SessionState::Created | SessionState::Running => Ok(()),
            SessionState::Stopping | SessionState::Stopped => Err(StreamError::InvalidState {
                operation,
                state: state.to_string(),
            }),
        }
    }
}

// 后台任务：独占连接，串行处理所有 broker 事件
struct WorkerContext {
    session_id: String,
    shared: Arc<Mutex<Shared>>,
    client: Arc<dyn BrokerClient>,
    dispatcher: Dispatcher,
    events: broadcast::Sender<SessionEvent>,
}

impl WorkerContext {
    async fn run(self, mut broker_events: Box<dyn BrokerEvents>, mut shutdown: oneshot::Receiver<()>) {
        debug!("[{}] Stream worker started", self.session_id);

        loop {
            let event = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    self.drain_after_stop(broker_events.as_mut()).await;
                    break;
                }
                event = broker_events.next_event() => event,
            };

            let Some(event) = event else {
                info!("[{}] Broker event stream ended", self.session_id);
                break;
            };

            match event {
                BrokerEvent::Connected => {
                    self.resubscribe().await;
                    let _ = self.events.send(SessionEvent::Connected);
                }
                BrokerEvent::Message(message) => self.dispatch(message),
                BrokerEvent::SubscribeAck(packet_id) => {
                    let _ = self
                        .events
                        .send(SessionEvent::SubscribeAcknowledged { packet_id });
                }
                BrokerEvent::UnsubscribeAck(packet_id) => {
                    let _ = self
                        .events
                        .send(SessionEvent::UnsubscribeAcknowledged { packet_id });
                }
                BrokerEvent::ConnectionRefused(reason) | BrokerEvent::Disconnected(reason) => {
                    // 不自动重连，由调用方决定是否重建会话
                    warn!("[{}] Connection lost: {}", self.session_id, reason);
                    let _ = self.events.send(SessionEvent::Disconnected { reason });
                    break;
                }
            }
        }

        debug!("[{}] Stream worker finished", self.session_id);
    }

    async fn resubscribe(&self) {
        let shared = self.shared.lock().await;
        if shared.state != SessionState::Running {
            return;
        }

        let topics: Vec<String> = shared.registry.all().into_iter().collect();
        if topics.is_empty() {
            return;
        }

        match self.client.subscribe(&topics) {
            Ok(()) => info!("[{}] Subscribed {} topic(s)", self.session_id, topics.len()),
            Err(e) => error!("[{}] Failed to subscribe topics: {}", self.session_id, e),
        }
    }

    fn dispatch(&self, message: InboundMessage) {
        if let Err(e) = self.dispatcher.dispatch(message) {
            error!("[{}] Dropping message: {}", self.session_id, e);
            if let StreamError::Decode { topic, source } = e {
                let _ = self.events.send(SessionEvent::DecodeFailed {
                    topic,
                    error: source.to_string(),
                });
            }
        }
    }

    // 等 broker 确认断开，期间到达的消息全部丢弃
    async fn drain_after_stop(&self, broker_events: &mut dyn BrokerEvents) {
        let drain = async {
            while let Some(event) = broker_events.next_event().await {
                match event {
                    BrokerEvent::Disconnected(_) | BrokerEvent::ConnectionRefused(_) => break,
                    BrokerEvent::Message(message) => {
                        debug!(
                            "[{}] Discarding late message on {}",
                            self.session_id, message.topic
                        );
                    }
                    _ => {}
                }
            }
        };

        if tokio::time::timeout(STOP_GRACE, drain).await.is_err() {
            warn!(
                "[{}] Broker did not confirm disconnect within {:?}",
                self.session_id, STOP_GRACE
            );
        }
    }
}
