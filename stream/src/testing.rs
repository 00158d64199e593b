// 测试用的内存 broker 和凭证服务
use crate::broker::{BrokerClient, BrokerConnector, BrokerEvent, BrokerEvents};
use crate::events::SessionEvent;
use crate::provisioner::CredentialProvisioner;
use async_trait::async_trait;
use relayr_shared::{BrokerConfig, ChannelCredentials, InboundMessage, ProvisioningError, StreamError};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Semaphore};

const WAIT_LIMIT: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {:?}", WAIT_LIMIT);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_event(
    events: &mut broadcast::Receiver<SessionEvent>,
    wanted: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    let search = async {
        loop {
            match events.recv().await {
                Ok(event) if wanted(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };

    match tokio::time::timeout(WAIT_LIMIT, search).await {
        Ok(event) => event,
        Err(_) => panic!("expected event not seen within {:?}", WAIT_LIMIT),
    }
}

pub struct ScriptedProvisioner {
    topics: Mutex<HashMap<String, String>>,
    failing: Mutex<HashSet<String>>,
    grants: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
    waiting: AtomicUsize,
}

impl ScriptedProvisioner {
    pub fn new(topics: &[(&str, &str)]) -> Self {
        Self {
            topics: Mutex::new(
                topics
                    .iter()
                    .map(|(device, topic)| (device.to_string(), topic.to_string()))
                    .collect(),
            ),
            failing: Mutex::new(HashSet::new()),
            grants: AtomicUsize::new(0),
            gate: Mutex::new(None),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Platform hands out a different topic for this device from now on.
    pub fn set_topic(&self, device_id: &str, topic: &str) {
        self.topics
            .lock()
            .unwrap()
            .insert(device_id.to_string(), topic.to_string());
    }

    /// Requests block until `release` is called.
    pub fn hold(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            // 关闭后所有等待者立即返回
            gate.close();
        }
    }

    /// Requests currently blocked by `hold`.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn fail_for(&self, device_id: &str) {
        self.failing.lock().unwrap().insert(device_id.to_string());
    }

    pub fn grants(&self) -> usize {
        self.grants.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvisioner for ScriptedProvisioner {
    async fn provision(
        &self,
        device_id: &str,
        transport: &str,
    ) -> Result<ChannelCredentials, ProvisioningError> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            let _ = gate.acquire().await;
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }

        if self.failing.lock().unwrap().contains(device_id) {
            return Err(ProvisioningError::new(device_id, "403 Forbidden"));
        }

        let topic = self
            .topics
            .lock()
            .unwrap()
            .get(device_id)
            .cloned()
            .ok_or_else(|| ProvisioningError::new(device_id, "404 Not Found"))?;

        self.grants.fetch_add(1, Ordering::SeqCst);
        Ok(ChannelCredentials {
            transport: transport.to_string(),
            client_id: format!("client-{}", device_id),
            username: format!("user-{}", device_id),
            password: "pw".to_string(),
            topic,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Subscribe(Vec<String>),
    Unsubscribe(String),
    Disconnect,
}

#[derive(Default)]
struct BrokerLog {
    calls: Mutex<Vec<Call>>,
    subscribed: Mutex<BTreeSet<String>>,
    connected_with: Mutex<Option<ChannelCredentials>>,
    connections: AtomicUsize,
    fail_subscribes: AtomicBool,
}

/// In-memory broker: records what the session asks for and lets the test
/// inject broker events.
pub struct ScriptedBroker {
    log: Arc<BrokerLog>,
    sender: mpsc::UnboundedSender<BrokerEvent>,
    receiver: Arc<Mutex<Option<mpsc::UnboundedReceiver<BrokerEvent>>>>,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            log: Arc::new(BrokerLog::default()),
            sender,
            receiver: Arc::new(Mutex::new(Some(receiver))),
        }
    }

    pub fn connector(&self) -> Arc<dyn BrokerConnector> {
        Arc::new(ScriptedConnector {
            log: self.log.clone(),
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
        })
    }

    pub fn push(&self, event: BrokerEvent) {
        let _ = self.sender.send(event);
    }

    pub fn push_message(&self, topic: &str, payload: &[u8]) {
        self.push(BrokerEvent::Message(InboundMessage::new(topic, payload.to_vec())));
    }

    pub fn fail_subscribes(&self, fail: bool) {
        self.log.fail_subscribes.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.calls.lock().unwrap().clone()
    }

    pub fn subscribed(&self) -> BTreeSet<String> {
        self.log.subscribed.lock().unwrap().clone()
    }

    pub fn connected_with(&self) -> Option<ChannelCredentials> {
        self.log.connected_with.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.log.connections.load(Ordering::SeqCst)
    }
}

struct ScriptedConnector {
    log: Arc<BrokerLog>,
    sender: mpsc::UnboundedSender<BrokerEvent>,
    receiver: Arc<Mutex<Option<mpsc::UnboundedReceiver<BrokerEvent>>>>,
}

impl BrokerConnector for ScriptedConnector {
    fn connect(
        &self,
        credentials: &ChannelCredentials,
        _broker: &BrokerConfig,
    ) -> Result<(Arc<dyn BrokerClient>, Box<dyn BrokerEvents>), StreamError> {
        let receiver = self
            .receiver
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| StreamError::Connection("scripted broker already connected".to_string()))?;

        self.log.connections.fetch_add(1, Ordering::SeqCst);
        *self.log.connected_with.lock().unwrap() = Some(credentials.clone());

        Ok((
            Arc::new(ScriptedClient {
                log: self.log.clone(),
                sender: self.sender.clone(),
            }),
            Box::new(ScriptedEvents { receiver }),
        ))
    }
}

struct ScriptedClient {
    log: Arc<BrokerLog>,
    sender: mpsc::UnboundedSender<BrokerEvent>,
}

impl BrokerClient for ScriptedClient {
    fn subscribe(&self, topics: &[String]) -> Result<(), StreamError> {
        if self.log.fail_subscribes.load(Ordering::SeqCst) {
            return Err(StreamError::Connection("request queue full".to_string()));
        }

        self.log
            .calls
            .lock()
            .unwrap()
            .push(Call::Subscribe(topics.to_vec()));
        self.log
            .subscribed
            .lock()
            .unwrap()
            .extend(topics.iter().cloned());
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), StreamError> {
        self.log
            .calls
            .lock()
            .unwrap()
            .push(Call::Unsubscribe(topic.to_string()));
        self.log.subscribed.lock().unwrap().remove(topic);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), StreamError> {
        self.log.calls.lock().unwrap().push(Call::Disconnect);
        // 和真实 broker 一样，断开后事件流上会出现 Disconnected
        let _ = self
            .sender
            .send(BrokerEvent::Disconnected("client disconnect".to_string()));
        Ok(())
    }
}

struct ScriptedEvents {
    receiver: mpsc::UnboundedReceiver<BrokerEvent>,
}

#[async_trait]
impl BrokerEvents for ScriptedEvents {
    async fn next_event(&mut self) -> Option<BrokerEvent> {
        self.receiver.recv().await
    }
}
