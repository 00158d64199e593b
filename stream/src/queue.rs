use relayr_shared::InboundMessage;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Unbounded FIFO of messages received while no handler is registered.
///
/// There is no capacity limit: a caller that never drains keeps every
/// message in memory.
pub struct MessageQueue {
    sender: mpsc::UnboundedSender<InboundMessage>,
    receiver: Mutex<mpsc::UnboundedReceiver<InboundMessage>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    pub fn enqueue(&self, message: InboundMessage) {
        // 接收端由队列自己持有，发送不会失败
        let _ = self.sender.send(message);
    }

    /// Returns everything buffered so far in arrival order. Never blocks on
    /// new messages, an empty vector means nothing has arrived.
    pub fn drain_all(&self) -> Vec<InboundMessage> {
        let mut receiver = match self.receiver.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut messages = Vec::new();
        while let Ok(message) = receiver.try_recv() {
            messages.push(message);
        }
        messages
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}
