use crate::queue::MessageQueue;
use relayr_shared::{InboundMessage, StreamError};
use std::sync::Arc;

/// Callback receiving `(topic, payload)` with the payload decoded as UTF-8.
pub type MessageHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Routes every inbound message exactly once, either to the handler or to
/// the queue.
#[derive(Clone)]
pub enum Dispatcher {
    Handler(MessageHandler),
    Queue(Arc<MessageQueue>),
}

impl Dispatcher {
    pub fn new(handler: Option<MessageHandler>) -> Self {
        match handler {
            Some(handler) => Dispatcher::Handler(handler),
            None => Dispatcher::Queue(Arc::new(MessageQueue::new())),
        }
    }

    /// Runs the handler inline. A payload that is not valid UTF-8 is dropped
    /// and reported as [`StreamError::Decode`]; queued messages keep their
    /// raw bytes.
    pub fn dispatch(&self, message: InboundMessage) -> Result<(), StreamError> {
        match self {
            Dispatcher::Handler(handler) => {
                let (topic, text) = message.into_text()?;
                handler(&topic, &text);
                Ok(())
            }
            Dispatcher::Queue(queue) => {
                queue.enqueue(message);
                Ok(())
            }
        }
    }

    pub fn queue(&self) -> Option<&Arc<MessageQueue>> {
        match self {
            Dispatcher::Queue(queue) => Some(queue),
            Dispatcher::Handler(_) => None,
        }
    }
}
