// 会话生命周期事件，通过 broadcast 通道对外发布
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Disconnected { reason: String },
    SubscribeAcknowledged { packet_id: u16 },
    UnsubscribeAcknowledged { packet_id: u16 },
    DecodeFailed { topic: String, error: String },
    Stopped,
}
