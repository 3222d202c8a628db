//! Inbound event from the messaging network: delivered to the dispatcher in arrival order.

/// One incoming chat message. `text` is empty for updates without text (photos, stickers, joins).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub sender_id: i64,
    pub sender_name: String,
    pub text: String,
}

impl InboundEvent {
    pub fn new(sender_id: i64, sender_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender_id,
            sender_name: sender_name.into(),
            text: text.into(),
        }
    }
}
