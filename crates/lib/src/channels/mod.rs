//! Messaging-network channel (Telegram).
//!
//! The transport trait is the only way outbound messages reach the network; inbound
//! updates arrive either from the getUpdates loop or the webhook route and are queued
//! for the dispatcher as `InboundEvent`s.

mod inbound;
mod keyboard;
mod telegram;
mod transport;

pub use inbound::InboundEvent;
pub use keyboard::ReplyKeyboard;
pub use telegram::{TelegramChannel, TelegramUpdate, WebhookInfo};
pub use transport::{DeliveryHandle, FilePayload, MediaKind, Transport};
