//! Messaging-network transport seam: the primitive sends the outbound gateway drives.

use crate::channels::keyboard::ReplyKeyboard;
use async_trait::async_trait;
use axum::body::Bytes;

/// Message id assigned by the network to a delivered message.
pub type DeliveryHandle = i64;

/// Kind of binary payload; decides which send primitive is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    File,
}

impl MediaKind {
    pub fn name(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::File => "file",
        }
    }
}

/// Uploaded file: original name and fully buffered contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePayload {
    pub name: String,
    pub bytes: Bytes,
}

impl FilePayload {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Account connection to the messaging network. Only the outbound gateway calls these.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a text message, optionally with a reply keyboard.
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&ReplyKeyboard>,
    ) -> Result<DeliveryHandle, String>;

    /// Upload and send a photo, video or document.
    async fn send_media(
        &self,
        chat_id: i64,
        kind: MediaKind,
        file: &FilePayload,
    ) -> Result<DeliveryHandle, String>;
}
