//! Outbound gateway: the single serialization point for every send to the messaging network.
//!
//! Callers (dispatcher replies, admin fan-out, HTTP relay) hold cheap clones of
//! `OutboundGateway`; each `send` is queued to one worker task that owns the transport
//! and performs deliveries one at a time. The worker exits once every handle is dropped.

use crate::channels::{DeliveryHandle, FilePayload, MediaKind, ReplyKeyboard, Transport};
use crate::error::RelayError;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const QUEUE_CAPACITY: usize = 64;

/// One instruction to deliver something to a recipient.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundRequest {
    Text {
        chat_id: i64,
        text: String,
        keyboard: Option<Arc<ReplyKeyboard>>,
    },
    /// Image, video or generic file; a non-empty caption is sent as a separate text afterwards.
    Media {
        kind: MediaKind,
        chat_id: i64,
        file: FilePayload,
        caption: Option<String>,
    },
}

impl OutboundRequest {
    pub fn text(chat_id: i64, text: impl Into<String>) -> Self {
        Self::Text {
            chat_id,
            text: text.into(),
            keyboard: None,
        }
    }

    pub fn reply(chat_id: i64, text: impl Into<String>, keyboard: Arc<ReplyKeyboard>) -> Self {
        Self::Text {
            chat_id,
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }

    pub fn media(kind: MediaKind, chat_id: i64, file: FilePayload, caption: Option<String>) -> Self {
        Self::Media {
            kind,
            chat_id,
            file,
            caption: caption.filter(|c| !c.is_empty()),
        }
    }

    pub fn chat_id(&self) -> i64 {
        match self {
            Self::Text { chat_id, .. } | Self::Media { chat_id, .. } => *chat_id,
        }
    }

    /// Short label for logs ("text", "image", ...).
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Media { kind, .. } => kind.name(),
        }
    }
}

/// Outcome of one `send`: the primary delivery and, for media with a caption, the caption text.
#[derive(Debug)]
pub struct DeliveryReport {
    pub primary: Result<DeliveryHandle, RelayError>,
    pub caption: Option<Result<DeliveryHandle, RelayError>>,
}

impl DeliveryReport {
    fn failed(err: RelayError) -> Self {
        Self {
            primary: Err(err),
            caption: None,
        }
    }

    /// True when the primary delivery and the caption (if any) both succeeded.
    pub fn is_ok(&self) -> bool {
        self.primary.is_ok() && self.caption.as_ref().map_or(true, |c| c.is_ok())
    }

    /// Log every failed part at warn level. Returns true when nothing failed.
    pub fn log_failures(&self, context: &str, chat_id: i64) -> bool {
        if let Err(e) = &self.primary {
            log::warn!("{}: send to {} failed: {}", context, chat_id, e);
        }
        if let Some(Err(e)) = &self.caption {
            log::warn!("{}: caption to {} failed: {}", context, chat_id, e);
        }
        self.is_ok()
    }
}

struct Job {
    request: OutboundRequest,
    reply: oneshot::Sender<DeliveryReport>,
}

/// Handle to the gateway worker. Clone freely; all clones feed the same worker.
#[derive(Clone)]
pub struct OutboundGateway {
    tx: mpsc::Sender<Job>,
}

impl OutboundGateway {
    /// Start the worker that owns `transport`. Await the returned handle after dropping every
    /// gateway clone to know the connection has been released.
    pub fn spawn(transport: Arc<dyn Transport>, max_upload_bytes: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(QUEUE_CAPACITY);
        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let report = deliver(transport.as_ref(), job.request, max_upload_bytes).await;
                let _ = job.reply.send(report);
            }
            log::debug!("outbound gateway: all handles dropped, worker stopped");
        });
        (Self { tx }, handle)
    }

    /// Queue a request and wait for its delivery attempt to finish.
    pub async fn send(&self, request: OutboundRequest) -> DeliveryReport {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Job { request, reply }).await.is_err() {
            return DeliveryReport::failed(RelayError::GatewayClosed);
        }
        rx.await
            .unwrap_or_else(|_| DeliveryReport::failed(RelayError::GatewayClosed))
    }
}

fn check_recipient(chat_id: i64) -> Result<(), RelayError> {
    if chat_id == 0 {
        return Err(RelayError::malformed_id("0", "chat id must be non-zero"));
    }
    Ok(())
}

/// Empty and oversized uploads are refused. Relay decoding runs this too, so callers get a 400.
pub(crate) fn check_file(kind: MediaKind, file: &FilePayload, max_upload_bytes: usize) -> Result<(), RelayError> {
    if file.size() == 0 {
        return Err(RelayError::payload(kind.name(), "empty upload"));
    }
    if file.size() > max_upload_bytes {
        return Err(RelayError::payload(
            kind.name(),
            format!("{} bytes exceeds limit of {}", file.size(), max_upload_bytes),
        ));
    }
    Ok(())
}

async fn send_text(
    transport: &dyn Transport,
    chat_id: i64,
    text: &str,
    keyboard: Option<&ReplyKeyboard>,
) -> Result<DeliveryHandle, RelayError> {
    check_recipient(chat_id)?;
    if text.is_empty() {
        return Err(RelayError::MissingField("text"));
    }
    transport
        .send_text(chat_id, text, keyboard)
        .await
        .map_err(RelayError::DeliveryFailure)
}

/// Perform one request against the transport. The caption of a media request is attempted
/// even when the payload fails, and vice versa.
async fn deliver(
    transport: &dyn Transport,
    request: OutboundRequest,
    max_upload_bytes: usize,
) -> DeliveryReport {
    match request {
        OutboundRequest::Text {
            chat_id,
            text,
            keyboard,
        } => DeliveryReport {
            primary: send_text(transport, chat_id, &text, keyboard.as_deref()).await,
            caption: None,
        },
        OutboundRequest::Media {
            kind,
            chat_id,
            file,
            caption,
        } => {
            let primary = match check_recipient(chat_id)
                .and_then(|_| check_file(kind, &file, max_upload_bytes))
            {
                Ok(()) => transport
                    .send_media(chat_id, kind, &file)
                    .await
                    .map_err(RelayError::DeliveryFailure),
                Err(e) => Err(e),
            };
            let caption = match caption.filter(|c| !c.is_empty()) {
                Some(text) => Some(send_text(transport, chat_id, &text, None).await),
                None => None,
            };
            DeliveryReport { primary, caption }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording transport shared by gateway, dispatcher and relay tests.

    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// One primitive call seen by the recording transport.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Sent {
        Text {
            chat_id: i64,
            text: String,
            keyboard: bool,
        },
        Media {
            kind: MediaKind,
            chat_id: i64,
            name: String,
            size: usize,
        },
    }

    /// Records every call; fails sends addressed to chat ids in `failing`.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<Sent>>,
        pub failing: HashSet<i64>,
    }

    impl RecordingTransport {
        pub fn failing_for(ids: &[i64]) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                failing: ids.iter().copied().collect(),
            }
        }

        pub fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn record(&self, chat_id: i64, sent: Sent) -> Result<DeliveryHandle, String> {
            let mut g = self.sent.lock().unwrap();
            g.push(sent);
            if self.failing.contains(&chat_id) {
                return Err(format!("chat {} unreachable", chat_id));
            }
            Ok(g.len() as DeliveryHandle)
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_text(
            &self,
            chat_id: i64,
            text: &str,
            keyboard: Option<&ReplyKeyboard>,
        ) -> Result<DeliveryHandle, String> {
            self.record(
                chat_id,
                Sent::Text {
                    chat_id,
                    text: text.to_string(),
                    keyboard: keyboard.is_some(),
                },
            )
        }

        async fn send_media(
            &self,
            chat_id: i64,
            kind: MediaKind,
            file: &FilePayload,
        ) -> Result<DeliveryHandle, String> {
            self.record(
                chat_id,
                Sent::Media {
                    kind,
                    chat_id,
                    name: file.name.clone(),
                    size: file.size(),
                },
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{RecordingTransport, Sent};
    use super::*;

    const LIMIT: usize = 1024;

    fn image(caption: Option<&str>) -> OutboundRequest {
        OutboundRequest::media(
            MediaKind::Image,
            42,
            FilePayload::new("cam.jpg", vec![1u8, 2, 3]),
            caption.map(String::from),
        )
    }

    #[tokio::test]
    async fn media_with_caption_sends_payload_then_text() {
        let transport = Arc::new(RecordingTransport::default());
        let (gateway, _worker) = OutboundGateway::spawn(transport.clone(), LIMIT);
        let report = gateway.send(image(Some("hi"))).await;
        assert!(report.is_ok());
        assert_eq!(
            transport.sent(),
            vec![
                Sent::Media {
                    kind: MediaKind::Image,
                    chat_id: 42,
                    name: "cam.jpg".into(),
                    size: 3
                },
                Sent::Text {
                    chat_id: 42,
                    text: "hi".into(),
                    keyboard: false
                },
            ]
        );
    }

    #[tokio::test]
    async fn empty_caption_is_not_sent() {
        let transport = Arc::new(RecordingTransport::default());
        let (gateway, _worker) = OutboundGateway::spawn(transport.clone(), LIMIT);
        let report = gateway.send(image(Some(""))).await;
        assert!(report.caption.is_none());
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn caption_is_attempted_when_payload_is_rejected() {
        let transport = Arc::new(RecordingTransport::default());
        let (gateway, _worker) = OutboundGateway::spawn(transport.clone(), 2);
        let report = gateway.send(image(Some("still here"))).await;
        assert!(matches!(
            report.primary,
            Err(RelayError::PayloadReadFailure { .. })
        ));
        assert!(matches!(report.caption, Some(Ok(_))));
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn transport_error_becomes_delivery_failure() {
        let transport = Arc::new(RecordingTransport::failing_for(&[42]));
        let (gateway, _worker) = OutboundGateway::spawn(transport.clone(), LIMIT);
        let report = gateway.send(OutboundRequest::text(42, "x")).await;
        assert!(matches!(report.primary, Err(RelayError::DeliveryFailure(_))));
        assert!(!report.log_failures("test", 42));
    }

    #[tokio::test]
    async fn zero_recipient_and_empty_text_never_reach_transport() {
        let transport = Arc::new(RecordingTransport::default());
        let (gateway, _worker) = OutboundGateway::spawn(transport.clone(), LIMIT);
        let report = gateway.send(OutboundRequest::text(0, "x")).await;
        assert!(matches!(
            report.primary,
            Err(RelayError::MalformedIdentifier { .. })
        ));
        let report = gateway.send(OutboundRequest::text(5, "")).await;
        assert!(matches!(report.primary, Err(RelayError::MissingField("text"))));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn concurrent_senders_are_all_delivered() {
        let transport = Arc::new(RecordingTransport::default());
        let (gateway, worker) = OutboundGateway::spawn(transport.clone(), LIMIT);
        let mut tasks = Vec::new();
        for i in 1..=20 {
            let g = gateway.clone();
            tasks.push(tokio::spawn(async move {
                g.send(OutboundRequest::text(i, format!("m{}", i))).await
            }));
        }
        for t in tasks {
            assert!(t.await.unwrap().is_ok());
        }
        drop(gateway);
        worker.await.unwrap();
        assert_eq!(transport.sent().len(), 20);
    }

    /// Counts overlapping calls; each call holds the transport for a few milliseconds.
    #[derive(Default)]
    struct InFlightTransport {
        active: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
        log: std::sync::Mutex<Vec<(i64, &'static str)>>,
    }

    impl InFlightTransport {
        async fn hold(&self, chat_id: i64, what: &'static str) -> Result<DeliveryHandle, String> {
            use std::sync::atomic::Ordering;
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(3)).await;
            self.log.lock().unwrap().push((chat_id, what));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(chat_id)
        }
    }

    #[async_trait::async_trait]
    impl Transport for InFlightTransport {
        async fn send_text(
            &self,
            chat_id: i64,
            _text: &str,
            _keyboard: Option<&ReplyKeyboard>,
        ) -> Result<DeliveryHandle, String> {
            self.hold(chat_id, "text").await
        }

        async fn send_media(
            &self,
            chat_id: i64,
            _kind: MediaKind,
            _file: &FilePayload,
        ) -> Result<DeliveryHandle, String> {
            self.hold(chat_id, "media").await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn transport_is_used_by_one_send_at_a_time() {
        let transport = Arc::new(InFlightTransport::default());
        let (gateway, worker) = OutboundGateway::spawn(transport.clone(), LIMIT);
        let mut tasks = Vec::new();
        for i in 1..=16i64 {
            let g = gateway.clone();
            tasks.push(tokio::spawn(async move {
                let request = if i % 2 == 0 {
                    OutboundRequest::media(
                        MediaKind::Video,
                        i,
                        FilePayload::new("clip.mp4", vec![1u8]),
                        Some(format!("caption {}", i)),
                    )
                } else {
                    OutboundRequest::text(i, format!("m{}", i))
                };
                g.send(request).await
            }));
        }
        for t in tasks {
            assert!(t.await.unwrap().is_ok());
        }
        drop(gateway);
        worker.await.unwrap();

        use std::sync::atomic::Ordering;
        assert_eq!(transport.peak.load(Ordering::SeqCst), 1);
        let log = transport.log.lock().unwrap().clone();
        assert_eq!(log.len(), 8 + 8 * 2);
        // Every media payload is followed directly by its own caption.
        for (idx, (chat_id, what)) in log.iter().enumerate() {
            if *what == "media" {
                assert_eq!(log.get(idx + 1), Some(&(*chat_id, "text")), "{:?}", log);
            }
        }
    }

    #[tokio::test]
    async fn send_after_worker_stopped_reports_closed() {
        let transport = Arc::new(RecordingTransport::default());
        let (gateway, worker) = OutboundGateway::spawn(transport, LIMIT);
        worker.abort();
        let _ = worker.await;
        let report = gateway.send(OutboundRequest::text(1, "x")).await;
        assert!(matches!(report.primary, Err(RelayError::GatewayClosed)));
    }
}
