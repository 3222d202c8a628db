//! Inbound dispatcher: answers chat commands, one event at a time in arrival order.

use crate::channels::{InboundEvent, ReplyKeyboard};
use crate::commands::Command;
use crate::outbound::{OutboundGateway, OutboundRequest};
use crate::templates::{AdminRoster, ReplyTemplates};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What happened for one handled event (used by logs and tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub command: Command,
    /// Admin notifications attempted / failed (only for `Start`).
    pub admins_notified: usize,
    pub admins_failed: usize,
    pub reply_delivered: bool,
}

/// Single consumer of the inbound event queue.
pub struct Dispatcher {
    gateway: OutboundGateway,
    templates: Arc<ReplyTemplates>,
    roster: Arc<AdminRoster>,
    keyboard: Arc<ReplyKeyboard>,
}

impl Dispatcher {
    pub fn new(
        gateway: OutboundGateway,
        templates: Arc<ReplyTemplates>,
        roster: Arc<AdminRoster>,
        keyboard: Arc<ReplyKeyboard>,
    ) -> Self {
        Self {
            gateway,
            templates,
            roster,
            keyboard,
        }
    }

    /// Run until the inbound queue is closed. Await the handle to drain in-flight work on shutdown.
    pub fn spawn(self, inbound_rx: mpsc::Receiver<InboundEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(inbound_rx))
    }

    pub async fn run(self, mut inbound_rx: mpsc::Receiver<InboundEvent>) {
        log::info!("dispatcher: waiting for inbound events");
        while let Some(event) = inbound_rx.recv().await {
            self.handle_event(event).await;
        }
        log::info!("dispatcher: inbound queue closed, stopped");
    }

    /// Classify one event, notify admins on /start, and reply to the sender.
    /// Events without text are ignored. Delivery failures are logged, never retried.
    pub async fn handle_event(&self, event: InboundEvent) -> Option<DispatchOutcome> {
        if event.text.is_empty() {
            return None;
        }
        let command = Command::classify(&event.text);
        log::info!(
            "inbound id: {} [{}] {:?} -> {}",
            event.sender_id,
            event.sender_name,
            event.text,
            command.name()
        );

        let mut outcome = DispatchOutcome {
            command,
            admins_notified: 0,
            admins_failed: 0,
            reply_delivered: false,
        };

        if command == Command::Start {
            let notice = self.templates.admin_notice(event.sender_id);
            for &admin in self.roster.ids() {
                let report = self
                    .gateway
                    .send(OutboundRequest::text(admin, notice.clone()))
                    .await;
                outcome.admins_notified += 1;
                if !report.log_failures("dispatcher admin notice", admin) {
                    outcome.admins_failed += 1;
                }
            }
        }

        let reply = self.templates.reply_for(command, event.sender_id);
        let report = self
            .gateway
            .send(OutboundRequest::reply(event.sender_id, reply, self.keyboard.clone()))
            .await;
        outcome.reply_delivered = report.log_failures("dispatcher reply", event.sender_id);
        log::debug!("dispatcher: {} handled for {}", command.name(), event.sender_id);
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::testing::{RecordingTransport, Sent};

    fn templates() -> Arc<ReplyTemplates> {
        Arc::new(ReplyTemplates {
            help: "help".into(),
            start: "welcome".into(),
            start_admin: "new user. ID:".into(),
            your_id: "Your ID:".into(),
            error: "unknown".into(),
            integration: "integration".into(),
        })
    }

    fn dispatcher(transport: Arc<RecordingTransport>) -> Dispatcher {
        let (gateway, _worker) = OutboundGateway::spawn(transport, 1024);
        Dispatcher::new(
            gateway,
            templates(),
            Arc::new(AdminRoster::new(vec![100, 200]).unwrap()),
            Arc::new(ReplyKeyboard::single_row(["Мой ID", "Помощь", "Интеграция"])),
        )
    }

    #[tokio::test]
    async fn start_notifies_every_admin_before_replying() {
        let transport = Arc::new(RecordingTransport::default());
        let d = dispatcher(transport.clone());
        let outcome = d
            .handle_event(InboundEvent::new(7, "ann", "/Start"))
            .await
            .unwrap();
        assert_eq!(outcome.command, Command::Start);
        assert_eq!(outcome.admins_notified, 2);
        assert_eq!(
            transport.sent(),
            vec![
                Sent::Text {
                    chat_id: 100,
                    text: "new user. ID: 7".into(),
                    keyboard: false
                },
                Sent::Text {
                    chat_id: 200,
                    text: "new user. ID: 7".into(),
                    keyboard: false
                },
                Sent::Text {
                    chat_id: 7,
                    text: "welcome".into(),
                    keyboard: true
                },
            ]
        );
    }

    #[tokio::test]
    async fn failed_admin_does_not_block_others_or_reply() {
        let transport = Arc::new(RecordingTransport::failing_for(&[100]));
        let d = dispatcher(transport.clone());
        let outcome = d
            .handle_event(InboundEvent::new(7, "ann", "/start"))
            .await
            .unwrap();
        assert_eq!(outcome.admins_notified, 2);
        assert_eq!(outcome.admins_failed, 1);
        assert!(outcome.reply_delivered);
        assert_eq!(transport.sent().len(), 3);
    }

    #[tokio::test]
    async fn your_id_reply_contains_sender_id() {
        let transport = Arc::new(RecordingTransport::default());
        let d = dispatcher(transport.clone());
        d.handle_event(InboundEvent::new(55, "bo", "Мой ID")).await;
        assert_eq!(
            transport.sent(),
            vec![Sent::Text {
                chat_id: 55,
                text: "Your ID: 55".into(),
                keyboard: true
            }]
        );
    }

    #[tokio::test]
    async fn unknown_text_gets_error_template() {
        let transport = Arc::new(RecordingTransport::default());
        let d = dispatcher(transport.clone());
        let outcome = d
            .handle_event(InboundEvent::new(9, "", "what?"))
            .await
            .unwrap();
        assert_eq!(outcome.command, Command::Unknown);
        assert_eq!(outcome.admins_notified, 0);
        assert!(matches!(&transport.sent()[0], Sent::Text { text, .. } if text == "unknown"));
    }

    #[tokio::test]
    async fn empty_text_is_ignored() {
        let transport = Arc::new(RecordingTransport::default());
        let d = dispatcher(transport.clone());
        assert!(d.handle_event(InboundEvent::new(9, "", "")).await.is_none());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn run_drains_queue_in_order_then_stops() {
        let transport = Arc::new(RecordingTransport::default());
        let d = dispatcher(transport.clone());
        let (tx, rx) = mpsc::channel(8);
        let handle = d.spawn(rx);
        tx.send(InboundEvent::new(1, "", "help")).await.unwrap();
        tx.send(InboundEvent::new(2, "", "")).await.unwrap();
        tx.send(InboundEvent::new(3, "", "/integration")).await.unwrap();
        drop(tx);
        handle.await.unwrap();
        let recipients: Vec<i64> = transport
            .sent()
            .iter()
            .map(|s| match s {
                Sent::Text { chat_id, .. } | Sent::Media { chat_id, .. } => *chat_id,
            })
            .collect();
        assert_eq!(recipients, vec![1, 3]);
    }
}
