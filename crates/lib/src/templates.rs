//! Reply templates and the administrator roster, fixed at startup.

use crate::commands::Command;
use crate::config::{Config, TextConfig};

/// Named reply texts. Immutable after construction; shared without locking.
#[derive(Debug, Clone, Default)]
pub struct ReplyTemplates {
    pub help: String,
    pub start: String,
    pub start_admin: String,
    pub your_id: String,
    pub error: String,
    pub integration: String,
}

impl From<&TextConfig> for ReplyTemplates {
    fn from(t: &TextConfig) -> Self {
        Self {
            help: t.help.clone(),
            start: t.start.clone(),
            start_admin: t.start_admin.clone(),
            your_id: t.you_id.clone(),
            error: t.error.clone(),
            integration: t.integration.clone(),
        }
    }
}

impl ReplyTemplates {
    /// Reply sent back to the sender of `command`.
    pub fn reply_for(&self, command: Command, sender_id: i64) -> String {
        match command {
            Command::YourId => format!("{} {}", self.your_id, sender_id),
            Command::Start => self.start.clone(),
            Command::Integration => self.integration.clone(),
            Command::Help => self.help.clone(),
            Command::Unknown => self.error.clone(),
        }
    }

    /// Notification sent to each administrator when `sender_id` starts a conversation.
    pub fn admin_notice(&self, sender_id: i64) -> String {
        format!("{} {}", self.start_admin, sender_id)
    }
}

/// Chat ids notified on every /start. Non-empty, iterated in configured order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminRoster(Vec<i64>);

impl AdminRoster {
    /// Returns None for an empty roster.
    pub fn new(ids: Vec<i64>) -> Option<Self> {
        if ids.is_empty() {
            None
        } else {
            Some(Self(ids))
        }
    }

    pub fn from_config(config: &Config) -> Option<Self> {
        Self::new(config.admins.clone())
    }

    pub fn ids(&self) -> &[i64] {
        &self.0
    }
}
