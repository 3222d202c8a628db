//! Reply keyboard attached to every dispatcher reply.

use serde_json::json;

/// Fixed button menu, built once at startup and shared read-only by all replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyKeyboard {
    rows: Vec<Vec<String>>,
}

impl ReplyKeyboard {
    /// Single row holding the given button labels.
    pub fn single_row<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rows: vec![labels.into_iter().map(Into::into).collect()],
        }
    }

    /// Bot API `reply_markup` object (ReplyKeyboardMarkup).
    pub fn to_markup(&self) -> serde_json::Value {
        let keyboard: Vec<Vec<serde_json::Value>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(|label| json!({ "text": label })).collect())
            .collect();
        json!({ "keyboard": keyboard, "resize_keyboard": true })
    }
}
