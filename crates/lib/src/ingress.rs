//! Ingress relay decoding: turn relay form submissions into outbound requests.
//!
//! Pure functions over an already-collected `RelayForm`, so each endpoint shape can be
//! tested without an HTTP server. The HTTP handlers in `gateway` only collect the form,
//! call one of these, and submit the result to the outbound gateway.

use crate::channels::{FilePayload, MediaKind};
use crate::error::{parse_chat_id, RelayError};
use crate::outbound::{check_file, OutboundRequest};
use std::collections::HashMap;

/// Separator between recipient id and text inside a hex envelope.
pub const ENVELOPE_SEPARATOR: &str = "||";

/// Text fields and uploaded file parts of one relay request (query string and body merged).
#[derive(Debug, Clone, Default)]
pub struct RelayForm {
    fields: HashMap<String, String>,
    files: HashMap<String, FilePayload>,
}

impl RelayForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert_field(name, value);
        self
    }

    pub fn with_file(mut self, name: impl Into<String>, file: FilePayload) -> Self {
        self.insert_file(name, file);
        self
    }

    /// Set a text field; a later value for the same name replaces the earlier one.
    pub fn insert_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn insert_file(&mut self, name: impl Into<String>, file: FilePayload) {
        self.files.insert(name.into(), file);
    }

    /// Field value, or None when absent or empty.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn file(&self, name: &str) -> Option<&FilePayload> {
        self.files.get(name)
    }
}

/// Image / video / file endpoints: `chat_id` and a non-empty `file` part of at most
/// `max_upload_bytes` are required, `text` is optional.
pub fn decode_media(
    kind: MediaKind,
    form: &RelayForm,
    max_upload_bytes: usize,
) -> Result<OutboundRequest, RelayError> {
    let chat_id = parse_chat_id(form.field("chat_id").unwrap_or(""))?;
    let file = form
        .file("file")
        .ok_or_else(|| RelayError::payload("file", "no file part in request"))?;
    check_file(kind, file, max_upload_bytes)?;
    Ok(OutboundRequest::media(
        kind,
        chat_id,
        file.clone(),
        form.field("text").map(String::from),
    ))
}

/// Message endpoint: `chat_id` and `text` are both required.
pub fn decode_message(form: &RelayForm) -> Result<OutboundRequest, RelayError> {
    let raw = form
        .field("chat_id")
        .ok_or(RelayError::MissingField("chat_id"))?;
    let chat_id = parse_chat_id(raw)?;
    let text = form.field("text").ok_or(RelayError::MissingField("text"))?;
    Ok(OutboundRequest::text(chat_id, text))
}

/// Decode a hex envelope: the hex encoding of `<chat_id>||<text>`.
pub fn decode_envelope(hex_str: &str) -> Result<(i64, String), RelayError> {
    let bytes =
        hex::decode(hex_str.trim()).map_err(|e| RelayError::EncodingFailure(e.to_string()))?;
    let decoded = String::from_utf8(bytes)
        .map_err(|_| RelayError::EncodingFailure("envelope is not valid UTF-8".to_string()))?;
    let segments: Vec<&str> = decoded.split(ENVELOPE_SEPARATOR).collect();
    if segments.len() != 2 {
        return Err(RelayError::EncodingFailure(format!(
            "expected <chat_id>{}<text>, got {} segment(s)",
            ENVELOPE_SEPARATOR,
            segments.len()
        )));
    }
    let chat_id = parse_chat_id(segments[0])?;
    Ok((chat_id, segments[1].to_string()))
}

/// Hex endpoint: single `hex` field holding the envelope.
pub fn decode_hex(form: &RelayForm) -> Result<OutboundRequest, RelayError> {
    let raw = form.field("hex").ok_or(RelayError::MissingField("hex"))?;
    let (chat_id, text) = decode_envelope(raw)?;
    if text.is_empty() {
        return Err(RelayError::MissingField("text"));
    }
    Ok(OutboundRequest::text(chat_id, text))
}

/// What the legacy combined endpoint does with a request.
#[derive(Debug)]
pub enum LegacyAction {
    /// `bot` did not match: no send, default empty 200 response.
    Ignore,
    /// An upload part was present and decoded.
    Media(OutboundRequest),
    /// An upload part was present but the request was unusable; logged only.
    Rejected(RelayError),
    /// No upload part: same outcome as the message endpoint.
    Message(Result<OutboundRequest, RelayError>),
}

/// Upload parts the legacy endpoint looks for, highest priority first.
const LEGACY_PARTS: &[(&str, MediaKind)] = &[
    ("video", MediaKind::Video),
    ("image", MediaKind::Image),
    ("file", MediaKind::File),
];

/// Legacy combined endpoint: `chat_id`, `text`, `bot`, and optionally one upload part.
pub fn decode_legacy(form: &RelayForm, bot_name: &str, max_upload_bytes: usize) -> LegacyAction {
    if form.field("bot") != Some(bot_name) {
        return LegacyAction::Ignore;
    }
    let upload = LEGACY_PARTS
        .iter()
        .find_map(|(name, kind)| form.file(name).map(|f| (*kind, f)));
    let Some((kind, file)) = upload else {
        return LegacyAction::Message(decode_message(form));
    };
    let checked = parse_chat_id(form.field("chat_id").unwrap_or(""))
        .and_then(|chat_id| check_file(kind, file, max_upload_bytes).map(|_| chat_id));
    match checked {
        Ok(chat_id) => LegacyAction::Media(OutboundRequest::media(
            kind,
            chat_id,
            file.clone(),
            form.field("text").map(String::from),
        )),
        Err(e) => LegacyAction::Rejected(e),
    }
}
