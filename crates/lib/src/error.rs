//! Relay error taxonomy shared by the ingress decoder, the outbound gateway and the dispatcher.

use axum::http::StatusCode;

/// Errors produced while decoding relay requests or delivering messages.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Recipient id is not a base-10 integer (or is zero).
    #[error("invalid chat_id {value:?}: {reason}")]
    MalformedIdentifier { value: String, reason: String },

    /// A required form field is absent or empty.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Uploaded file part is absent, unreadable, empty or too large.
    #[error("cannot read {field}: {reason}")]
    PayloadReadFailure { field: String, reason: String },

    /// Hex envelope is not valid hex or does not split into `<id>||<text>`.
    #[error("invalid hex envelope: {0}")]
    EncodingFailure(String),

    /// The messaging network rejected the send or could not be reached.
    #[error("delivery failed: {0}")]
    DeliveryFailure(String),

    /// The outbound gateway worker has stopped.
    #[error("outbound gateway is closed")]
    GatewayClosed,
}

impl RelayError {
    pub fn malformed_id(value: &str, reason: impl ToString) -> Self {
        Self::MalformedIdentifier {
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn payload(field: impl Into<String>, reason: impl ToString) -> Self {
        Self::PayloadReadFailure {
            field: field.into(),
            reason: reason.to_string(),
        }
    }

    /// HTTP status reported to relay callers when this error rejects a request.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::DeliveryFailure(_) | Self::GatewayClosed => StatusCode::BAD_GATEWAY,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Parse a recipient id the way every relay endpoint does: trimmed, base 10, non-zero.
pub fn parse_chat_id(raw: &str) -> Result<i64, RelayError> {
    let id: i64 = raw
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| RelayError::malformed_id(raw, e))?;
    if id == 0 {
        return Err(RelayError::malformed_id(raw, "chat id must be non-zero"));
    }
    Ok(id)
}
