//! Relay HTTP endpoints: collect the form, decode it, submit to the outbound gateway.

use crate::channels::{FilePayload, MediaKind};
use crate::error::RelayError;
use crate::gateway::server::GatewayState;
use crate::ingress::{self, LegacyAction, RelayForm};
use crate::outbound::OutboundRequest;
use async_trait::async_trait;
use axum::{
    extract::{FromRequest, FromRequestParts, Multipart, Query, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Form, Router,
};

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status(), format!("{}\n", self)).into_response()
    }
}

/// Collects query-string fields, then body fields (urlencoded or multipart); body values win.
#[async_trait]
impl<S> FromRequest<S> for RelayForm
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let (mut parts, body) = req.into_parts();
        let mut form = RelayForm::new();
        if let Ok(Query(pairs)) =
            Query::<Vec<(String, String)>>::from_request_parts(&mut parts, state).await
        {
            for (k, v) in pairs {
                form.insert_field(k, v);
            }
        }
        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let req = Request::from_parts(parts, body);

        if content_type.starts_with("multipart/form-data") {
            let mut multipart = Multipart::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            loop {
                let field = match multipart.next_field().await {
                    Ok(Some(field)) => field,
                    Ok(None) => break,
                    Err(e) => return Err(RelayError::payload("body", e.body_text()).into_response()),
                };
                let Some(name) = field.name().map(String::from) else {
                    continue;
                };
                match field.file_name().map(String::from) {
                    Some(file_name) => {
                        let bytes = field
                            .bytes()
                            .await
                            .map_err(|e| RelayError::payload(name.as_str(), e.body_text()).into_response())?;
                        form.insert_file(name, FilePayload::new(file_name, bytes));
                    }
                    None => {
                        let text = field
                            .text()
                            .await
                            .map_err(|e| RelayError::payload(name.as_str(), e.body_text()).into_response())?;
                        form.insert_field(name, text);
                    }
                }
            }
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            for (k, v) in pairs {
                form.insert_field(k, v);
            }
        }
        Ok(form)
    }
}

const IMAGE_PATHS: &[&str] = &["/api/smart48/image", "/api/smart48/image/"];
const VIDEO_PATHS: &[&str] = &["/api/smart48/video", "/api/smart48/video/"];
const FILE_PATHS: &[&str] = &["/api/smart48/file", "/api/smart48/file/"];
const MSG_PATHS: &[&str] = &["/api/smart48/msg", "/api/smart48/msg/"];
const HEX_PATHS: &[&str] = &["/api/smart48/hex", "/api/smart48/hex/", "/tg_hex.php"];
const LEGACY_PATHS: &[&str] = &["/api", "/api/", "/tg_send.php"];

/// Every path served by `relay_routes`.
pub(crate) fn relay_paths() -> impl Iterator<Item = &'static str> {
    [IMAGE_PATHS, VIDEO_PATHS, FILE_PATHS, MSG_PATHS, HEX_PATHS, LEGACY_PATHS]
        .into_iter()
        .flatten()
        .copied()
}

/// Relay routes, each reachable with and without a trailing slash, plus the legacy aliases.
pub fn relay_routes() -> Router<GatewayState> {
    let mut router = Router::new();
    for path in IMAGE_PATHS {
        router = router.route(path, post(image_api));
    }
    for path in VIDEO_PATHS {
        router = router.route(path, post(video_api));
    }
    for path in FILE_PATHS {
        router = router.route(path, post(file_api));
    }
    for path in MSG_PATHS {
        router = router.route(path, post(msg_api));
    }
    for path in HEX_PATHS {
        router = router.route(path, post(hex_api));
    }
    for path in LEGACY_PATHS {
        router = router.route(path, post(legacy_api));
    }
    router
}

fn ok() -> Response {
    (StatusCode::OK, "OK").into_response()
}

fn reject(endpoint: &str, err: RelayError) -> Response {
    log::error!("{} endpoint: {}", endpoint, err);
    err.into_response()
}

/// Submit and wait for the delivery attempt. Failures are logged; the caller still answers OK.
async fn submit(state: &GatewayState, endpoint: &str, request: OutboundRequest) {
    let chat_id = request.chat_id();
    let kind = request.kind_name();
    let report = state.outbound.send(request).await;
    if report.log_failures(endpoint, chat_id) {
        log::debug!("{} endpoint: {} delivered to {}", endpoint, kind, chat_id);
    }
}

async fn media_api(state: GatewayState, kind: MediaKind, form: RelayForm) -> Response {
    match ingress::decode_media(kind, &form, state.config.max_upload_bytes) {
        Ok(request) => {
            submit(&state, kind.name(), request).await;
            ok()
        }
        Err(e) => reject(kind.name(), e),
    }
}

/// POST /api/smart48/image: `chat_id`, `file` part, optional `text`.
async fn image_api(State(state): State<GatewayState>, form: RelayForm) -> Response {
    media_api(state, MediaKind::Image, form).await
}

/// POST /api/smart48/video: `chat_id`, `file` part, optional `text`.
async fn video_api(State(state): State<GatewayState>, form: RelayForm) -> Response {
    media_api(state, MediaKind::Video, form).await
}

/// POST /api/smart48/file: `chat_id`, `file` part, optional `text`.
async fn file_api(State(state): State<GatewayState>, form: RelayForm) -> Response {
    media_api(state, MediaKind::File, form).await
}

/// POST /api/smart48/msg: `chat_id` and `text`.
async fn msg_api(State(state): State<GatewayState>, form: RelayForm) -> Response {
    match ingress::decode_message(&form) {
        Ok(request) => {
            submit(&state, "msg", request).await;
            ok()
        }
        Err(e) => reject("msg", e),
    }
}

/// POST /api/smart48/hex, /tg_hex.php: `hex` envelope of `<chat_id>||<text>`.
async fn hex_api(State(state): State<GatewayState>, form: RelayForm) -> Response {
    log::debug!("hex endpoint: envelope {:?}", form.field("hex"));
    match ingress::decode_hex(&form) {
        Ok(request) => {
            submit(&state, "hex", request).await;
            ok()
        }
        Err(e) => reject("hex", e),
    }
}

/// POST /api, /api/, /tg_send.php: legacy clients ignore the body, so problems are only logged.
async fn legacy_api(
    State(state): State<GatewayState>,
    form: Result<RelayForm, Response>,
) -> Response {
    let Ok(form) = form else {
        log::error!("legacy endpoint: unreadable request body");
        return StatusCode::OK.into_response();
    };
    match ingress::decode_legacy(&form, &state.config.bot_name, state.config.max_upload_bytes) {
        LegacyAction::Ignore => StatusCode::OK.into_response(),
        LegacyAction::Media(request) => {
            submit(&state, "legacy", request).await;
            StatusCode::OK.into_response()
        }
        LegacyAction::Rejected(e) => {
            log::error!("legacy endpoint: {}", e);
            StatusCode::OK.into_response()
        }
        LegacyAction::Message(Ok(request)) => {
            submit(&state, "legacy", request).await;
            ok()
        }
        LegacyAction::Message(Err(e)) => {
            log::error!("legacy endpoint: {}", e);
            (StatusCode::OK, format!("{}\n", e)).into_response()
        }
    }
}
