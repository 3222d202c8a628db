//! Relay HTTP server (single port): relay endpoints, Telegram webhook, health, and shutdown.

use crate::channels::{InboundEvent, ReplyKeyboard, TelegramChannel, TelegramUpdate};
use crate::config::{self, Config};
use crate::dispatcher::Dispatcher;
use crate::gateway::relay::{relay_paths, relay_routes};
use crate::outbound::OutboundGateway;
use crate::templates::{AdminRoster, ReplyTemplates};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Room for multipart framing and text fields on top of the largest accepted upload.
const BODY_OVERHEAD: usize = 1024 * 1024;
const INBOUND_QUEUE_CAPACITY: usize = 64;
const HEALTH_PATH: &str = "/health";
/// Longer than one getUpdates round trip, so a healthy poll loop always finishes first.
const CHANNEL_TASK_GRACE: Duration = Duration::from_secs(45);

/// Why the server stopped. A restart request tells the supervisor to start a fresh process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal,
    RestartRequested,
}

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    /// The only path to the messaging network.
    pub outbound: OutboundGateway,
    /// Queue feeding the dispatcher (webhook POSTs push here).
    pub inbound_tx: mpsc::Sender<InboundEvent>,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, outbound: OutboundGateway, inbound_tx: mpsc::Sender<InboundEvent>) -> Self {
        Self {
            config,
            outbound,
            inbound_tx,
        }
    }
}

fn webhook_route(webhook_path: &str) -> String {
    format!("/{}", webhook_path.trim_matches('/'))
}

/// True when `webhook_path` would land on a relay or health route.
pub fn is_reserved_route(webhook_path: &str) -> bool {
    let route = webhook_route(webhook_path);
    relay_paths()
        .chain(std::iter::once(HEALTH_PATH))
        .any(|p| p.trim_end_matches('/') == route.trim_end_matches('/'))
}

/// Build the full router: relay endpoints, webhook route, health.
pub fn router(state: GatewayState) -> Router {
    let webhook_route = webhook_route(&state.config.webhook_path);
    let body_limit = state.config.max_upload_bytes.saturating_add(BODY_OVERHEAD);
    relay_routes()
        .route(HEALTH_PATH, get(health_http))
        .route(&webhook_route, post(telegram_webhook))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Run the relay: start the outbound gateway and dispatcher, connect the Telegram account
/// (webhook or long-poll), and serve HTTP on `api_addr:bot_port` until shutdown.
/// On shutdown the inbound side is stopped, the dispatcher drained, and the gateway released.
pub async fn run_gateway(config: Config) -> Result<ShutdownReason> {
    let token = config::resolve_telegram_token(&config).context("telegram token not configured")?;
    let roster = AdminRoster::from_config(&config).context("admins must list at least one chat id")?;
    let config = Arc::new(config);
    let telegram = Arc::new(TelegramChannel::new(token));

    let bind_addr = format!("{}:{}", config.api_addr.trim(), config.bot_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;

    match telegram.get_me().await {
        Ok(name) => log::info!("authorized on account {}", name),
        Err(e) => log::error!("telegram getMe failed: {}", e),
    }

    let (outbound, outbound_worker) = OutboundGateway::spawn(telegram.clone(), config.max_upload_bytes);
    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundEvent>(INBOUND_QUEUE_CAPACITY);
    let dispatcher = Dispatcher::new(
        outbound.clone(),
        Arc::new(ReplyTemplates::from(&config.text)),
        Arc::new(roster),
        Arc::new(ReplyKeyboard::single_row(config.keyboard.iter().cloned())),
    )
    .spawn(inbound_rx);

    let mut channel_tasks: Vec<JoinHandle<()>> = Vec::new();
    let webhook = config::webhook_url(&config);
    if let Some(ref url) = webhook {
        let secret = config.webhook_secret.as_deref();
        match telegram.set_webhook(url, config.cert_path.as_deref(), secret).await {
            Ok(()) => log::info!("telegram channel registered (webhook mode): {}", url),
            Err(e) => log::warn!("telegram set_webhook failed: {}", e),
        }
        match telegram.webhook_info().await {
            Ok(info) => {
                if info.last_error_date.is_some() {
                    log::error!(
                        "telegram callback failed: {}",
                        info.last_error_message.unwrap_or_default()
                    );
                }
                log::debug!(
                    "webhook {} has {} pending update(s)",
                    info.url,
                    info.pending_update_count
                );
            }
            Err(e) => log::warn!("telegram getWebhookInfo failed: {}", e),
        }
    } else {
        if let Err(e) = telegram.delete_webhook().await {
            log::debug!("telegram delete_webhook before polling: {}", e);
        }
        channel_tasks.push(telegram.clone().start_inbound(inbound_tx.clone()));
        log::info!("telegram channel registered and getUpdates loop started");
    }

    let restart = Arc::new(AtomicBool::new(false));
    let app = router(GatewayState::new(config.clone(), outbound.clone(), inbound_tx));
    log::info!("relay listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            config.restart_marker.clone(),
            Duration::from_secs(config.restart_poll_secs.max(1)),
            restart.clone(),
            telegram.clone(),
            webhook.is_some(),
        ))
        .await
        .context("relay server exited")?;
    log::info!("relay stopped accepting requests");

    join_channel_tasks(channel_tasks, CHANNEL_TASK_GRACE).await;
    log::info!("channel tasks finished");

    // All inbound senders are gone: the dispatcher finishes what is queued and returns.
    if let Err(e) = dispatcher.await {
        log::warn!("dispatcher task ended abnormally: {}", e);
    }
    log::info!("dispatcher drained");

    drop(outbound);
    let _ = outbound_worker.await;
    log::info!("outbound gateway released");

    if restart.load(Ordering::SeqCst) {
        Ok(ShutdownReason::RestartRequested)
    } else {
        Ok(ShutdownReason::Signal)
    }
}

/// Future that completes when the process should shut down: SIGINT, SIGTERM, or the restart marker.
/// Stops the long-poll loop and removes the webhook (when used) before the server drains.
async fn shutdown_signal(
    restart_marker: Option<PathBuf>,
    poll_every: Duration,
    restart: Arc<AtomicBool>,
    telegram: Arc<TelegramChannel>,
    webhook_mode: bool,
) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("shutdown signal received (interrupt)"),
        _ = terminate => log::info!("shutdown signal received (terminate)"),
        _ = wait_for_restart_marker(restart_marker, poll_every) => {
            log::info!("restart marker found, shutting down for restart");
            restart.store(true, Ordering::SeqCst);
        }
    }

    telegram.stop();
    if webhook_mode {
        if let Err(e) = telegram.delete_webhook().await {
            log::debug!("telegram delete_webhook on shutdown: {}", e);
        }
    }
}

/// Wait for each channel task; one that outlives `grace` is aborted so its queue sender is dropped.
async fn join_channel_tasks(tasks: Vec<JoinHandle<()>>, grace: Duration) {
    for task in tasks {
        let abort = task.abort_handle();
        if tokio::time::timeout(grace, task).await.is_err() {
            log::warn!("channel task still running after {:?}, aborting", grace);
            abort.abort();
        }
    }
}

/// Completes once the marker file exists; the marker is removed so the next process starts clean.
pub async fn wait_for_restart_marker(marker: Option<PathBuf>, poll_every: Duration) {
    let Some(path) = marker else {
        return std::future::pending::<()>().await;
    };
    let mut tick = tokio::time::interval(poll_every);
    loop {
        tick.tick().await;
        if tokio::fs::metadata(&path).await.is_ok() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                log::warn!("removing restart marker {}: {}", path.display(), e);
            }
            return;
        }
    }
}

/// POST /<webhook_path>: receives Telegram update JSON; verifies optional secret, queues the event.
async fn telegram_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(ref expected) = state.config.webhook_secret {
        let provided = headers
            .get("X-Telegram-Bot-Api-Secret-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != expected.as_str() {
            return StatusCode::FORBIDDEN;
        }
    }
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(_) => return StatusCode::BAD_REQUEST,
    };
    let Some(event) = update.into_inbound() else {
        return StatusCode::OK;
    };
    if state.inbound_tx.send(event).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// GET /health returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.bot_port,
    }))
}
