//! Relay HTTP server.
//!
//! Single port serves the relay endpoints (image, video, file, msg, hex, and the legacy
//! combined endpoint), the Telegram webhook route, and a health probe.

mod relay;
mod server;

pub use relay::relay_routes;
pub use server::{is_reserved_route, router, run_gateway, wait_for_restart_marker, GatewayState, ShutdownReason};
