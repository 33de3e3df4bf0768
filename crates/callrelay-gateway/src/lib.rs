//! Websocket gateway bridging telephony media streams to a realtime model.
//!
//! Each placed call gets a session. The telephony provider connects to
//! `/call/{id}`, the gateway dials the model once the stream starts, and an
//! optional observer may attach at `/logs/{id}`. When the call ends a report
//! is posted to the configured webhook.

/// Call placement and the shared state behind every route.
pub mod bridge;
/// Realtime, webhook and relay settings.
pub mod config;
pub(crate) mod connection;
/// API key gate for the control routes.
pub mod middleware;
pub mod model;
pub mod observer;
pub(crate) mod protocol;
/// Router assembly and HTTP handlers.
pub mod server;
pub mod telephony;
/// Exactly-once call teardown.
pub mod termination;
/// Final report formatting and delivery.
pub mod webhook;

pub use bridge::{CallBridge, Placement, PlacementRequest};
pub use config::{BridgeConfig, RealtimeConfig, RelaySettings, WebhookSettings};
pub use middleware::AuthConfig;
pub use server::GatewayServer;
pub use termination::{EndReason, TerminationCoordinator};
pub use webhook::{CallReport, DeliveryOutcome, WebhookDispatcher};
