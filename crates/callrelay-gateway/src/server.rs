use crate::bridge::{CallBridge, Placement, PlacementRequest};
use crate::middleware::{auth_middleware, AuthConfig};
use crate::{observer, telephony};
use axum::{
    extract::{Form, Path, State, WebSocketUpgrade},
    http::StatusCode,
    middleware as axum_mw,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use callrelay_core::RelayError;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

/// The relay's HTTP and websocket surface.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the gateway without auth.
    pub fn build(bridge: Arc<CallBridge>) -> Router {
        Self::build_with_auth(bridge, AuthConfig::default())
    }

    /// Build the gateway. Placement and status routes require an API key
    /// when `auth` has any; the media and observer sockets never do.
    pub fn build_with_auth(bridge: Arc<CallBridge>, auth: AuthConfig) -> Router {
        Router::new()
            .route("/calls", post(place_handler))
            .route("/calls/{call_id}/status", post(status_handler))
            .route_layer(axum_mw::from_fn_with_state(Arc::new(auth), auth_middleware))
            .route("/call/{call_id}", get(telephony_ws_handler))
            .route("/logs/{call_id}", get(observer_ws_handler))
            .route("/health", get(health_handler))
            .with_state(bridge)
    }
}

async fn health_handler(State(bridge): State<Arc<CallBridge>>) -> impl IntoResponse {
    let sessions = bridge.registry().list().await.map(|ids| ids.len()).unwrap_or(0);
    Json(json!({
        "status": "ok",
        "service": "callrelay",
        "sessions": sessions,
        "callerNumbersAvailable": bridge.pool().available(),
    }))
}

async fn place_handler(
    State(bridge): State<Arc<CallBridge>>,
    Json(request): Json<PlacementRequest>,
) -> impl IntoResponse {
    match bridge.place(request).await {
        Ok(Placement::Accepted {
            call_id,
            caller_number,
        }) => (
            StatusCode::CREATED,
            Json(json!({
                "callId": call_id,
                "callerNumber": caller_number,
                "streamPath": format!("/call/{call_id}"),
                "observerPath": format!("/logs/{call_id}"),
            })),
        ),
        Ok(Placement::Unavailable) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "unavailable", "retryable": true})),
        ),
        Err(RelayError::DuplicateSession(call_id)) => (
            StatusCode::CONFLICT,
            Json(json!({"error": "duplicate call", "callId": call_id})),
        ),
        Err(RelayError::Config(message)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": message})),
        ),
        Err(e) => {
            error!(error = %e, "Placement failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
        }
    }
}

/// Provider status callback body (form encoded).
#[derive(Debug, Deserialize)]
pub struct StatusCallback {
    /// Raw provider status, e.g. `ringing` or `no-answer`.
    #[serde(rename = "CallStatus")]
    pub call_status: String,
}

async fn status_handler(
    State(bridge): State<Arc<CallBridge>>,
    Path(call_id): Path<String>,
    Form(callback): Form<StatusCallback>,
) -> impl IntoResponse {
    let ended = bridge.record_status(&call_id, &callback.call_status).await;
    Json(json!({
        "callId": call_id,
        "status": callback.call_status,
        "ended": ended,
    }))
}

async fn telephony_ws_handler(
    ws: WebSocketUpgrade,
    Path(call_id): Path<String>,
    State(bridge): State<Arc<CallBridge>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| telephony::handle_socket(socket, call_id, bridge))
}

async fn observer_ws_handler(
    ws: WebSocketUpgrade,
    Path(call_id): Path<String>,
    State(bridge): State<Arc<CallBridge>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| observer::handle_socket(socket, call_id, bridge))
}
