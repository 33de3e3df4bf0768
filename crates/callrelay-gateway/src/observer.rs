//! Observer socket: watches model traffic for one call and can steer it.

use crate::bridge::CallBridge;
use crate::connection::{axum_ws, pump};
use crate::protocol::ObserverMessage;
use axum::extract::ws::{Message, WebSocket};
use callrelay_session::{LinkHandle, LinkRole, SessionHandle};
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Serve the observer socket for `call_id`. Closing it never ends the call.
pub async fn handle_socket(mut socket: WebSocket, call_id: String, bridge: Arc<CallBridge>) {
    let Some(session) = bridge.session(&call_id).await else {
        warn!(call_id = %call_id, "Observer connected for unknown call, closing");
        let _ = socket.send(Message::Close(None)).await;
        return;
    };

    let (link, link_rx) = LinkHandle::channel(LinkRole::Observer, bridge.link_buffer());
    let link_id = link.id;
    let replaced = {
        let mut s = session.lock().await;
        if s.state.is_ending() {
            drop(s);
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
        s.links.bind(link)
    };
    if let Some(previous) = replaced {
        info!(call_id = %call_id, replaced = %previous.id, "Observer replaced");
        previous.close();
    }
    info!(call_id = %call_id, link_id = %link_id, "Observer connected");

    let (ws_sender, mut ws_receiver) = socket.split();
    let mut send_task = tokio::spawn(pump(ws_sender, link_rx, axum_ws::text, axum_ws::close()));

    let recv_bridge = bridge.clone();
    let recv_session = session.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => handle_text(&recv_bridge, &recv_session, text.as_str()).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let reader_done = tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            false
        }
        _ = &mut recv_task => true,
    };

    let detached = session.lock().await.links.unbind(LinkRole::Observer, link_id);
    if let Some(link) = detached {
        link.close();
    }
    if reader_done {
        let _ = send_task.await;
    }
    info!(call_id = %call_id, link_id = %link_id, "Observer disconnected");
}

/// Handle one text frame from the observer.
pub async fn handle_text(bridge: &Arc<CallBridge>, session: &Arc<SessionHandle>, text: &str) {
    let message = match ObserverMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(call_id = %session.call_id(), error = %e, "Dropping malformed observer frame");
            return;
        }
    };

    match message {
        ObserverMessage::WebhookTest(request) => {
            let bridge = bridge.clone();
            let session = session.clone();
            // Delivery can take the full webhook timeout; keep reading meanwhile.
            tokio::spawn(async move {
                let url = match request.webhook_url {
                    Some(url) => Some(url),
                    None => session.lock().await.config.webhook_url.clone(),
                };
                let result = bridge
                    .webhooks()
                    .send_test(session.call_id(), url.as_deref(), request.test_data)
                    .await;
                session
                    .lock()
                    .await
                    .links
                    .send_json(LinkRole::Observer, &result);
            });
        }
        ObserverMessage::SessionUpdate { session: update, raw } => {
            let mut s = session.lock().await;
            if !s.links.send(LinkRole::Model, raw) {
                debug!(call_id = %s.call_id, "Session update saved for the next model link");
            }
            s.saved_config = Some(update);
        }
        ObserverMessage::PassThrough(raw) => {
            session.lock().await.links.send(LinkRole::Model, raw);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use callrelay_core::CallConfig;
    use callrelay_session::{
        CallerNumberPool, InMemorySessionRegistry, LinkReceiver, SessionRegistry,
    };
    use serde_json::{json, Value};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup(webhook_url: Option<String>) -> (Arc<CallBridge>, Arc<SessionHandle>) {
        let registry = Arc::new(InMemorySessionRegistry::new());
        let bridge = CallBridge::new(
            BridgeConfig::default(),
            registry.clone(),
            Arc::new(CallerNumberPool::new(Vec::<String>::new())),
        );
        let session = registry
            .create(
                "CA1",
                CallConfig {
                    subject_id: "S-1".into(),
                    credential: "sk".into(),
                    webhook_url,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        (bridge, session)
    }

    async fn bind(session: &SessionHandle, role: LinkRole) -> LinkReceiver {
        let (link, rx) = LinkHandle::channel(role, 8);
        session.lock().await.links.bind(link);
        rx
    }

    #[tokio::test]
    async fn test_session_update_forwarded_and_saved() {
        let (bridge, session) = setup(None).await;
        let mut model_rx = bind(&session, LinkRole::Model).await;

        let frame = r#"{"type":"session.update","session":{"voice":"alloy"}}"#;
        handle_text(&bridge, &session, frame).await;

        assert_eq!(model_rx.next().await.unwrap(), frame);
        assert_eq!(
            session.lock().await.saved_config,
            Some(json!({"voice": "alloy"}))
        );
    }

    #[tokio::test]
    async fn test_session_update_saved_without_model() {
        let (bridge, session) = setup(None).await;
        handle_text(
            &bridge,
            &session,
            r#"{"type":"session.update","session":{"voice":"alloy"}}"#,
        )
        .await;
        assert!(session.lock().await.saved_config.is_some());
    }

    #[tokio::test]
    async fn test_other_messages_pass_through() {
        let (bridge, session) = setup(None).await;
        let mut model_rx = bind(&session, LinkRole::Model).await;

        let frame = r#"{"type":"response.create"}"#;
        handle_text(&bridge, &session, frame).await;
        assert_eq!(model_rx.next().await.unwrap(), frame);
    }

    #[tokio::test]
    async fn test_webhook_test_reports_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(json!({"test": true, "sessionId": "CA1"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (bridge, session) = setup(Some(format!("{}/hook", server.uri()))).await;
        let mut observer_rx = bind(&session, LinkRole::Observer).await;

        handle_text(&bridge, &session, r#"{"type":"webhook.test"}"#).await;

        let reply: Value = serde_json::from_str(&observer_rx.next().await.unwrap()).unwrap();
        assert_eq!(reply["type"], "webhook.test.result");
        assert_eq!(reply["success"], true);
    }

    #[tokio::test]
    async fn test_webhook_test_without_url() {
        let (bridge, session) = setup(None).await;
        let mut observer_rx = bind(&session, LinkRole::Observer).await;

        handle_text(&bridge, &session, r#"{"type":"webhook.test"}"#).await;

        let reply: Value = serde_json::from_str(&observer_rx.next().await.unwrap()).unwrap();
        assert_eq!(reply["success"], false);
        assert_eq!(reply["error"], "No webhook URL configured");
    }
}
