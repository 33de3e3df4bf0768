//! Server side of the telephony media stream, one socket per call.

use crate::bridge::CallBridge;
use crate::connection::{axum_ws, pump};
use crate::model;
use crate::protocol::{ModelCommand, TelephonyFrame};
use crate::termination::EndReason;
use axum::extract::ws::{Message, WebSocket};
use callrelay_session::{LinkHandle, LinkRole, SessionHandle};
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the read loop should do after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Keep reading.
    Continue,
    /// The provider ended the stream.
    Stop,
}

/// Serve the telephony socket for `call_id` until it ends, then end the call.
pub async fn handle_socket(mut socket: WebSocket, call_id: String, bridge: Arc<CallBridge>) {
    let Some(session) = bridge.session(&call_id).await else {
        warn!(call_id = %call_id, "Telephony connected for unknown call, closing");
        let _ = socket.send(Message::Close(None)).await;
        return;
    };

    let (link, link_rx) = LinkHandle::channel(LinkRole::Telephony, bridge.link_buffer());
    {
        let mut s = session.lock().await;
        if s.links.telephony.is_some() || s.state.is_ending() {
            drop(s);
            warn!(call_id = %call_id, "Telephony link already bound, rejecting");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
        s.links.bind(link.clone());
    }
    info!(call_id = %call_id, link_id = %link.id, "Telephony link connected");

    let (ws_sender, mut ws_receiver) = socket.split();
    let mut send_task = tokio::spawn(pump(ws_sender, link_rx, axum_ws::text, axum_ws::close()));

    let idle = bridge.config().relay.idle_timeout();
    let recv_bridge = bridge.clone();
    let recv_session = session.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            let next = match idle {
                Some(limit) => match tokio::time::timeout(limit, ws_receiver.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(call_id = %recv_session.call_id(), "Telephony link idle, closing");
                        return EndReason::IdleTimeout;
                    }
                },
                None => ws_receiver.next().await,
            };
            match next {
                Some(Ok(Message::Text(text))) => {
                    let outcome = handle_text(&recv_bridge, &recv_session, text.as_str()).await;
                    if outcome == FrameOutcome::Stop {
                        return EndReason::TelephonyStopped;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return EndReason::TelephonyClosed,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(call_id = %recv_session.call_id(), error = %e, "Telephony socket error");
                    return EndReason::TelephonyError;
                }
            }
        }
    });

    // Ending the call closes the link, which lets the writer send its close frame.
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            bridge.end(&call_id, EndReason::TelephonyClosed).await;
        }
        reason = &mut recv_task => {
            let reason = reason.unwrap_or(EndReason::TelephonyError);
            bridge.end(&call_id, reason).await;
            link.close();
            let _ = send_task.await;
        }
    }

    info!(call_id = %call_id, "Telephony link disconnected");
}

/// Handle one text frame from the telephony stream.
pub async fn handle_text(
    bridge: &Arc<CallBridge>,
    session: &Arc<SessionHandle>,
    text: &str,
) -> FrameOutcome {
    let frame: TelephonyFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(call_id = %session.call_id(), error = %e, "Dropping malformed telephony frame");
            return FrameOutcome::Continue;
        }
    };

    let start_sid = frame.start_stream_sid().map(str::to_string);
    match frame {
        TelephonyFrame::Start { .. } => {
            let Some(sid) = start_sid else {
                warn!(call_id = %session.call_id(), "Start frame without a stream id");
                return FrameOutcome::Continue;
            };
            let started = session.lock().await.start_stream(sid.as_str());
            if started {
                info!(call_id = %session.call_id(), stream_sid = %sid, "Media stream started");
                model::spawn_connect(bridge.clone(), session.clone());
            }
        }
        TelephonyFrame::Media { media } => {
            let mut s = session.lock().await;
            s.record_media(media.timestamp);
            s.links.send_json(
                LinkRole::Model,
                &ModelCommand::AudioAppend {
                    audio: media.payload,
                },
            );
        }
        TelephonyFrame::Stop | TelephonyFrame::Close => {
            info!(call_id = %session.call_id(), "Media stream stopped");
            return FrameOutcome::Stop;
        }
        TelephonyFrame::Other => {}
    }
    FrameOutcome::Continue
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::bridge::{Placement, PlacementRequest};
    use crate::config::BridgeConfig;
    use callrelay_session::{CallState, CallerNumberPool, InMemorySessionRegistry};

    async fn placed() -> (Arc<CallBridge>, Arc<SessionHandle>) {
        let mut config = BridgeConfig::default();
        // Nothing listens here; model connects fail fast.
        config.realtime.url = "ws://127.0.0.1:1".into();
        let bridge = CallBridge::new(
            config,
            Arc::new(InMemorySessionRegistry::new()),
            Arc::new(CallerNumberPool::new(["+15550001"])),
        );
        let placement = bridge
            .place(PlacementRequest {
                call_id: Some("CA1".into()),
                subject_id: "S-1".into(),
                credential: Some("sk".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(matches!(placement, Placement::Accepted { .. }));
        let session = bridge.session("CA1").await.unwrap();
        (bridge, session)
    }

    #[tokio::test]
    async fn test_start_records_stream() {
        let (bridge, session) = placed().await;
        let (link, _rx) = LinkHandle::channel(LinkRole::Telephony, 8);
        session.lock().await.links.bind(link);

        let frame = r#"{"event":"start","start":{"streamSid":"ST1"}}"#;
        assert_eq!(handle_text(&bridge, &session, frame).await, FrameOutcome::Continue);

        let s = session.lock().await;
        assert_eq!(s.stream_sid.as_deref(), Some("ST1"));
        assert_eq!(s.state, CallState::AwaitingModel);
        assert!(s.started_at.is_some());
    }

    #[tokio::test]
    async fn test_media_forwarded_to_model() {
        let (bridge, session) = placed().await;
        let (model, mut model_rx) = LinkHandle::channel(LinkRole::Model, 8);
        session.lock().await.links.bind(model);

        let frame = r#"{"event":"media","media":{"timestamp":"1000","payload":"AAAA"}}"#;
        handle_text(&bridge, &session, frame).await;

        assert_eq!(session.lock().await.latest_media_ms, 1000);
        let sent: serde_json::Value =
            serde_json::from_str(&model_rx.next().await.unwrap()).unwrap();
        assert_eq!(sent["type"], "input_audio_buffer.append");
        assert_eq!(sent["audio"], "AAAA");
    }

    #[tokio::test]
    async fn test_media_without_model_is_dropped() {
        let (bridge, session) = placed().await;
        let frame = r#"{"event":"media","media":{"timestamp":"20","payload":"AAAA"}}"#;
        assert_eq!(handle_text(&bridge, &session, frame).await, FrameOutcome::Continue);
        assert_eq!(session.lock().await.latest_media_ms, 20);
    }

    #[tokio::test]
    async fn test_stop_and_close_end_the_stream() {
        let (bridge, session) = placed().await;
        for frame in [r#"{"event":"stop"}"#, r#"{"event":"close"}"#] {
            assert_eq!(handle_text(&bridge, &session, frame).await, FrameOutcome::Stop);
        }
    }

    #[tokio::test]
    async fn test_garbage_and_unknown_frames_are_ignored() {
        let (bridge, session) = placed().await;
        for frame in ["not json", r#"{"event":"dtmf","dtmf":{"digit":"1"}}"#] {
            assert_eq!(handle_text(&bridge, &session, frame).await, FrameOutcome::Continue);
        }
        assert_eq!(session.lock().await.state, CallState::Idle);
    }
}
