//! Client link to the realtime model.
//!
//! Opened once the telephony stream has started. Everything the model sends
//! is mirrored to the observer before it is acted on.

use crate::bridge::CallBridge;
use crate::config::RealtimeConfig;
use crate::connection::{client_ws, pump};
use crate::protocol::{ConversationItem, ModelCommand, ModelEvent, TelephonyCommand};
use callrelay_core::{RelayError, RelayResult, TranscriptEntry};
use callrelay_session::{CallEvent, CallState, LinkHandle, LinkRole, SessionHandle};
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type ModelSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Baseline `session.update` body, shallow-merged with a saved override.
pub fn session_config(realtime: &RealtimeConfig, saved: Option<&Value>) -> Value {
    let mut session = json!({
        "modalities": ["text", "audio"],
        "turn_detection": {
            "type": "server_vad",
            "threshold": realtime.vad_threshold,
            "prefix_padding_ms": realtime.prefix_padding_ms,
            "silence_duration_ms": realtime.silence_duration_ms,
        },
        "voice": realtime.voice,
        "input_audio_transcription": { "model": realtime.transcription_model },
        "input_audio_format": realtime.audio_format,
        "output_audio_format": realtime.audio_format,
    });
    if realtime.noise_reduction {
        session["input_audio_noise_reduction"] = json!({ "type": "near_field" });
    }

    if let (Some(Value::Object(saved)), Value::Object(base)) = (saved, &mut session) {
        for (key, value) in saved {
            base.insert(key.clone(), value.clone());
        }
    }
    session
}

/// Connect in the background. Failures are logged; the call carries on
/// without a model.
pub fn spawn_connect(bridge: Arc<CallBridge>, session: Arc<SessionHandle>) {
    tokio::spawn(async move {
        if let Err(e) = connect(bridge, session.clone()).await {
            warn!(call_id = %session.call_id(), error = %e, "Model link failed");
        }
    });
}

async fn open_socket(url: &str, credential: &str) -> RelayResult<ModelSocket> {
    let mut request = url
        .into_client_request()
        .map_err(|e| RelayError::Config(format!("invalid realtime url: {e}")))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {credential}"))
        .map_err(|e| RelayError::Config(format!("invalid credential: {e}")))?;
    let headers = request.headers_mut();
    headers.insert("Authorization", bearer);
    headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    let (socket, _) = connect_async(request)
        .await
        .map_err(|e| RelayError::Connection(e.to_string()))?;
    Ok(socket)
}

/// Open the model link for `session` and relay until it closes.
///
/// A no-op unless the session is waiting for a model. Losing the link puts
/// the session back to waiting; it never ends the call.
pub async fn connect(bridge: Arc<CallBridge>, session: Arc<SessionHandle>) -> RelayResult<()> {
    let call_id = session.call_id().to_string();
    let credential = {
        let mut s = session.lock().await;
        if !s.can_connect_model() {
            debug!(call_id = %call_id, state = ?s.state, "Model connect skipped");
            return Ok(());
        }
        s.model_connecting = true;
        s.config.credential.clone()
    };

    let socket = match open_socket(&bridge.config().realtime.url, &credential).await {
        Ok(socket) => socket,
        Err(e) => {
            session.lock().await.model_connecting = false;
            return Err(e);
        }
    };

    let (link, link_rx) = LinkHandle::channel(LinkRole::Model, bridge.link_buffer());
    let link_id = link.id;
    {
        let mut s = session.lock().await;
        s.model_connecting = false;
        if session.is_terminated() || s.state != CallState::AwaitingModel {
            info!(call_id = %call_id, "Call ended while the model link was opening");
            return Ok(());
        }

        let update = ModelCommand::SessionUpdate {
            session: session_config(&bridge.config().realtime, s.saved_config.as_ref()),
        };
        link.send_json(&update);
        if let Some(instruction) = s.config.instruction.as_deref().filter(|i| !i.trim().is_empty()) {
            link.send_json(&ModelCommand::ConversationItemCreate {
                item: ConversationItem::user_text(instruction),
            });
            link.send_json(&ModelCommand::ResponseCreate);
        }
        s.links.bind(link.clone());
        s.apply(CallEvent::ModelOpened);
    }
    info!(call_id = %call_id, "Model link open");

    let (sink, mut source) = socket.split();
    let mut send_task = tokio::spawn(pump(sink, link_rx, client_ws::text, client_ws::close()));

    let recv_session = session.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = source.next().await {
            match msg {
                Ok(Message::Text(text)) => handle_model_text(&recv_session, &text).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(call_id = %recv_session.call_id(), error = %e, "Model socket error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => {
            link.close();
            let _ = send_task.await;
        }
    }

    let mut s = session.lock().await;
    if s.links.unbind(LinkRole::Model, link_id).is_some() && !s.state.is_ending() {
        s.apply(CallEvent::ModelLost);
    }
    info!(call_id = %call_id, "Model link closed");
    Ok(())
}

/// Handle one text frame from the model.
pub async fn handle_model_text(session: &SessionHandle, text: &str) {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            debug!(call_id = %session.call_id(), error = %e, "Dropping malformed model frame");
            return;
        }
    };

    let mut s = session.lock().await;
    s.links.send(LinkRole::Observer, text.to_string());

    let event: ModelEvent = match serde_json::from_value(value) {
        Ok(event) => event,
        Err(e) => {
            debug!(call_id = %s.call_id, error = %e, "Unhandled model event shape");
            return;
        }
    };

    match event {
        ModelEvent::SpeechStarted => {
            let Some(cut) = s.take_truncation() else {
                return;
            };
            info!(
                call_id = %s.call_id,
                item_id = %cut.item_id,
                audio_end_ms = cut.audio_end_ms,
                "Subject interrupted playback"
            );
            s.links.send_json(
                LinkRole::Model,
                &ModelCommand::Truncate {
                    item_id: cut.item_id,
                    content_index: 0,
                    audio_end_ms: cut.audio_end_ms,
                },
            );
            if let Some(sid) = s.stream_sid.as_deref() {
                s.links
                    .send_json(LinkRole::Telephony, &TelephonyCommand::clear(sid));
            }
        }
        ModelEvent::AudioDelta { item_id, delta } => {
            let Some(sid) = s.stream_sid.clone() else {
                return;
            };
            if s.links.telephony.is_none() {
                return;
            }
            s.begin_response(item_id.as_deref());
            s.links
                .send_json(LinkRole::Telephony, &TelephonyCommand::media(&sid, delta));
            s.links
                .send_json(LinkRole::Telephony, &TelephonyCommand::mark(&sid));
        }
        ModelEvent::OutputItemDone { item } => {
            if let Some(text) = item.agent_text() {
                let entry = TranscriptEntry::agent(text);
                s.push_transcript(entry);
            }
        }
        ModelEvent::InputTranscriptionCompleted { transcript } => {
            if !transcript.trim().is_empty() {
                s.push_transcript(TranscriptEntry::subject(transcript));
            }
        }
        ModelEvent::Error { error } => {
            warn!(call_id = %s.call_id, error = %error, "Model reported an error");
        }
        ModelEvent::Other => {}
    }
}
