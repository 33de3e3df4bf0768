//! Wire formats of the three links.
//!
//! Telephony frames follow the Twilio media-stream shape, model events the
//! OpenAI realtime shape. Unknown tags deserialize to an `Other` variant so
//! new provider events are ignored instead of rejected.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Telephony
// ---------------------------------------------------------------------------

/// Inbound frame from the telephony media stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyFrame {
    Start {
        #[serde(default)]
        start: Option<StreamStart>,
        #[serde(default, rename = "streamSid")]
        stream_sid: Option<String>,
    },
    Media {
        media: InboundMedia,
    },
    Stop,
    Close,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    pub stream_sid: String,
}

#[derive(Debug, Deserialize)]
pub struct InboundMedia {
    #[serde(default, deserialize_with = "millis")]
    pub timestamp: u64,
    pub payload: String,
}

impl TelephonyFrame {
    /// Stream id carried by a `start` frame, nested or top level.
    pub fn start_stream_sid(&self) -> Option<&str> {
        match self {
            Self::Start { start, stream_sid } => start
                .as_ref()
                .map(|s| s.stream_sid.as_str())
                .or(stream_sid.as_deref()),
            _ => None,
        }
    }
}

/// The provider sends media offsets as numeric strings.
fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Float(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(n) => Ok(n),
        Raw::Float(f) => Ok(f.max(0.0) as u64),
        Raw::Text(s) => s.trim().parse::<u64>().map_err(de::Error::custom),
    }
}

/// Outbound frame to the telephony media stream.
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyCommand {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkLabel,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Serialize, PartialEq)]
pub struct OutboundMedia {
    pub payload: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct MarkLabel {
    pub name: String,
}

impl TelephonyCommand {
    pub fn media(stream_sid: &str, payload: impl Into<String>) -> Self {
        Self::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                payload: payload.into(),
            },
        }
    }

    pub fn mark(stream_sid: &str) -> Self {
        Self::Mark {
            stream_sid: stream_sid.to_string(),
            mark: MarkLabel {
                name: "response_part".to_string(),
            },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        Self::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Inbound event from the realtime model.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ModelEvent {
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        #[serde(default)]
        item_id: Option<String>,
        delta: String,
    },
    #[serde(rename = "response.output_item.done")]
    OutputItemDone { item: OutputItem },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        #[serde(default)]
        transcript: String,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct OutputItem {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
pub struct ContentPart {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
}

impl OutputItem {
    /// First textual or transcribed content of an assistant message.
    pub fn agent_text(&self) -> Option<&str> {
        if self.role.as_deref() != Some("assistant") {
            return None;
        }
        self.content
            .iter()
            .find_map(|part| part.text.as_deref().or(part.transcript.as_deref()))
            .filter(|text| !text.trim().is_empty())
    }
}

/// Outbound command to the realtime model.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ModelCommand {
    #[serde(rename = "session.update")]
    SessionUpdate { session: Value },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    #[serde(rename = "response.create")]
    ResponseCreate,
    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend { audio: String },
    #[serde(rename = "conversation.item.truncate")]
    Truncate {
        item_id: String,
        content_index: u32,
        audio_end_ms: u64,
    },
}

#[derive(Debug, Serialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub role: &'static str,
    pub content: Vec<InputContent>,
}

#[derive(Debug, Serialize)]
pub struct InputContent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

impl ConversationItem {
    /// A user message carrying plain text.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            kind: "message",
            role: "user",
            content: vec![InputContent {
                kind: "input_text",
                text: text.into(),
            }],
        }
    }
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Body of a `webhook.test` request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookTestRequest {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub test_data: Option<Value>,
}

/// A message from the observer, classified.
#[derive(Debug)]
pub enum ObserverMessage {
    /// Send a test report and answer with the outcome.
    WebhookTest(WebhookTestRequest),
    /// Forward to the model and keep `session` for the next connect.
    SessionUpdate { session: Value, raw: String },
    /// Forward verbatim to the model.
    PassThrough(String),
}

impl ObserverMessage {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        match value.get("type").and_then(Value::as_str) {
            Some("webhook.test") => Ok(Self::WebhookTest(serde_json::from_value(value)?)),
            Some("session.update") => Ok(Self::SessionUpdate {
                session: value.get("session").cloned().unwrap_or(Value::Null),
                raw: text.to_string(),
            }),
            _ => Ok(Self::PassThrough(text.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_twilio_start_frame() {
        let raw = r#"{"event":"start","sequenceNumber":"1","start":{"streamSid":"ST1","callSid":"CA1","tracks":["inbound"]},"streamSid":"ST1"}"#;
        let frame: TelephonyFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(frame.start_stream_sid(), Some("ST1"));
    }

    #[test]
    fn test_flat_start_frame() {
        let frame: TelephonyFrame =
            serde_json::from_str(r#"{"event":"start","streamSid":"ST9"}"#).unwrap();
        assert_eq!(frame.start_stream_sid(), Some("ST9"));
    }

    #[test]
    fn test_media_timestamp_as_string_or_number() {
        let frame: TelephonyFrame = serde_json::from_str(
            r#"{"event":"media","media":{"track":"inbound","timestamp":"1450","payload":"AAAA"}}"#,
        )
        .unwrap();
        match frame {
            TelephonyFrame::Media { media } => {
                assert_eq!(media.timestamp, 1450);
                assert_eq!(media.payload, "AAAA");
            }
            other => panic!("expected media, got {other:?}"),
        }

        let frame: TelephonyFrame =
            serde_json::from_str(r#"{"event":"media","media":{"timestamp":20,"payload":"BB"}}"#)
                .unwrap();
        assert!(matches!(frame, TelephonyFrame::Media { media } if media.timestamp == 20));
    }

    #[test]
    fn test_stop_and_unknown_events() {
        let stop: TelephonyFrame =
            serde_json::from_str(r#"{"event":"stop","stop":{"callSid":"CA1"},"streamSid":"ST1"}"#)
                .unwrap();
        assert!(matches!(stop, TelephonyFrame::Stop));

        let mark: TelephonyFrame =
            serde_json::from_str(r#"{"event":"mark","mark":{"name":"x"}}"#).unwrap();
        assert!(matches!(mark, TelephonyFrame::Other));
    }

    #[test]
    fn test_malformed_media_is_an_error() {
        assert!(serde_json::from_str::<TelephonyFrame>(r#"{"event":"media"}"#).is_err());
        assert!(serde_json::from_str::<TelephonyFrame>("not json").is_err());
    }

    #[test]
    fn test_outbound_telephony_shapes() {
        let media = serde_json::to_value(TelephonyCommand::media("ST1", "AAAA")).unwrap();
        assert_eq!(
            media,
            json!({"event": "media", "streamSid": "ST1", "media": {"payload": "AAAA"}})
        );
        let mark = serde_json::to_value(TelephonyCommand::mark("ST1")).unwrap();
        assert_eq!(mark["event"], "mark");
        assert_eq!(mark["streamSid"], "ST1");
        let clear = serde_json::to_value(TelephonyCommand::clear("ST1")).unwrap();
        assert_eq!(clear, json!({"event": "clear", "streamSid": "ST1"}));
    }

    #[test]
    fn test_model_event_dispatch() {
        let delta: ModelEvent = serde_json::from_str(
            r#"{"type":"response.audio.delta","response_id":"r","item_id":"IT1","output_index":0,"content_index":0,"delta":"AAAA"}"#,
        )
        .unwrap();
        assert!(
            matches!(delta, ModelEvent::AudioDelta { item_id: Some(ref id), ref delta } if id == "IT1" && delta == "AAAA")
        );

        let other: ModelEvent =
            serde_json::from_str(r#"{"type":"rate_limits.updated","rate_limits":[]}"#).unwrap();
        assert!(matches!(other, ModelEvent::Other));

        let speech: ModelEvent = serde_json::from_str(
            r#"{"type":"input_audio_buffer.speech_started","audio_start_ms":10,"item_id":"x"}"#,
        )
        .unwrap();
        assert!(matches!(speech, ModelEvent::SpeechStarted));
    }

    #[test]
    fn test_agent_text_prefers_first_textual_part() {
        let event: ModelEvent = serde_json::from_value(json!({
            "type": "response.output_item.done",
            "item": {
                "role": "assistant",
                "content": [{"type": "audio", "transcript": "Good morning!"}]
            }
        }))
        .unwrap();
        match event {
            ModelEvent::OutputItemDone { item } => {
                assert_eq!(item.agent_text(), Some("Good morning!"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_agent_text_ignores_non_assistant_items() {
        let item: OutputItem = serde_json::from_value(json!({
            "role": "user",
            "content": [{"type": "input_text", "text": "hi"}]
        }))
        .unwrap();
        assert!(item.agent_text().is_none());

        let item: OutputItem = serde_json::from_value(json!({
            "type": "function_call",
            "name": "lookup"
        }))
        .unwrap();
        assert!(item.agent_text().is_none());
    }

    #[test]
    fn test_model_command_shapes() {
        let truncate = serde_json::to_value(ModelCommand::Truncate {
            item_id: "IT1".into(),
            content_index: 0,
            audio_end_ms: 450,
        })
        .unwrap();
        assert_eq!(
            truncate,
            json!({"type": "conversation.item.truncate", "item_id": "IT1", "content_index": 0, "audio_end_ms": 450})
        );

        let create = serde_json::to_value(ModelCommand::ResponseCreate).unwrap();
        assert_eq!(create, json!({"type": "response.create"}));

        let item = serde_json::to_value(ModelCommand::ConversationItemCreate {
            item: ConversationItem::user_text("Say hello"),
        })
        .unwrap();
        assert_eq!(item["item"]["role"], "user");
        assert_eq!(item["item"]["content"][0]["type"], "input_text");
        assert_eq!(item["item"]["content"][0]["text"], "Say hello");
    }

    #[test]
    fn test_observer_classification() {
        let msg = ObserverMessage::parse(
            r#"{"type":"webhook.test","webhookUrl":"http://hook","testData":{"a":1}}"#,
        )
        .unwrap();
        match msg {
            ObserverMessage::WebhookTest(req) => {
                assert_eq!(req.webhook_url.as_deref(), Some("http://hook"));
                assert_eq!(req.test_data, Some(json!({"a": 1})));
            }
            other => panic!("unexpected {other:?}"),
        }

        let msg =
            ObserverMessage::parse(r#"{"type":"session.update","session":{"voice":"sage"}}"#)
                .unwrap();
        assert!(
            matches!(msg, ObserverMessage::SessionUpdate { ref session, .. } if session["voice"] == "sage")
        );

        let msg = ObserverMessage::parse(r#"{"type":"response.cancel"}"#).unwrap();
        assert!(matches!(msg, ObserverMessage::PassThrough(_)));

        assert!(ObserverMessage::parse("{oops").is_err());
    }
}
