use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Realtime model endpoint and the baseline session settings sent on connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Realtime websocket URL, model included.
    #[serde(default = "default_realtime_url")]
    pub url: String,
    /// Fallback credential for placements that do not carry one.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Voice the model answers with.
    #[serde(default = "default_voice")]
    pub voice: String,
    /// Server VAD activation threshold.
    #[serde(default = "default_vad_threshold")]
    pub vad_threshold: f32,
    /// Audio kept before detected speech.
    #[serde(default = "default_prefix_padding_ms")]
    pub prefix_padding_ms: u32,
    /// Silence that ends a subject turn.
    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u32,
    /// Model that transcribes the subject.
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    /// Input and output audio encoding. Telephony streams are mu-law.
    #[serde(default = "default_audio_format")]
    pub audio_format: String,
    /// Ask for near-field input noise reduction.
    #[serde(default = "default_true")]
    pub noise_reduction: bool,
}

fn default_realtime_url() -> String {
    "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-12-17".to_string()
}
fn default_voice() -> String {
    "ash".to_string()
}
fn default_vad_threshold() -> f32 {
    0.5
}
fn default_prefix_padding_ms() -> u32 {
    300
}
fn default_silence_duration_ms() -> u32 {
    200
}
fn default_transcription_model() -> String {
    "whisper-1".to_string()
}
fn default_audio_format() -> String {
    "g711_ulaw".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: default_realtime_url(),
            api_key: None,
            voice: default_voice(),
            vad_threshold: default_vad_threshold(),
            prefix_padding_ms: default_prefix_padding_ms(),
            silence_duration_ms: default_silence_duration_ms(),
            transcription_model: default_transcription_model(),
            audio_format: default_audio_format(),
            noise_reduction: true,
        }
    }
}

/// Final report delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSettings {
    /// Used when a placement does not name its own webhook.
    #[serde(default)]
    pub default_url: Option<String>,
    /// Per-request timeout for report delivery.
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
    /// Language tag put on the transcript.
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_webhook_timeout() -> u64 {
    10
}
fn default_language() -> String {
    "ko".to_string()
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            default_url: None,
            timeout_secs: default_webhook_timeout(),
            language: default_language(),
        }
    }
}

impl WebhookSettings {
    /// [`Self::timeout_secs`] as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Relay behaviour shared by every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Opening instruction for placements that do not carry one.
    #[serde(default)]
    pub default_instruction: Option<String>,
    /// Outbound frames buffered per link before new ones are dropped.
    #[serde(default = "default_link_buffer")]
    pub link_buffer: usize,
    /// Close a telephony link that has been silent this long. 0 disables.
    #[serde(default)]
    pub idle_timeout_secs: u64,
}

fn default_link_buffer() -> usize {
    512
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            default_instruction: None,
            link_buffer: default_link_buffer(),
            idle_timeout_secs: 0,
        }
    }
}

impl RelaySettings {
    /// `None` when idle links are never closed.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

/// Everything the bridge needs besides its collaborators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// `[realtime]`
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// `[webhook]`
    #[serde(default)]
    pub webhook: WebhookSettings,
    /// `[relay]`
    #[serde(default)]
    pub relay: RelaySettings,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config: BridgeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.realtime.voice, "ash");
        assert_eq!(config.realtime.audio_format, "g711_ulaw");
        assert!(config.realtime.noise_reduction);
        assert_eq!(config.webhook.timeout(), Duration::from_secs(10));
        assert_eq!(config.relay.link_buffer, 512);
        assert!(config.relay.idle_timeout().is_none());
    }

    #[test]
    fn test_partial_override() {
        let json = r#"{
            "realtime": { "url": "ws://127.0.0.1:9000", "voice": "alloy" },
            "relay": { "idle_timeout_secs": 30 }
        }"#;
        let config: BridgeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.realtime.url, "ws://127.0.0.1:9000");
        assert_eq!(config.realtime.voice, "alloy");
        assert_eq!(config.realtime.silence_duration_ms, 200);
        assert_eq!(config.relay.idle_timeout(), Some(Duration::from_secs(30)));
    }
}
