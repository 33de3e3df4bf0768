use callrelay_gateway::{BridgeConfig, RealtimeConfig, RelaySettings, WebhookSettings};
use serde::Deserialize;

/// Environment variable consulted when `[realtime] api_key` is not set.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Contents of `callrelay.toml`.
#[derive(Debug, Deserialize)]
pub struct RelayConfig {
    /// Outbound identities handed to placed calls.
    pub caller_numbers: Vec<String>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub webhook: WebhookSettings,
    #[serde(default)]
    pub relay: RelaySettings,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct SecurityConfig {
    #[serde(default)]
    pub api_keys: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5050
}

impl RelayConfig {
    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Fill the realtime credential from `env_key` when the file leaves it out.
    pub fn apply_env_credential(&mut self, env_key: Option<String>) {
        if self.realtime.api_key.as_deref().map_or(true, str::is_empty) {
            self.realtime.api_key = env_key.filter(|k| !k.is_empty());
        }
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            realtime: self.realtime.clone(),
            webhook: self.webhook.clone(),
            relay: self.relay.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let config = RelayConfig::parse(r#"caller_numbers = ["+15550001"]"#).unwrap();
        assert_eq!(config.caller_numbers, vec!["+15550001"]);
        assert_eq!(config.server.port, 5050);
        assert!(config.security.api_keys.is_empty());
        assert_eq!(config.realtime.voice, "ash");
        assert_eq!(config.webhook.language, "ko");
    }

    #[test]
    fn test_caller_numbers_required() {
        assert!(RelayConfig::parse("[server]\nport = 8080\n").is_err());
    }

    #[test]
    fn test_full_config() {
        let raw = r#"
caller_numbers = ["+15550001", "+15550002"]

[server]
host = "127.0.0.1"
port = 8080

[security]
api_keys = ["k1"]

[realtime]
url = "wss://example.test/realtime"
voice = "alloy"
noise_reduction = false

[webhook]
default_url = "https://hooks.example.test/report"
timeout_secs = 3

[relay]
default_instruction = "Say hello."
idle_timeout_secs = 60
"#;
        let config = RelayConfig::parse(raw).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.security.api_keys, vec!["k1"]);

        let bridge = config.bridge_config();
        assert_eq!(bridge.realtime.url, "wss://example.test/realtime");
        assert!(!bridge.realtime.noise_reduction);
        assert_eq!(bridge.webhook.timeout_secs, 3);
        assert_eq!(bridge.relay.default_instruction.as_deref(), Some("Say hello."));
        assert_eq!(bridge.relay.link_buffer, 512);
    }

    #[test]
    fn test_env_credential_fallback() {
        let mut config = RelayConfig::parse(r#"caller_numbers = []"#).unwrap();
        config.apply_env_credential(Some("sk-env".into()));
        assert_eq!(config.realtime.api_key.as_deref(), Some("sk-env"));

        let mut config = RelayConfig::parse(
            "caller_numbers = []\n[realtime]\napi_key = \"sk-file\"\n",
        )
        .unwrap();
        config.apply_env_credential(Some("sk-env".into()));
        assert_eq!(config.realtime.api_key.as_deref(), Some("sk-file"));
    }
}
