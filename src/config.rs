//! Remote voice service configuration.

use serde::{Deserialize, Serialize};

/// Default WebSocket endpoint of the remote conversational voice service.
const DEFAULT_WS_URL: &str = "wss://api.openai.com/v1/realtime";

/// Default realtime voice model.
const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview";

/// Default synthetic voice for the simulated customer.
const DEFAULT_VOICE: &str = "alloy";

/// Connection settings for the remote voice service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// WebSocket endpoint (without the `?model=` query).
    pub ws_url: String,
    /// Bearer API key.
    pub api_key: String,
    /// Realtime model identifier.
    pub model: String,
    /// Voice the simulated customer speaks with.
    pub voice: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
        }
    }
}

impl RealtimeConfig {
    /// Build from environment: `REPCALL_API_KEY` is required,
    /// `REPCALL_WS_URL` / `REPCALL_MODEL` / `REPCALL_VOICE` override defaults.
    pub fn from_env() -> crate::voice::error::VoiceResult<Self> {
        let api_key = std::env::var("REPCALL_API_KEY").map_err(|_| {
            crate::voice::error::VoiceError::TransportOpenFailed(
                "REPCALL_API_KEY is not set".to_string(),
            )
        })?;
        Ok(Self {
            ws_url: std::env::var("REPCALL_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string()),
            api_key,
            model: std::env::var("REPCALL_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            voice: std::env::var("REPCALL_VOICE").unwrap_or_else(|_| DEFAULT_VOICE.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_realtime_endpoint() {
        let config = RealtimeConfig::default();
        assert!(config.ws_url.starts_with("wss://"));
        assert!(config.api_key.is_empty());
        assert_eq!(config.model, DEFAULT_MODEL);
    }
}
