//! Client configuration and fixed audio parameters.
//!
//! The realtime protocol is PCM 16-bit signed little-endian, mono, at
//! 24 kHz, in both directions. Capture is sliced into fixed 4096-sample
//! frames before encoding. A mismatch between these values and what the
//! remote service expects is a deployment error, not something the client
//! negotiates at runtime.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ClientError, Result};

/// Sample rate for capture and playback, in Hz.
pub const SAMPLE_RATE: u32 = 24_000;

/// Channel count. The protocol is mono only.
pub const CHANNELS: u16 = 1;

/// Samples per outbound capture frame.
pub const FRAME_SAMPLES: usize = 4096;

/// Environment variable for the base endpoint.
pub const ENDPOINT_ENV: &str = "LIVECALL_ENDPOINT";

/// Environment variable for the agent identifier.
pub const AGENT_ID_ENV: &str = "LIVECALL_AGENT_ID";

/// Configuration for a voice session.
///
/// The surrounding system supplies only an agent identifier (and optionally a
/// display name); everything else about the session is negotiated with the
/// remote service over the realtime channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base WebSocket endpoint, e.g. `ws://localhost:8000`.
    pub endpoint: String,

    /// Agent identifier scoped into the session URL.
    pub agent_id: String,

    /// Human-readable agent name, for display only.
    #[serde(default)]
    pub agent_name: Option<String>,
}

impl ClientConfig {
    /// Create a configuration for the given endpoint and agent.
    pub fn new(endpoint: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            agent_id: agent_id.into(),
            agent_name: None,
        }
    }

    /// Read endpoint and agent id from the environment.
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var(ENDPOINT_ENV)
            .map_err(|_| ClientError::InvalidConfig(format!("{ENDPOINT_ENV} is not set")))?;
        let agent_id = std::env::var(AGENT_ID_ENV)
            .map_err(|_| ClientError::InvalidConfig(format!("{AGENT_ID_ENV} is not set")))?;
        Ok(Self::new(endpoint, agent_id))
    }

    /// Build the agent-scoped session URL.
    ///
    /// One connection per agent session: `<endpoint>/api/realtime/ws/{agent_id}`.
    pub fn session_url(&self) -> Result<String> {
        if self.agent_id.is_empty() {
            return Err(ClientError::InvalidConfig("agent id is empty".to_string()));
        }

        let base = Url::parse(&self.endpoint)
            .map_err(|e| ClientError::InvalidConfig(format!("invalid endpoint: {e}")))?;
        match base.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(ClientError::InvalidConfig(format!(
                    "endpoint scheme must be ws or wss, got {other}"
                )));
            }
        }

        Ok(format!(
            "{}/api/realtime/ws/{}",
            self.endpoint.trim_end_matches('/'),
            self.agent_id
        ))
    }
}
