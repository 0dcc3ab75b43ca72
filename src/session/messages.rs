//! Wire message types for the realtime session channel.
//!
//! All messages are JSON text frames over a persistent WebSocket, tagged by
//! a `type` field.
//!
//! Client events (sent to the service):
//! - `audio` - one base64 PCM16LE capture frame
//! - `audio_commit` - explicit end-of-utterance marker (manual turn mode only)
//! - `text` - a typed user utterance
//!
//! Server events (received from the service):
//! - `session.info` - server-assigned session identifier
//! - `response.audio.delta` - assistant audio chunk
//! - `response.audio_transcript.delta` - assistant transcript chunk
//! - `response.audio_transcript.done` - assistant transcript complete
//! - `conversation.item.input_audio_transcription.completed` - finalized user transcript
//! - `error` - error report (string or structured payload)
//!
//! Unknown server kinds are tolerated and passed through to the generic
//! message observer, so newer service versions do not break older clients.

use serde::{Deserialize, Serialize};

use crate::audio::codec;

// =============================================================================
// Client Events (sent to the service)
// =============================================================================

/// Client events sent over the session channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// One capture frame, base64 PCM16LE mono 24 kHz.
    #[serde(rename = "audio")]
    Audio {
        /// Base64-encoded audio data
        audio: String,
    },

    /// End-of-utterance marker. Only sent when server-side voice-activity
    /// detection is absent.
    #[serde(rename = "audio_commit")]
    AudioCommit,

    /// A typed user utterance.
    #[serde(rename = "text")]
    Text {
        /// Text content
        text: String,
    },
}

impl ClientEvent {
    /// Build an audio event from a frame of normalized samples.
    pub fn audio_frame(samples: &[f32]) -> Self {
        ClientEvent::Audio {
            audio: codec::encode_frame(samples),
        }
    }

    /// Wire kind of this event, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Audio { .. } => "audio",
            ClientEvent::AudioCommit => "audio_commit",
            ClientEvent::Text { .. } => "text",
        }
    }
}

// =============================================================================
// Server Events (received from the service)
// =============================================================================

/// Server events received over the session channel.
///
/// Extra payload fields are ignored; the typed variants carry only what the
/// client acts on.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Session established; carries the server-assigned identifier.
    #[serde(rename = "session.info")]
    SessionInfo {
        /// Opaque session identifier
        session_id: String,
        /// Agent the session is scoped to
        #[serde(default)]
        agent_id: Option<String>,
    },

    /// Assistant audio chunk, base64 PCM16LE.
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Base64-encoded audio delta
        delta: String,
    },

    /// Assistant transcript chunk.
    #[serde(rename = "response.audio_transcript.delta")]
    TranscriptDelta {
        /// Transcript text delta
        delta: String,
    },

    /// Assistant transcript complete for the current utterance.
    #[serde(rename = "response.audio_transcript.done")]
    TranscriptDone {},

    /// Finalized transcript of a user utterance.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        /// Finalized transcript text
        transcript: String,
    },

    /// Error reported by the service. The payload may be a bare string or a
    /// structured object.
    #[serde(rename = "error")]
    Error {
        /// Raw error payload
        error: serde_json::Value,
    },
}

impl ServerEvent {
    /// Whether `kind` is one of the typed server event kinds.
    pub fn is_known_kind(kind: &str) -> bool {
        matches!(
            kind,
            "session.info"
                | "response.audio.delta"
                | "response.audio_transcript.delta"
                | "response.audio_transcript.done"
                | "conversation.item.input_audio_transcription.completed"
                | "error"
        )
    }
}

/// Normalize an `error` event payload to a message string.
///
/// Returns `None` for an empty-object payload: a known noisy upstream signal
/// that carries no information and is deliberately suppressed.
pub fn normalize_error(payload: &serde_json::Value) -> Option<String> {
    match payload {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Object(map) if map.is_empty() => None,
        serde_json::Value::Object(_) => Some(payload.to_string()),
        _ => Some("unknown error".to_string()),
    }
}

// =============================================================================
// Tests
// =============================================================================
