//! Realtime voice streaming client for AI voice agent sessions.
//!
//! This crate turns a live session into a bidirectional audio conversation
//! with a remote model service over a persistent WebSocket connection. It
//! captures microphone audio, slices and encodes it for transport, manages
//! the streaming session's lifecycle and turn-taking, decodes inbound audio
//! deltas and plays them back in strict arrival order, and surfaces
//! incremental transcript text as it arrives.
//!
//! # Architecture
//!
//! - [`audio::codec`] - PCM16 ⇄ normalized-float conversion and base64
//!   transport encoding
//! - [`audio::capture`] - microphone acquisition and continuous frame
//!   emission
//! - [`audio::playback`] - ordered buffer queue with a single sequential
//!   playback driver
//! - [`session::transport`] - persistent channel lifecycle and inbound
//!   event dispatch
//! - [`session::controller`] - connect/listen/mute/disconnect orchestration
//!   and transcript assembly
//!
//! # Example
//!
//! ```rust,ignore
//! use livecall::{ClientConfig, VoiceSession};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> livecall::Result<()> {
//!     let session = VoiceSession::new(ClientConfig::new("ws://localhost:8000", "agent-42"));
//!
//!     session.on_transcript(Arc::new(|update| Box::pin(async move {
//!         if update.is_final {
//!             println!("[{}] {}", update.speaker, update.text);
//!         }
//!     })));
//!
//!     session.connect().await?;
//!     session.start_listening()?;
//!     // ... speak ...
//!     session.disconnect();
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod session;

// Re-export commonly used items for convenience
pub use config::{CHANNELS, ClientConfig, FRAME_SAMPLES, SAMPLE_RATE};
pub use error::{ClientError, Result};
pub use session::{
    ClientEvent, ServerEvent, SessionTransport, Speaker, TranscriptTurn, TranscriptUpdate,
    TransportState, VoiceSession,
};
