//! Session layer: wire protocol, transport channel and orchestration.

pub mod controller;
pub mod messages;
pub mod transport;

pub use controller::{
    AudioDeltaCallback, Speaker, TranscriptCallback, TranscriptTurn, TranscriptUpdate,
    VoiceSession,
};
pub use messages::{ClientEvent, ServerEvent, normalize_error};
pub use transport::{
    ErrorCallback, EventCallback, MessageCallback, SessionTransport, TransportState,
};
