//! Audio subsystem: transport codec, capture pipeline and ordered playback.
//!
//! All audio inside the process is normalized `f32` mono at 24 kHz; the
//! wire format is base64-encoded PCM 16-bit signed little-endian at the
//! same rate.

pub mod capture;
pub mod codec;
pub mod frame;
pub mod playback;

pub use capture::{CaptureSource, FrameCallback};
pub use frame::FrameSlicer;
pub use playback::PlaybackQueue;
