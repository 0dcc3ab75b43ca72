//! Session orchestration: transport + capture + playback.
//!
//! A [`VoiceSession`] ties the three realtime pipelines into one lifecycle.
//! `connect` resolves once the channel is open, so `start_listening`
//! immediately afterwards cannot race the handshake. `disconnect` tears
//! down capture, then playback, then the channel, so no device work
//! outlives the session. Every lifecycle operation is safe to call
//! redundantly and in any order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::capture::{CaptureSource, FrameCallback};
use crate::audio::codec;
use crate::audio::playback::PlaybackQueue;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::session::messages::{ClientEvent, ServerEvent, normalize_error};
use crate::session::transport::{
    ErrorCallback, EventCallback, MessageCallback, SessionTransport,
};

/// Who produced a transcript turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The human on the call
    User,
    /// The voice agent
    Assistant,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Speaker::User => write!(f, "user"),
            Speaker::Assistant => write!(f, "assistant"),
        }
    }
}

/// One finalized utterance in the conversation.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TranscriptTurn {
    pub speaker: Speaker,
    pub text: String,
}

/// A transcript update delivered to the transcript hook.
///
/// Partial updates carry the incremental delta text; final updates carry the
/// complete turn.
#[derive(Debug, Clone)]
pub struct TranscriptUpdate {
    pub speaker: Speaker,
    pub text: String,
    pub is_final: bool,
}

/// Callback type for transcript updates.
pub type TranscriptCallback =
    Arc<dyn Fn(TranscriptUpdate) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for decoded inbound audio.
pub type AudioDeltaCallback =
    Arc<dyn Fn(Vec<f32>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

type HookSlot<T> = Arc<Mutex<Option<T>>>;

/// Accumulates the in-flight assistant utterance and the finalized turns.
///
/// One owned, mutex-guarded instance reachable from the dispatch path: the
/// dispatch handler always reads the latest value, never a copy captured at
/// registration time.
#[derive(Debug, Default)]
pub(crate) struct TranscriptLog {
    partial: String,
    turns: Vec<TranscriptTurn>,
}

impl TranscriptLog {
    /// Append an assistant transcript delta.
    pub fn apply_delta(&mut self, delta: &str) {
        self.partial.push_str(delta);
    }

    /// Finalize the accumulated assistant utterance into a turn.
    ///
    /// Returns the finalized text, or `None` when nothing accumulated. The
    /// accumulator is empty afterwards either way.
    pub fn finalize_assistant(&mut self) -> Option<String> {
        let text = std::mem::take(&mut self.partial);
        if text.is_empty() {
            return None;
        }
        self.turns.push(TranscriptTurn {
            speaker: Speaker::Assistant,
            text: text.clone(),
        });
        Some(text)
    }

    /// Record a user utterance, which arrives already finalized.
    pub fn push_user(&mut self, text: String) {
        self.turns.push(TranscriptTurn {
            speaker: Speaker::User,
            text,
        });
    }

    pub fn partial(&self) -> &str {
        &self.partial
    }

    pub fn turns(&self) -> &[TranscriptTurn] {
        &self.turns
    }

    pub fn clear(&mut self) {
        self.partial.clear();
        self.turns.clear();
    }
}

/// One live voice session with an agent.
pub struct VoiceSession {
    config: ClientConfig,
    transport: Arc<SessionTransport>,
    capture: Arc<CaptureSource>,
    playback: Arc<PlaybackQueue>,
    session_id: Arc<Mutex<Option<String>>>,
    log: Arc<Mutex<TranscriptLog>>,
    transcript_hook: HookSlot<TranscriptCallback>,
    audio_hook: HookSlot<AudioDeltaCallback>,
    message_hook: HookSlot<MessageCallback>,
    error_hook: HookSlot<ErrorCallback>,
}

impl VoiceSession {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: Arc::new(SessionTransport::new()),
            capture: Arc::new(CaptureSource::new()),
            playback: Arc::new(PlaybackQueue::new()),
            session_id: Arc::new(Mutex::new(None)),
            log: Arc::new(Mutex::new(TranscriptLog::default())),
            transcript_hook: Arc::new(Mutex::new(None)),
            audio_hook: Arc::new(Mutex::new(None)),
            message_hook: Arc::new(Mutex::new(None)),
            error_hook: Arc::new(Mutex::new(None)),
        }
    }

    /// Register the transcript hook.
    pub fn on_transcript(&self, callback: TranscriptCallback) {
        *self.transcript_hook.lock() = Some(callback);
    }

    /// Register the decoded-audio hook. Playback happens regardless; the
    /// hook is for observers such as visualizers.
    pub fn on_audio_delta(&self, callback: AudioDeltaCallback) {
        *self.audio_hook.lock() = Some(callback);
    }

    /// Register the generic message observer.
    pub fn on_message(&self, callback: MessageCallback) {
        *self.message_hook.lock() = Some(callback);
    }

    /// Register the error hook.
    pub fn on_error(&self, callback: ErrorCallback) {
        *self.error_hook.lock() = Some(callback);
    }

    /// Open the session channel.
    ///
    /// Resolution of this future is the readiness signal: once it returns
    /// `Ok`, the transport is open and `start_listening` cannot race the
    /// handshake.
    pub async fn connect(&self) -> Result<()> {
        let url = self.config.session_url()?;
        self.install_dispatch();
        self.transport.connect(&url).await
    }

    /// Start streaming microphone frames into the session.
    ///
    /// A no-op when already listening. Fails with [`ClientError::NotConnected`]
    /// when the channel is not open.
    pub fn start_listening(&self) -> Result<()> {
        if !self.transport.is_open() {
            return Err(ClientError::NotConnected);
        }
        let transport = self.transport.clone();
        let emit: FrameCallback = Arc::new(move |frame: Vec<f32>| {
            transport.send(ClientEvent::audio_frame(&frame));
        });
        if let Err(e) = self.capture.start(emit) {
            let hook = self.error_hook.lock().clone();
            if let Some(cb) = hook
                && let Ok(handle) = tokio::runtime::Handle::try_current()
            {
                let err = e.clone();
                handle.spawn(async move { cb(err).await });
            }
            return Err(e);
        }
        Ok(())
    }

    /// Stop streaming microphone frames.
    ///
    /// No end-of-turn marker is sent; the service's voice-activity
    /// detection owns turn boundaries.
    pub fn stop_listening(&self) {
        self.capture.stop();
    }

    /// Explicitly commit the input audio buffer. Only needed against a
    /// service configured without voice-activity detection.
    pub fn commit_audio(&self) {
        self.transport.send(ClientEvent::AudioCommit);
    }

    /// Send a typed user utterance into the conversation.
    pub fn send_text(&self, text: &str) {
        self.transport.send(ClientEvent::Text {
            text: text.to_string(),
        });
    }

    /// Send one frame of normalized samples as an audio event.
    ///
    /// The capture pipeline uses this path internally; it also allows
    /// feeding audio from sources other than the microphone.
    pub fn send_audio_frame(&self, samples: &[f32]) {
        self.transport.send(ClientEvent::audio_frame(samples));
    }

    /// End the session: stop capture, stop playback, close the channel, in
    /// that order, so no device work outlives the session. Idempotent.
    pub fn disconnect(&self) {
        self.capture.stop();
        self.playback.stop();
        self.transport.disconnect();
        *self.session_id.lock() = None;
    }

    /// Whether the session channel is open.
    pub fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    /// Whether microphone capture is running.
    pub fn is_listening(&self) -> bool {
        self.capture.is_active()
    }

    /// Server-assigned session identifier, once received.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    /// The agent this session talks to.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Snapshot of the finalized conversation turns.
    pub fn transcript(&self) -> Vec<TranscriptTurn> {
        self.log.lock().turns().to_vec()
    }

    /// The in-flight assistant utterance, if any.
    pub fn partial_transcript(&self) -> String {
        self.log.lock().partial().to_string()
    }

    /// Reset conversation state for a fresh session on the same agent.
    pub fn clear_transcript(&self) {
        self.log.lock().clear();
    }

    /// Wire the transport's callbacks to this session's state and hooks.
    fn install_dispatch(&self) {
        let session_id = self.session_id.clone();
        let log = self.log.clone();
        let playback = self.playback.clone();
        let transcript_hook = self.transcript_hook.clone();
        let audio_hook = self.audio_hook.clone();
        let error_hook = self.error_hook.clone();

        let event_cb: EventCallback = Arc::new(move |event| {
            let session_id = session_id.clone();
            let log = log.clone();
            let playback = playback.clone();
            let transcript_hook = transcript_hook.clone();
            let audio_hook = audio_hook.clone();
            let error_hook = error_hook.clone();
            Box::pin(async move {
                handle_event(
                    event,
                    &session_id,
                    &log,
                    &playback,
                    &transcript_hook,
                    &audio_hook,
                    &error_hook,
                )
                .await;
            })
        });
        self.transport.on_event(event_cb);

        let message_hook = self.message_hook.clone();
        let message_cb: MessageCallback = Arc::new(move |value| {
            let hook = message_hook.lock().clone();
            Box::pin(async move {
                if let Some(cb) = hook {
                    cb(value).await;
                }
            })
        });
        self.transport.on_message(message_cb);

        let error_hook = self.error_hook.clone();
        let error_cb: ErrorCallback = Arc::new(move |err| {
            let hook = error_hook.lock().clone();
            Box::pin(async move {
                if let Some(cb) = hook {
                    cb(err).await;
                }
            })
        });
        self.transport.on_error(error_cb);
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Route one typed server event.
async fn handle_event(
    event: ServerEvent,
    session_id: &Arc<Mutex<Option<String>>>,
    log: &Arc<Mutex<TranscriptLog>>,
    playback: &Arc<PlaybackQueue>,
    transcript_hook: &HookSlot<TranscriptCallback>,
    audio_hook: &HookSlot<AudioDeltaCallback>,
    error_hook: &HookSlot<ErrorCallback>,
) {
    match event {
        ServerEvent::SessionInfo {
            session_id: id, ..
        } => {
            tracing::info!("session established: {id}");
            *session_id.lock() = Some(id);
        }

        ServerEvent::AudioDelta { delta } => match codec::decode_payload(&delta) {
            Ok(samples) => {
                playback.enqueue(samples.clone());
                let hook = audio_hook.lock().clone();
                if let Some(cb) = hook {
                    cb(samples).await;
                }
            }
            Err(e) => {
                tracing::warn!("dropping undecodable audio delta: {e}");
                let hook = error_hook.lock().clone();
                if let Some(cb) = hook {
                    cb(e).await;
                }
            }
        },

        ServerEvent::TranscriptDelta { delta } => {
            log.lock().apply_delta(&delta);
            let hook = transcript_hook.lock().clone();
            if let Some(cb) = hook {
                cb(TranscriptUpdate {
                    speaker: Speaker::Assistant,
                    text: delta,
                    is_final: false,
                })
                .await;
            }
        }

        ServerEvent::TranscriptDone {} => {
            let finalized = log.lock().finalize_assistant();
            if let Some(text) = finalized {
                let hook = transcript_hook.lock().clone();
                if let Some(cb) = hook {
                    cb(TranscriptUpdate {
                        speaker: Speaker::Assistant,
                        text,
                        is_final: true,
                    })
                    .await;
                }
            }
        }

        ServerEvent::InputTranscriptionCompleted { transcript } => {
            log.lock().push_user(transcript.clone());
            let hook = transcript_hook.lock().clone();
            if let Some(cb) = hook {
                cb(TranscriptUpdate {
                    speaker: Speaker::User,
                    text: transcript,
                    is_final: true,
                })
                .await;
            }
        }

        // The transport normalizes and routes errors before typed dispatch;
        // handle the variant anyway so the match stays exhaustive.
        ServerEvent::Error { error } => {
            if let Some(message) = normalize_error(&error) {
                let hook = error_hook.lock().clone();
                if let Some(cb) = hook {
                    cb(ClientError::Server(message)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_accumulation() {
        let mut log = TranscriptLog::default();
        log.apply_delta("Hel");
        log.apply_delta("lo");
        assert_eq!(log.partial(), "Hello");

        let finalized = log.finalize_assistant();
        assert_eq!(finalized.as_deref(), Some("Hello"));
        assert_eq!(log.partial(), "");
        assert_eq!(
            log.turns(),
            &[TranscriptTurn {
                speaker: Speaker::Assistant,
                text: "Hello".to_string(),
            }]
        );
    }

    #[test]
    fn test_empty_accumulator_finalizes_to_nothing() {
        let mut log = TranscriptLog::default();
        assert!(log.finalize_assistant().is_none());
        assert!(log.turns().is_empty());
    }

    #[test]
    fn test_user_turn_arrives_finalized() {
        let mut log = TranscriptLog::default();
        log.apply_delta("partial assistant");
        log.push_user("Hi there".to_string());

        // User turns do not disturb the assistant accumulator.
        assert_eq!(log.partial(), "partial assistant");
        assert_eq!(log.turns().len(), 1);
        assert_eq!(log.turns()[0].speaker, Speaker::User);
    }

    #[test]
    fn test_interleaved_turns_keep_order() {
        let mut log = TranscriptLog::default();
        log.push_user("Hi".to_string());
        log.apply_delta("Hello ");
        log.apply_delta("back");
        log.finalize_assistant();
        log.push_user("Bye".to_string());

        let speakers: Vec<Speaker> = log.turns().iter().map(|t| t.speaker).collect();
        assert_eq!(speakers, vec![Speaker::User, Speaker::Assistant, Speaker::User]);
    }

    #[test]
    fn test_start_listening_requires_open_transport() {
        let session = VoiceSession::new(ClientConfig::new("ws://localhost:1", "a1"));
        assert!(matches!(
            session.start_listening(),
            Err(ClientError::NotConnected)
        ));
    }

    #[test]
    fn test_lifecycle_calls_are_safe_in_any_order() {
        let session = VoiceSession::new(ClientConfig::new("ws://localhost:1", "a1"));
        session.stop_listening();
        session.disconnect();
        session.disconnect();
        session.stop_listening();
        assert!(!session.is_connected());
        assert!(!session.is_listening());
        assert!(session.transcript().is_empty());
    }

    #[test]
    fn test_speaker_display() {
        assert_eq!(Speaker::User.to_string(), "user");
        assert_eq!(Speaker::Assistant.to_string(), "assistant");
    }

    #[tokio::test]
    async fn test_audio_delta_event_reaches_hook() {
        let session_id = Arc::new(Mutex::new(None));
        let log = Arc::new(Mutex::new(TranscriptLog::default()));
        let playback = Arc::new(PlaybackQueue::new());
        let transcript_hook: HookSlot<TranscriptCallback> = Arc::new(Mutex::new(None));
        let error_hook: HookSlot<ErrorCallback> = Arc::new(Mutex::new(None));

        let received: Arc<Mutex<Vec<Vec<f32>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let audio_cb: AudioDeltaCallback = Arc::new(move |samples| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().push(samples);
            })
        });
        let audio_hook: HookSlot<AudioDeltaCallback> = Arc::new(Mutex::new(Some(audio_cb)));

        let payload = codec::encode_frame(&[0.0, 0.25, -0.25]);
        handle_event(
            ServerEvent::AudioDelta { delta: payload },
            &session_id,
            &log,
            &playback,
            &transcript_hook,
            &audio_hook,
            &error_hook,
        )
        .await;

        let frames = received.lock().clone();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 3);
        playback.stop();
    }
}
