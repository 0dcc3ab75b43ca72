//! Microphone capture pipeline.
//!
//! A `CaptureSource` owns exclusive access to the default input device for
//! the lifetime of a session. Capture runs on a dedicated thread: the cpal
//! stream callback downmixes to mono, feeds the frame slicer, and emits
//! fixed 4096-sample frames at 24 kHz in strict capture order. The callback
//! never blocks; frame emission is encode-and-hand-off only.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use parking_lot::Mutex;

use crate::audio::frame::FrameSlicer;
use crate::config::{FRAME_SAMPLES, SAMPLE_RATE};
use crate::error::{ClientError, Result};

/// Callback receiving each captured frame. Invoked on the audio thread;
/// must not block.
pub type FrameCallback = Arc<dyn Fn(Vec<f32>) + Send + Sync>;

/// Exclusive microphone pipeline for one session.
pub struct CaptureSource {
    active: Arc<AtomicBool>,
    shutdown: Mutex<Option<mpsc::Sender<()>>>,
}

impl CaptureSource {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(false)),
            shutdown: Mutex::new(None),
        }
    }

    /// Whether a capture pipeline is currently running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Acquire the microphone and start emitting frames.
    ///
    /// Returns once device acquisition has succeeded or failed; frames are
    /// then delivered on the capture thread. Starting while already active
    /// is a no-op that preserves the existing pipeline.
    pub fn start(&self, emit: FrameCallback) -> Result<()> {
        if self.active.swap(true, Ordering::SeqCst) {
            tracing::debug!("capture already active, keeping existing pipeline");
            return Ok(());
        }

        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let active = self.active.clone();

        let spawned = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                match open_input_stream(emit) {
                    Ok(stream) => {
                        let started = stream
                            .play()
                            .map_err(|e| ClientError::DeviceUnavailable(format!("play: {e}")));
                        let ok = started.is_ok();
                        let _ = ready_tx.send(started);
                        if ok {
                            // Park until stop() signals or the source is dropped.
                            let _ = stop_rx.recv();
                        }
                        drop(stream);
                        tracing::debug!("capture stream released");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
                active.store(false, Ordering::SeqCst);
            });

        if let Err(e) = spawned {
            self.active.store(false, Ordering::SeqCst);
            return Err(ClientError::Internal(format!("capture thread: {e}")));
        }

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *self.shutdown.lock() = Some(stop_tx);
                tracing::info!("microphone capture started");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ClientError::Internal(
                "capture thread exited before reporting readiness".to_string(),
            )),
        }
    }

    /// Tear down the pipeline and release the device.
    ///
    /// Safe to call repeatedly and before ever starting.
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
            tracing::info!("microphone capture stopped");
        }
    }
}

impl Default for CaptureSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the default input device and build a stream feeding `emit`.
fn open_input_stream(emit: FrameCallback) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| ClientError::DeviceUnavailable("no default input device".to_string()))?;

    let supported = device
        .default_input_config()
        .map_err(|e| map_acquire_error(&e.to_string()))?;
    let channels = supported.channels() as usize;
    let in_rate = supported.sample_rate().0;
    let config: cpal::StreamConfig = supported.config();

    tracing::debug!(
        "input device {:?}: {} ch @ {} Hz, {:?}",
        device.name().unwrap_or_else(|_| "<unknown>".to_string()),
        channels,
        in_rate,
        supported.sample_format()
    );

    let slicer = FrameSlicer::new(in_rate, SAMPLE_RATE, FRAME_SAMPLES)?;

    match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, channels, slicer, emit),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, channels, slicer, emit),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, channels, slicer, emit),
        other => Err(ClientError::DeviceUnavailable(format!(
            "unsupported input sample format {other}"
        ))),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    mut slicer: FrameSlicer,
    emit: FrameCallback,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let data_fn = move |data: &[T], _: &cpal::InputCallbackInfo| {
        let mono: Vec<f32> = if channels <= 1 {
            data.iter().map(|&s| f32::from_sample(s)).collect()
        } else {
            data.chunks(channels)
                .map(|frame| {
                    frame.iter().map(|&s| f32::from_sample(s)).sum::<f32>() / channels as f32
                })
                .collect()
        };
        slicer.push(&mono, |frame| emit(frame.to_vec()));
    };

    let err_fn = |e: cpal::StreamError| tracing::error!("input stream error: {e}");

    device
        .build_input_stream(config, data_fn, err_fn, None)
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                ClientError::DeviceUnavailable("input device disappeared".to_string())
            }
            other => map_acquire_error(&other.to_string()),
        })
}

/// Classify a device acquisition failure. Backends report refused microphone
/// access as backend-specific errors, so the permission case is matched on
/// the message.
fn map_acquire_error(message: &str) -> ClientError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed") {
        ClientError::PermissionDenied(message.to_string())
    } else {
        ClientError::DeviceUnavailable(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_before_start_is_safe() {
        let capture = CaptureSource::new();
        capture.stop();
        capture.stop();
        assert!(!capture.is_active());
    }

    #[test]
    fn test_acquire_error_classification() {
        assert!(matches!(
            map_acquire_error("Access denied by the OS"),
            ClientError::PermissionDenied(_)
        ));
        assert!(matches!(
            map_acquire_error("microphone permission not granted"),
            ClientError::PermissionDenied(_)
        ));
        assert!(matches!(
            map_acquire_error("the requested device is no longer available"),
            ClientError::DeviceUnavailable(_)
        ));
    }
}
