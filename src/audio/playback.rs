//! Ordered playback of decoded audio buffers.
//!
//! Inbound audio deltas arrive in bursts at unpredictable intervals. The
//! `PlaybackQueue` guarantees gapless, in-order, non-overlapping output: a
//! single driver thread claims the queue, renders buffers head-first, and
//! blocks on each buffer's completion before touching the next. When the
//! queue drains the driver exits; a later enqueue starts a fresh one.
//!
//! The output device sits behind a small trait seam so the ordering and
//! teardown semantics are testable without audio hardware. The default
//! backend plays through rodio on the system output device.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use rodio::buffer::SamplesBuffer;

use crate::config::{CHANNELS, SAMPLE_RATE};
use crate::error::{ClientError, Result};

/// Opens an output device. Called on the driver thread.
pub(crate) trait PlaybackBackend: Send + Sync {
    fn open(&self) -> Result<Box<dyn OutputHandle>>;
}

/// An open output device. Owned by the driver thread for its lifetime;
/// dropping it releases the device.
pub(crate) trait OutputHandle {
    fn sink(&self) -> Arc<dyn OutputSink>;
}

/// Renders buffers on an open device. Shared with `stop()` so in-flight
/// playback can be halted from another thread.
pub(crate) trait OutputSink: Send + Sync {
    /// Render one buffer, blocking until the device signals completion.
    fn render(&self, samples: &[f32], sample_rate: u32);

    /// Halt whatever is currently rendering.
    fn halt(&self);
}

// =============================================================================
// Rodio backend
// =============================================================================

struct RodioBackend;

struct RodioHandle {
    // Keeps the OS stream alive; not Send, stays on the driver thread.
    _stream: rodio::OutputStream,
    sink: Arc<RodioSink>,
}

struct RodioSink {
    inner: rodio::Sink,
}

impl PlaybackBackend for RodioBackend {
    fn open(&self) -> Result<Box<dyn OutputHandle>> {
        let stream = rodio::OutputStreamBuilder::from_default_device()
            .and_then(|builder| builder.open_stream())
            .map_err(|e| ClientError::DeviceUnavailable(format!("output device: {e}")))?;
        let sink = rodio::Sink::connect_new(stream.mixer());
        Ok(Box::new(RodioHandle {
            _stream: stream,
            sink: Arc::new(RodioSink { inner: sink }),
        }))
    }
}

impl OutputHandle for RodioHandle {
    fn sink(&self) -> Arc<dyn OutputSink> {
        self.sink.clone()
    }
}

impl OutputSink for RodioSink {
    fn render(&self, samples: &[f32], sample_rate: u32) {
        self.inner
            .append(SamplesBuffer::new(CHANNELS, sample_rate, samples.to_vec()));
        self.inner.sleep_until_end();
    }

    fn halt(&self) {
        self.inner.stop();
    }
}

// =============================================================================
// Playback queue
// =============================================================================

/// FIFO of decoded buffers with a single sequential playback driver.
pub struct PlaybackQueue {
    queue: Arc<Mutex<VecDeque<Vec<f32>>>>,
    draining: Arc<AtomicBool>,
    epoch: Arc<AtomicU64>,
    active_sink: Arc<Mutex<Option<Arc<dyn OutputSink>>>>,
    backend: Arc<dyn PlaybackBackend>,
    sample_rate: u32,
}

impl PlaybackQueue {
    /// Create a queue playing through the system output device.
    pub fn new() -> Self {
        Self::with_backend(Arc::new(RodioBackend), SAMPLE_RATE)
    }

    pub(crate) fn with_backend(backend: Arc<dyn PlaybackBackend>, sample_rate: u32) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            draining: Arc::new(AtomicBool::new(false)),
            epoch: Arc::new(AtomicU64::new(0)),
            active_sink: Arc::new(Mutex::new(None)),
            backend,
            sample_rate,
        }
    }

    /// Append a buffer to the tail of the queue. Never blocks; safe to call
    /// from the event-delivery path. Starts a driver if none is running.
    pub fn enqueue(&self, buffer: Vec<f32>) {
        self.queue.lock().push_back(buffer);
        self.spawn_driver_if_idle();
    }

    /// Whether a driver currently owns the queue and is outputting.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Number of buffers waiting to be rendered.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Discard all pending buffers and halt in-flight playback. Idempotent;
    /// safe to call when nothing is playing.
    pub fn stop(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.queue.lock().clear();
        if let Some(sink) = self.active_sink.lock().take() {
            sink.halt();
        }
        self.draining.store(false, Ordering::SeqCst);
    }

    fn spawn_driver_if_idle(&self) {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let queue = self.queue.clone();
        let draining = self.draining.clone();
        let epoch = self.epoch.clone();
        let active_sink = self.active_sink.clone();
        let backend = self.backend.clone();
        let sample_rate = self.sample_rate;

        let spawned = std::thread::Builder::new()
            .name("playback-driver".to_string())
            .spawn(move || {
                run_driver(queue, draining, epoch, active_sink, backend, sample_rate);
            });

        if let Err(e) = spawned {
            tracing::error!("failed to spawn playback driver: {e}");
            self.draining.store(false, Ordering::SeqCst);
        }
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn run_driver(
    queue: Arc<Mutex<VecDeque<Vec<f32>>>>,
    draining: Arc<AtomicBool>,
    epoch: Arc<AtomicU64>,
    active_sink: Arc<Mutex<Option<Arc<dyn OutputSink>>>>,
    backend: Arc<dyn PlaybackBackend>,
    sample_rate: u32,
) {
    let started_epoch = epoch.load(Ordering::SeqCst);

    let handle = match backend.open() {
        Ok(handle) => handle,
        Err(e) => {
            // Buffers stay queued; a later enqueue retries once the device
            // is back, and only an explicit stop() discards them.
            tracing::warn!(
                "playback device unavailable, retaining {} queued buffer(s): {e}",
                queue.lock().len()
            );
            draining.store(false, Ordering::SeqCst);
            return;
        }
    };

    let sink = handle.sink();
    *active_sink.lock() = Some(sink.clone());

    loop {
        if epoch.load(Ordering::SeqCst) != started_epoch {
            // stop() already cleared the flag and the queue.
            break;
        }

        let next = queue.lock().pop_front();
        match next {
            Some(buffer) => sink.render(&buffer, sample_rate),
            None => {
                draining.store(false, Ordering::SeqCst);
                // An enqueue may have slipped in after the empty pop; if so,
                // reclaim the queue instead of losing the wakeup.
                if !queue.lock().is_empty()
                    && draining
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                {
                    continue;
                }
                break;
            }
        }
    }

    let mut guard = active_sink.lock();
    if let Some(current) = guard.as_ref()
        && Arc::ptr_eq(current, &sink)
    {
        guard.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Backend that records render order and watches for overlap.
    struct MockBackend {
        fail_open: AtomicBool,
        opens: AtomicUsize,
        rendered: Arc<Mutex<Vec<f32>>>,
        rendering: Arc<AtomicBool>,
        overlapped: Arc<AtomicBool>,
    }

    struct MockHandle {
        sink: Arc<MockSink>,
    }

    struct MockSink {
        rendered: Arc<Mutex<Vec<f32>>>,
        rendering: Arc<AtomicBool>,
        overlapped: Arc<AtomicBool>,
        halted: AtomicBool,
    }

    impl MockBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fail_open: AtomicBool::new(false),
                opens: AtomicUsize::new(0),
                rendered: Arc::new(Mutex::new(Vec::new())),
                rendering: Arc::new(AtomicBool::new(false)),
                overlapped: Arc::new(AtomicBool::new(false)),
            })
        }
    }

    impl PlaybackBackend for MockBackend {
        fn open(&self) -> Result<Box<dyn OutputHandle>> {
            if self.fail_open.load(Ordering::SeqCst) {
                return Err(ClientError::DeviceUnavailable("mock offline".to_string()));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockHandle {
                sink: Arc::new(MockSink {
                    rendered: self.rendered.clone(),
                    rendering: self.rendering.clone(),
                    overlapped: self.overlapped.clone(),
                    halted: AtomicBool::new(false),
                }),
            }))
        }
    }

    impl OutputHandle for MockHandle {
        fn sink(&self) -> Arc<dyn OutputSink> {
            self.sink.clone()
        }
    }

    impl OutputSink for MockSink {
        fn render(&self, samples: &[f32], _sample_rate: u32) {
            if self.rendering.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(2));
            if !self.halted.load(Ordering::SeqCst) {
                self.rendered.lock().push(samples[0]);
            }
            self.rendering.store(false, Ordering::SeqCst);
        }

        fn halt(&self) {
            self.halted.store(true, Ordering::SeqCst);
        }
    }

    fn wait_for_drain(queue: &PlaybackQueue) {
        for _ in 0..500 {
            if !queue.is_draining() && queue.pending() == 0 {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("queue never drained");
    }

    #[test]
    fn test_burst_enqueue_renders_in_order() {
        let backend = MockBackend::new();
        let queue = PlaybackQueue::with_backend(backend.clone(), 24_000);

        for i in 0..10 {
            queue.enqueue(vec![i as f32; 8]);
        }
        wait_for_drain(&queue);

        let rendered = backend.rendered.lock().clone();
        assert_eq!(rendered, (0..10).map(|i| i as f32).collect::<Vec<_>>());
        assert!(!backend.overlapped.load(Ordering::SeqCst), "buffers overlapped");
    }

    #[test]
    fn test_driver_restarts_after_drain() {
        let backend = MockBackend::new();
        let queue = PlaybackQueue::with_backend(backend.clone(), 24_000);

        queue.enqueue(vec![1.0; 4]);
        wait_for_drain(&queue);
        queue.enqueue(vec![2.0; 4]);
        wait_for_drain(&queue);

        assert_eq!(backend.rendered.lock().clone(), vec![1.0, 2.0]);
        assert_eq!(backend.opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stop_is_idempotent_and_restartable() {
        let backend = MockBackend::new();
        let queue = PlaybackQueue::with_backend(backend.clone(), 24_000);

        queue.stop();
        queue.stop();
        assert!(!queue.is_draining());

        queue.enqueue(vec![3.0; 4]);
        wait_for_drain(&queue);
        assert_eq!(backend.rendered.lock().clone(), vec![3.0]);
    }

    #[test]
    fn test_unavailable_device_retains_buffers() {
        let backend = MockBackend::new();
        backend.fail_open.store(true, Ordering::SeqCst);
        let queue = PlaybackQueue::with_backend(backend.clone(), 24_000);

        queue.enqueue(vec![1.0; 4]);
        queue.enqueue(vec![2.0; 4]);

        for _ in 0..100 {
            if !queue.is_draining() {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(queue.pending(), 2, "buffers must survive an offline device");
        assert!(backend.rendered.lock().is_empty());

        // Device recovers; the next enqueue replays everything in order.
        backend.fail_open.store(false, Ordering::SeqCst);
        queue.enqueue(vec![3.0; 4]);
        wait_for_drain(&queue);
        assert_eq!(backend.rendered.lock().clone(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_stop_discards_pending() {
        let backend = MockBackend::new();
        backend.fail_open.store(true, Ordering::SeqCst);
        let queue = PlaybackQueue::with_backend(backend.clone(), 24_000);

        queue.enqueue(vec![1.0; 4]);
        queue.enqueue(vec![2.0; 4]);
        queue.stop();
        assert_eq!(queue.pending(), 0);
    }
}
