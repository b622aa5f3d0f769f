//! Shared latest-frame source.
//!
//! One capture thread owns the camera for the life of the process and
//! publishes each frame through a watch channel. Any number of consumers
//! (the recognition loop, stream viewers) read the latest published frame
//! without ever touching camera hardware, so a slow consumer simply
//! misses intermediate frames and can never starve another.

use crate::camera::CaptureBackend;
use crate::frame::Frame;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const RETRY_BASE: Duration = Duration::from_millis(50);
const RETRY_MAX: Duration = Duration::from_secs(2);
/// Consecutive failure count at which the source logs at warn level.
const FAILURES_WARN_AT: u32 = 3;

/// Tuning for the capture thread.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Frames older than this are reported as absent by `latest()`.
    pub stale_after: Duration,
    /// Lower bound on the capture cadence (caps CPU at idle).
    pub min_capture_interval: Duration,
    /// Frames discarded at startup for camera AGC/AE stabilization.
    pub warmup_frames: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(2),
            min_capture_interval: Duration::from_millis(33),
            warmup_frames: 0,
        }
    }
}

/// Clone-safe read handle onto the latest frame.
#[derive(Clone)]
pub struct FrameSourceHandle {
    rx: watch::Receiver<Option<Arc<Frame>>>,
    failures: Arc<AtomicU32>,
    stale_after: Duration,
}

impl FrameSourceHandle {
    /// The latest published frame, or `None` when nothing fresh is
    /// available (startup, capture failures, stalled hardware).
    ///
    /// Never blocks: this is an Arc clone behind a watch borrow.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        let frame = self.rx.borrow().clone()?;
        if frame.captured_at.elapsed() <= self.stale_after {
            Some(frame)
        } else {
            None
        }
    }

    /// Number of consecutive capture failures (0 when healthy).
    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Owns the capture thread. Dropping (or calling `stop`) signals the
/// thread and joins it; the join may wait out one in-flight capture.
pub struct FrameSource {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
    handle: FrameSourceHandle,
}

impl FrameSource {
    /// Spawn the capture thread over the given backend.
    pub fn spawn(backend: impl CaptureBackend, config: SourceConfig) -> Self {
        let (tx, rx) = watch::channel(None);
        let stop = Arc::new(AtomicBool::new(false));
        let failures = Arc::new(AtomicU32::new(0));

        let handle = FrameSourceHandle {
            rx,
            failures: failures.clone(),
            stale_after: config.stale_after,
        };

        let thread_stop = stop.clone();
        let thread = std::thread::Builder::new()
            .name("janus-capture".into())
            .spawn(move || capture_loop(backend, config, tx, thread_stop, failures))
            .expect("failed to spawn capture thread");

        Self { stop, thread: Some(thread), handle }
    }

    /// A read handle; cheap to clone and hand to consumers.
    pub fn handle(&self) -> FrameSourceHandle {
        self.handle.clone()
    }

    /// Stop the capture thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn capture_loop(
    mut backend: impl CaptureBackend,
    config: SourceConfig,
    tx: watch::Sender<Option<Arc<Frame>>>,
    stop: Arc<AtomicBool>,
    failures: Arc<AtomicU32>,
) {
    tracing::info!("capture thread started");
    let mut sequence: u64 = 0;
    let mut warmup_left = config.warmup_frames;
    let mut retry_delay = RETRY_BASE;

    while !stop.load(Ordering::Relaxed) {
        let started = std::time::Instant::now();
        match backend.capture() {
            Ok(mut frame) => {
                failures.store(0, Ordering::Relaxed);
                retry_delay = RETRY_BASE;

                if warmup_left > 0 {
                    warmup_left -= 1;
                    tracing::debug!(remaining = warmup_left, "discarding warmup frame");
                    continue;
                }

                sequence += 1;
                frame.sequence = sequence;
                tx.send_replace(Some(Arc::new(frame)));

                let elapsed = started.elapsed();
                if elapsed < config.min_capture_interval {
                    std::thread::sleep(config.min_capture_interval - elapsed);
                }
            }
            Err(e) => {
                let count = failures.fetch_add(1, Ordering::Relaxed) + 1;
                if count == FAILURES_WARN_AT {
                    tracing::warn!(error = %e, consecutive = count, "camera capture failing");
                } else {
                    tracing::debug!(error = %e, consecutive = count, "camera capture failed");
                }
                std::thread::sleep(retry_delay);
                retry_delay = (retry_delay * 2).min(RETRY_MAX);
            }
        }
    }
    tracing::info!("capture thread exiting");
}
