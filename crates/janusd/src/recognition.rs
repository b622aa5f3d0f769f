//! The recognition loop.
//!
//! One long-lived task, independent of request serving: pull the latest
//! frame, extract an embedding, match against the gallery snapshot, and
//! trigger the door on a qualifying match. A failure on one cycle is
//! logged and the loop proceeds; a camera that stays dark backs off with
//! increasing delay instead of spinning.

use crate::door::{DoorController, DoorError, TriggerSource};
use crate::engine::EngineHandle;
use chrono::{DateTime, Utc};
use janus_core::{CosineMatcher, ExtractOutcome, Matcher};
use janus_hw::FrameSourceHandle;
use janus_store::GalleryCache;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Ceiling for the no-frame backoff delay.
const BACKOFF_CAP: Duration = Duration::from_secs(5);
/// Consecutive frame misses before the loop logs at warn level.
const MISSES_WARN_AT: u32 = 10;

/// Loop tuning, taken from the daemon config.
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    pub match_threshold: f32,
    pub cooldown: Duration,
    pub poll_interval: Duration,
}

/// Most recent positive match, published for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct LastMatch {
    pub name: String,
    pub score: f32,
    pub at: DateTime<Utc>,
}

pub struct RecognitionLoop {
    frames: FrameSourceHandle,
    engine: EngineHandle,
    gallery: GalleryCache,
    door: DoorController,
    config: RecognitionConfig,
    stop: watch::Receiver<bool>,
    match_tx: watch::Sender<Option<LastMatch>>,
}

impl RecognitionLoop {
    pub fn new(
        frames: FrameSourceHandle,
        engine: EngineHandle,
        gallery: GalleryCache,
        door: DoorController,
        config: RecognitionConfig,
        stop: watch::Receiver<bool>,
    ) -> (Self, watch::Receiver<Option<LastMatch>>) {
        let (match_tx, match_rx) = watch::channel(None);
        let this = Self { frames, engine, gallery, door, config, stop, match_tx };
        (this, match_rx)
    }

    pub async fn run(mut self) {
        tracing::info!(
            threshold = self.config.match_threshold,
            cooldown_ms = self.config.cooldown.as_millis() as u64,
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "recognition loop started"
        );

        // Per-identity timestamps of the last qualifying match. Recorded
        // even when the actuator rejects the call, so a busy door never
        // turns into a tight retry storm.
        let mut cooldowns: HashMap<String, Instant> = HashMap::new();
        let mut last_sequence = 0u64;
        let mut misses = 0u32;

        loop {
            if *self.stop.borrow() {
                break;
            }

            let Some(frame) = self.frames.latest() else {
                misses = misses.saturating_add(1);
                if misses == MISSES_WARN_AT {
                    tracing::warn!(
                        consecutive = misses,
                        camera_failures = self.frames.consecutive_failures(),
                        "no frames from camera; backing off"
                    );
                }
                self.pause(backoff_delay(self.config.poll_interval, misses)).await;
                continue;
            };
            if misses >= MISSES_WARN_AT {
                tracing::info!("camera frames available again");
            }
            misses = 0;

            // Same frame as last cycle: the camera is slower than the
            // loop, nothing new to look at.
            if frame.sequence == last_sequence {
                self.pause(self.config.poll_interval).await;
                continue;
            }
            last_sequence = frame.sequence;

            let outcome = match self.engine.extract(frame.clone()).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Per-cycle isolation: log with context, never terminate.
                    tracing::warn!(error = %e, sequence = frame.sequence, "extraction failed; skipping cycle");
                    self.pause(self.config.poll_interval).await;
                    continue;
                }
            };

            let ExtractOutcome::Face(embedding) = outcome else {
                tracing::debug!(sequence = frame.sequence, "no face in frame");
                self.pause(self.config.poll_interval).await;
                continue;
            };

            let gallery = self.gallery.snapshot();
            let result =
                CosineMatcher.best_match(&embedding, &gallery, self.config.match_threshold);

            match (result.matched, result.name) {
                (true, Some(name)) => {
                    self.match_tx.send_replace(Some(LastMatch {
                        name: name.clone(),
                        score: result.score,
                        at: Utc::now(),
                    }));
                    self.maybe_open(&mut cooldowns, name, result.score).await;
                }
                _ => {
                    tracing::debug!(score = result.score, "no gallery match");
                }
            }

            self.pause(self.config.poll_interval).await;
        }

        tracing::info!("recognition loop stopped");
    }

    /// Trigger the door unless the identity is inside its cooldown window.
    async fn maybe_open(
        &self,
        cooldowns: &mut HashMap<String, Instant>,
        name: String,
        score: f32,
    ) {
        let now = Instant::now();
        let ready = cooldowns
            .get(&name)
            .map_or(true, |last| now.duration_since(*last) >= self.config.cooldown);

        if !ready {
            tracing::debug!(name = %name, "match inside cooldown window; trigger suppressed");
            return;
        }

        cooldowns.insert(name.clone(), now);
        tracing::info!(name = %name, score, "recognized enrolled face; triggering door");

        match self.door.open(TriggerSource::Recognition).await {
            Ok(()) => {}
            Err(DoorError::AlreadyInProgress(state)) => {
                tracing::debug!(?state, "door busy; recognition trigger skipped");
            }
            Err(e) => {
                tracing::error!(error = %e, "recognition-triggered actuation failed");
            }
        }
    }

    /// Sleep for `delay`, waking early on the stop signal.
    async fn pause(&mut self, delay: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.stop.changed() => {}
        }
    }
}

/// Exponential backoff from the poll interval, capped at [`BACKOFF_CAP`].
fn backoff_delay(poll_interval: Duration, misses: u32) -> Duration {
    let exp = misses.saturating_sub(1).min(5);
    (poll_interval * 2u32.pow(exp)).min(BACKOFF_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::door::testing::FakeLock;
    use crate::engine::spawn_test_engine;
    use janus_core::Embedding;
    use janus_hw::{CameraError, CaptureBackend, Frame, FrameSource, SourceConfig};
    use janus_store::{EmbeddingSealer, Store};
    use std::sync::Arc;

    /// Backend that fails the first `fail_first` captures, then produces
    /// frames forever.
    struct FlakyBackend {
        fail_first: u32,
        count: u32,
    }

    impl CaptureBackend for FlakyBackend {
        fn capture(&mut self) -> Result<Frame, CameraError> {
            self.count += 1;
            if self.count <= self.fail_first {
                return Err(CameraError::CaptureFailed("scripted".into()));
            }
            Ok(Frame {
                rgb: vec![0u8; 4 * 4 * 3],
                width: 4,
                height: 4,
                sequence: 0,
                captured_at: std::time::Instant::now(),
            })
        }
    }

    struct Harness {
        lock: Arc<FakeLock>,
        stop_tx: watch::Sender<bool>,
        match_rx: watch::Receiver<Option<LastMatch>>,
        task: tokio::task::JoinHandle<()>,
        _source: FrameSource,
    }

    async fn start_loop(
        fail_first: u32,
        enrolled: Vec<(&str, Vec<f32>)>,
        probe: Vec<f32>,
        config: RecognitionConfig,
    ) -> Harness {
        let store = Store::open_in_memory(Arc::new(EmbeddingSealer::new(&[9u8; 32])))
            .await
            .unwrap();
        for (name, values) in enrolled {
            store
                .gallery()
                .append(name, &Embedding { values })
                .await
                .unwrap();
        }
        let gallery = GalleryCache::load(store.gallery().clone()).await.unwrap();

        let source = FrameSource::spawn(
            FlakyBackend { fail_first, count: 0 },
            SourceConfig {
                stale_after: Duration::from_secs(5),
                min_capture_interval: Duration::from_millis(1),
                warmup_frames: 0,
            },
        );

        let engine = spawn_test_engine(
            move |_frame| Ok(ExtractOutcome::Face(Embedding { values: probe.clone() })),
            |_attempts| panic!("enroll not used in loop tests"),
        );

        let lock = FakeLock::new();
        let (door, _door_status) =
            DoorController::new(lock.clone(), Duration::from_millis(10));

        let (stop_tx, stop_rx) = watch::channel(false);
        let (rec_loop, match_rx) =
            RecognitionLoop::new(source.handle(), engine, gallery, door, config, stop_rx);
        let task = tokio::spawn(rec_loop.run());

        Harness { lock, stop_tx, match_rx, task, _source: source }
    }

    fn fast_config(cooldown: Duration) -> RecognitionConfig {
        RecognitionConfig {
            match_threshold: 0.6,
            cooldown,
            poll_interval: Duration::from_millis(5),
        }
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_match_triggers_exactly_once_within_cooldown() {
        // Gallery has alice with embedding E; every frame yields E.
        let h = start_loop(
            0,
            vec![("alice", vec![1.0, 0.0])],
            vec![1.0, 0.0],
            fast_config(Duration::from_secs(30)),
        )
        .await;

        wait_for(|| h.lock.actuations() >= 1).await;
        // Many more cycles run; the cooldown must suppress them all.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.lock.actuations(), 1);

        let last = h.match_rx.borrow().clone().expect("match published");
        assert_eq!(last.name, "alice");
        assert!(last.score > 0.99);

        h.stop_tx.send(true).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_cooldown_expiry_allows_retrigger() {
        let h = start_loop(
            0,
            vec![("alice", vec![1.0, 0.0])],
            vec![1.0, 0.0],
            fast_config(Duration::from_millis(50)),
        )
        .await;

        wait_for(|| h.lock.actuations() >= 2).await;
        h.stop_tx.send(true).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_below_threshold_never_triggers() {
        // Probe is orthogonal to the only enrolled embedding.
        let h = start_loop(
            0,
            vec![("bob", vec![0.0, 1.0])],
            vec![1.0, 0.0],
            fast_config(Duration::from_secs(30)),
        )
        .await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.lock.actuations(), 0);
        assert!(h.match_rx.borrow().is_none());

        h.stop_tx.send(true).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_survives_camera_failures_then_recovers() {
        // First captures fail; the loop must keep cycling and trigger
        // once frames arrive.
        let h = start_loop(
            3,
            vec![("alice", vec![1.0, 0.0])],
            vec![1.0, 0.0],
            fast_config(Duration::from_secs(30)),
        )
        .await;

        wait_for(|| h.lock.actuations() >= 1).await;
        h.stop_tx.send(true).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_signal_terminates_loop() {
        let h = start_loop(
            0,
            vec![],
            vec![1.0, 0.0],
            fast_config(Duration::from_secs(30)),
        )
        .await;

        h.stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), h.task)
            .await
            .expect("loop did not stop in time")
            .unwrap();
    }

    #[test]
    fn test_backoff_delay_grows_and_caps() {
        let poll = Duration::from_millis(200);
        assert_eq!(backoff_delay(poll, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(poll, 2), Duration::from_millis(400));
        assert_eq!(backoff_delay(poll, 3), Duration::from_millis(800));
        assert_eq!(backoff_delay(poll, 100), BACKOFF_CAP);
    }
}
