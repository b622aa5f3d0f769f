//! Extraction engine on a dedicated OS thread.
//!
//! The ONNX sessions live on one thread with an mpsc request queue in
//! front. Extraction latency is unbounded (model dependent), so keeping
//! it off the async runtime keeps door commands and stream serving
//! responsive while inference is in flight. The thread does not own the
//! camera; enrollment pulls frames from the shared frame source.

use janus_core::{Embedding, ExtractOutcome, FaceBox, FeatureExtractor};
use janus_hw::{Frame, FrameSourceHandle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Spacing between enrollment capture attempts, long enough for a
/// distinct frame at the default capture cadence.
const ENROLL_ATTEMPT_SPACING: Duration = Duration::from_millis(150);
/// Detection score floor for an enrollment candidate.
const ENROLL_MIN_SCORE: f32 = 0.8;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("extractor error: {0}")]
    Extractor(#[from] janus_core::ExtractorError),
    #[error("no face detected in any captured frame")]
    NoFaceDetected,
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from async tasks to the engine thread.
pub(crate) enum EngineRequest {
    Extract {
        frame: Arc<Frame>,
        reply: oneshot::Sender<Result<ExtractOutcome, EngineError>>,
    },
    Enroll {
        attempts: usize,
        reply: oneshot::Sender<Result<Embedding, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run detection + embedding over one frame.
    pub async fn extract(&self, frame: Arc<Frame>) -> Result<ExtractOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Extract { frame, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Capture several frames and extract an embedding from the best
    /// candidate face (largest region above the score floor).
    pub async fn enroll(&self, attempts: usize) -> Result<Embedding, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll { attempts, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    #[cfg(test)]
    pub(crate) fn from_channel(tx: mpsc::Sender<EngineRequest>) -> Self {
        Self { tx }
    }
}

/// Load the models and spawn the engine thread. Fails fast if either
/// model is missing.
pub fn spawn_engine(
    model_dir: &Path,
    frames: FrameSourceHandle,
) -> Result<EngineHandle, EngineError> {
    let mut extractor = FeatureExtractor::load(model_dir)?;
    tracing::info!(dir = %model_dir.display(), "extraction models loaded");

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("janus-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Extract { frame, reply } => {
                        let result = extractor
                            .extract(&frame.rgb, frame.width, frame.height)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Enroll { attempts, reply } => {
                        let result = run_enroll(&mut extractor, &frames, attempts);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

/// Pull up to `attempts` distinct frames, track the best candidate face,
/// embed it once at the end.
fn run_enroll(
    extractor: &mut FeatureExtractor,
    frames: &FrameSourceHandle,
    attempts: usize,
) -> Result<Embedding, EngineError> {
    let mut best: Option<(Arc<Frame>, FaceBox)> = None;
    let mut last_sequence = 0u64;

    for attempt in 0..attempts {
        if attempt > 0 {
            std::thread::sleep(ENROLL_ATTEMPT_SPACING);
        }

        let Some(frame) = frames.latest() else {
            tracing::debug!(attempt, "enroll: no frame available");
            continue;
        };
        if frame.sequence == last_sequence {
            continue;
        }
        last_sequence = frame.sequence;

        match extractor.detect_candidate(&frame.rgb, frame.width, frame.height) {
            Ok(Some(face)) if face.score >= ENROLL_MIN_SCORE => {
                let replace = best
                    .as_ref()
                    .map_or(true, |(_, prev)| face.area() > prev.area());
                if replace {
                    tracing::debug!(
                        attempt,
                        score = face.score,
                        area = face.area(),
                        "enroll: new best candidate"
                    );
                    best = Some((frame, face));
                }
            }
            Ok(Some(face)) => {
                tracing::debug!(attempt, score = face.score, "enroll: candidate below score floor");
            }
            Ok(None) => {
                tracing::debug!(attempt, "enroll: no face in frame");
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "enroll: detection failed");
            }
        }
    }

    let (frame, face) = best.ok_or(EngineError::NoFaceDetected)?;
    tracing::info!(score = face.score, "enroll: extracting embedding for best candidate");
    Ok(extractor.embed_region(&frame.rgb, frame.width, frame.height, &face)?)
}

#[cfg(test)]
pub(crate) fn spawn_test_engine<E, N>(mut on_extract: E, mut on_enroll: N) -> EngineHandle
where
    E: FnMut(Arc<Frame>) -> Result<ExtractOutcome, EngineError> + Send + 'static,
    N: FnMut(usize) -> Result<Embedding, EngineError> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    tokio::spawn(async move {
        while let Some(req) = rx.recv().await {
            match req {
                EngineRequest::Extract { frame, reply } => {
                    let _ = reply.send(on_extract(frame));
                }
                EngineRequest::Enroll { attempts, reply } => {
                    let _ = reply.send(on_enroll(attempts));
                }
            }
        }
    });
    EngineHandle::from_channel(tx)
}
