//! Frame-to-embedding pipeline: detect, pick the candidate face, embed.

use crate::detector::{DetectorError, FaceBox, FaceDetector, DETECTOR_MODEL_FILE};
use crate::embedder::{EmbedderError, FaceEmbedder, EMBEDDER_MODEL_FILE};
use crate::types::Embedding;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedderError),
}

/// Outcome of one extraction attempt.
///
/// "No face in frame" is an expected steady-state result, not an error.
#[derive(Debug, Clone)]
pub enum ExtractOutcome {
    Face(Embedding),
    NoFace,
}

/// Detection + embedding pipeline over a single RGB frame.
///
/// When a frame contains several faces, the largest detected region (the
/// face closest to the camera) is the candidate; the rest are ignored.
pub struct FeatureExtractor {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl FeatureExtractor {
    /// Load both models from the given model directory.
    pub fn load(model_dir: &Path) -> Result<Self, ExtractorError> {
        let detector_path = model_dir.join(DETECTOR_MODEL_FILE);
        let embedder_path = model_dir.join(EMBEDDER_MODEL_FILE);

        let detector = FaceDetector::load(&detector_path.to_string_lossy())?;
        let embedder = FaceEmbedder::load(&embedder_path.to_string_lossy())?;
        Ok(Self { detector, embedder })
    }

    /// Detect faces and return the candidate region, if any.
    pub fn detect_candidate(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<FaceBox>, ExtractorError> {
        let mut boxes = self.detector.detect(rgb, width, height)?;
        if boxes.is_empty() {
            return Ok(None);
        }
        Ok(Some(boxes.swap_remove(0)))
    }

    /// Run the full pipeline on one frame.
    pub fn extract(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<ExtractOutcome, ExtractorError> {
        match self.detect_candidate(rgb, width, height)? {
            None => Ok(ExtractOutcome::NoFace),
            Some(face) => {
                tracing::debug!(
                    area = face.area(),
                    score = face.score,
                    "extracting embedding for candidate face"
                );
                let embedding = self.embedder.embed(rgb, width, height, &face)?;
                Ok(ExtractOutcome::Face(embedding))
            }
        }
    }

    /// Embed a specific face region (used by enrollment, which tracks the
    /// best candidate across several frames before embedding once).
    pub fn embed_region(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        face: &FaceBox,
    ) -> Result<Embedding, ExtractorError> {
        Ok(self.embedder.embed(rgb, width, height, face)?)
    }
}
