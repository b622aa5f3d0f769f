//! janus-core: face detection and embedding extraction engine.
//!
//! Uses UltraFace for face detection and an ArcFace MobileFaceNet for
//! embedding extraction, both running via ONNX Runtime for CPU inference.

pub mod detector;
pub mod embedder;
pub mod extractor;
pub mod imageops;
pub mod types;

pub use detector::{FaceBox, FaceDetector};
pub use embedder::{FaceEmbedder, EMBEDDING_DIM};
pub use extractor::{ExtractOutcome, ExtractorError, FeatureExtractor};
pub use types::{CosineMatcher, Embedding, EnrolledFace, MatchResult, Matcher};

use std::path::PathBuf;

/// Default directory for the ONNX model files.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/janus/models")
}
