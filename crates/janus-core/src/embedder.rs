//! ArcFace face embedder via ONNX Runtime.
//!
//! Extracts 512-dimensional face embeddings from face crops using the
//! w600k_mbf (MobileFaceNet) ArcFace model. Crops are taken with a fixed
//! margin around the detected box and resized to 112x112; no landmark
//! alignment is performed, matching the detector's landmark-free output.

use crate::detector::FaceBox;
use crate::imageops;
use crate::types::Embedding;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (different from UltraFace!) ---
const EMBED_INPUT_SIZE: usize = 112;
const EMBED_MEAN: f32 = 127.5;
const EMBED_STD: f32 = 127.5;
const EMBED_CROP_MARGIN: f32 = 0.15;

/// Embedding dimensionality produced by the model.
pub const EMBEDDING_DIM: usize = 512;

/// Model file name expected under the model directory.
pub const EMBEDDER_MODEL_FILE: &str = "w600k_mbf.onnx";

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0} — download w600k_mbf from insightface and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer too short: expected {expected} bytes, got {actual}")]
    BadFrame { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-MBF face embedder.
pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load the ArcFace-MBF ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace-MBF model"
        );

        Ok(Self { session })
    }

    /// Extract an L2-normalized embedding for one detected face.
    pub fn embed(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        face: &FaceBox,
    ) -> Result<Embedding, EmbedderError> {
        let expected = width as usize * height as usize * 3;
        if width == 0 || height == 0 || rgb.len() < expected {
            return Err(EmbedderError::BadFrame { expected, actual: rgb.len() });
        }

        let (x0, y0, side) =
            square_crop_region(face, width as usize, height as usize, EMBED_CROP_MARGIN);
        let crop = imageops::crop_rgb(rgb, width as usize, x0, y0, side, side);
        let aligned =
            imageops::resize_rgb_bilinear(&crop, side, side, EMBED_INPUT_SIZE, EMBED_INPUT_SIZE);

        let input = preprocess(&aligned);
        let outputs =
            self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;
        let raw: Vec<f32> = raw_data.to_vec();

        if raw.len() != EMBEDDING_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding { values: raw }.l2_normalized())
    }
}

/// Expand a face box into a square crop region with the given margin,
/// clamped to the frame bounds.
///
/// Returns (x0, y0, side). The side never exceeds the smaller frame
/// dimension and is at least 1 pixel.
fn square_crop_region(
    face: &FaceBox,
    frame_w: usize,
    frame_h: usize,
    margin: f32,
) -> (usize, usize, usize) {
    let cx = (face.x1 + face.x2) / 2.0;
    let cy = (face.y1 + face.y2) / 2.0;
    let longest = face.width().max(face.height());
    let side_f = longest * (1.0 + 2.0 * margin);

    let max_side = frame_w.min(frame_h);
    let side = (side_f.round() as usize).clamp(1, max_side);

    let half = side as f32 / 2.0;
    let x0 = (cx - half).round().max(0.0) as usize;
    let y0 = (cy - half).round().max(0.0) as usize;
    let x0 = x0.min(frame_w - side);
    let y0 = y0.min(frame_h - side);

    (x0, y0, side)
}

/// Preprocess a 112x112 RGB crop into a normalized NCHW float tensor.
fn preprocess(aligned: &[u8]) -> Array4<f32> {
    let size = EMBED_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..size {
        for x in 0..size {
            let base = (y * size + x) * 3;
            for c in 0..3 {
                let pixel = aligned.get(base + c).copied().unwrap_or(0) as f32;
                tensor[[0, c, y, x]] = (pixel - EMBED_MEAN) / EMBED_STD;
            }
        }
    }

    tensor
}
