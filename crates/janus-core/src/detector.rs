//! UltraFace face detector via ONNX Runtime.
//!
//! Runs the version-RFB-320 UltraFace model: RGB resize to 320x240,
//! score/box decode over the flat anchor list, IoU-based NMS. Boxes are
//! returned largest-first so callers can apply the closest-face policy
//! by taking the head of the list.

use crate::imageops;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const ULTRAFACE_INPUT_WIDTH: usize = 320;
const ULTRAFACE_INPUT_HEIGHT: usize = 240;
const ULTRAFACE_MEAN: f32 = 127.0;
const ULTRAFACE_SCALE: f32 = 1.0 / 128.0;
const ULTRAFACE_SCORE_THRESHOLD: f32 = 0.7;
const ULTRAFACE_NMS_THRESHOLD: f32 = 0.3;

/// Model file name expected under the model directory.
pub const DETECTOR_MODEL_FILE: &str = "version-RFB-320.onnx";

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download version-RFB-320 from the UltraFace release and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer too short: expected {expected} bytes, got {actual}")]
    BadFrame { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A detected face region in original frame coordinates.
#[derive(Debug, Clone)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
}

impl FaceBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    /// Pixel area of the region. The recognition policy treats the
    /// largest region as the face closest to the camera.
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// Output tensor indices: (scores_idx, boxes_idx).
type OutputIndices = (usize, usize);

/// UltraFace-based face detector.
pub struct FaceDetector {
    session: Session,
    output_indices: OutputIndices,
}

impl FaceDetector {
    /// Load the UltraFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded UltraFace model"
        );

        if output_names.len() < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "UltraFace model requires 2 outputs (scores, boxes), got {}",
                output_names.len()
            )));
        }

        let output_indices = discover_output_indices(&output_names);
        tracing::debug!(?output_indices, "UltraFace output tensor mapping");

        Ok(Self { session, output_indices })
    }

    /// Detect faces in a packed RGB frame, returning boxes sorted by area
    /// descending.
    pub fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceBox>, DetectorError> {
        let expected = width as usize * height as usize * 3;
        if width == 0 || height == 0 || rgb.len() < expected {
            return Err(DetectorError::BadFrame { expected, actual: rgb.len() });
        }

        let input = preprocess(rgb, width as usize, height as usize);
        let outputs =
            self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (scores_idx, boxes_idx) = self.output_indices;
        let (_, scores) = outputs[scores_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[boxes_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        let detections = decode_detections(
            scores,
            boxes,
            width as f32,
            height as f32,
            ULTRAFACE_SCORE_THRESHOLD,
        );

        let mut kept = nms(detections, ULTRAFACE_NMS_THRESHOLD);
        order_largest_first(&mut kept);
        Ok(kept)
    }
}

/// Discover output tensor ordering by name.
///
/// UltraFace exports name their outputs "scores" and "boxes"; fall back to
/// positional ordering [0]=scores, [1]=boxes when the names differ.
fn discover_output_indices(names: &[String]) -> OutputIndices {
    let scores = names.iter().position(|n| n == "scores");
    let boxes = names.iter().position(|n| n == "boxes");
    match (scores, boxes) {
        (Some(s), Some(b)) => (s, b),
        _ => {
            tracing::info!(
                ?names,
                "UltraFace: output names not recognized, using positional mapping [0]=scores, [1]=boxes"
            );
            (0, 1)
        }
    }
}

/// Build the normalized NCHW input tensor from a packed RGB frame.
fn preprocess(rgb: &[u8], width: usize, height: usize) -> Array4<f32> {
    let resized = imageops::resize_rgb_bilinear(
        rgb,
        width,
        height,
        ULTRAFACE_INPUT_WIDTH,
        ULTRAFACE_INPUT_HEIGHT,
    );

    let mut tensor =
        Array4::<f32>::zeros((1, 3, ULTRAFACE_INPUT_HEIGHT, ULTRAFACE_INPUT_WIDTH));
    for y in 0..ULTRAFACE_INPUT_HEIGHT {
        for x in 0..ULTRAFACE_INPUT_WIDTH {
            let base = (y * ULTRAFACE_INPUT_WIDTH + x) * 3;
            for c in 0..3 {
                tensor[[0, c, y, x]] = (resized[base + c] as f32 - ULTRAFACE_MEAN) * ULTRAFACE_SCALE;
            }
        }
    }

    tensor
}

/// Decode the flat anchor outputs into frame-space boxes.
///
/// `scores` holds [background, face] pairs per anchor; `boxes` holds
/// normalized corner coordinates [x1, y1, x2, y2] in [0, 1].
fn decode_detections(
    scores: &[f32],
    boxes: &[f32],
    frame_w: f32,
    frame_h: f32,
    threshold: f32,
) -> Vec<FaceBox> {
    let num_anchors = scores.len() / 2;
    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores[idx * 2 + 1];
        if score <= threshold {
            continue;
        }

        let off = idx * 4;
        if off + 3 >= boxes.len() {
            continue;
        }

        let x1 = boxes[off].clamp(0.0, 1.0) * frame_w;
        let y1 = boxes[off + 1].clamp(0.0, 1.0) * frame_h;
        let x2 = boxes[off + 2].clamp(0.0, 1.0) * frame_w;
        let y2 = boxes[off + 3].clamp(0.0, 1.0) * frame_h;
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        detections.push(FaceBox { x1, y1, x2, y2, score });
    }

    detections
}

/// Non-Maximum Suppression: remove overlapping detections, keeping the
/// higher-scoring box of each overlapping pair.
fn nms(mut detections: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    detections.sort_by(|a, b| {
        b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }
            if iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Sort boxes by pixel area, largest first.
fn order_largest_first(boxes: &mut [FaceBox]) {
    boxes.sort_by(|a, b| {
        b.area().partial_cmp(&a.area()).unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Compute Intersection-over-Union between two boxes.
fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter_w = (x2 - x1).max(0.0);
    let inter_h = (y2 - y1).max(0.0);
    let inter_area = inter_w * inter_h;

    let union_area = a.area() + b.area() - inter_area;
    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> FaceBox {
        FaceBox { x1, y1, x2, y2, score }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_box(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = make_box(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_box(20.0, 20.0, 30.0, 30.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_box(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_box(5.0, 0.0, 15.0, 10.0, 1.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        let expected = 50.0 / 150.0;
        assert!((iou(&a, &b) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_box(0.0, 0.0, 100.0, 100.0, 0.9),
            make_box(5.0, 5.0, 105.0, 105.0, 0.8),
            make_box(200.0, 200.0, 250.0, 250.0, 0.7),
        ];
        let result = nms(detections, 0.3);
        assert_eq!(result.len(), 2);
        assert!((result[0].score - 0.9).abs() < 1e-6);
        assert!((result[1].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.3).is_empty());
    }

    #[test]
    fn test_decode_filters_by_threshold() {
        // Two anchors: one confident face, one background.
        let scores = vec![0.1, 0.9, 0.95, 0.05];
        let boxes = vec![
            0.1, 0.1, 0.5, 0.5, //
            0.2, 0.2, 0.6, 0.6,
        ];
        let dets = decode_detections(&scores, &boxes, 320.0, 240.0, 0.7);
        assert_eq!(dets.len(), 1);
        assert!((dets[0].score - 0.9).abs() < 1e-6);
        assert!((dets[0].x1 - 32.0).abs() < 1e-4);
        assert!((dets[0].y1 - 24.0).abs() < 1e-4);
        assert!((dets[0].x2 - 160.0).abs() < 1e-4);
        assert!((dets[0].y2 - 120.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_clamps_out_of_range_coordinates() {
        let scores = vec![0.0, 0.99];
        let boxes = vec![-0.2, -0.1, 1.3, 1.1];
        let dets = decode_detections(&scores, &boxes, 100.0, 100.0, 0.7);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].x1, 0.0);
        assert_eq!(dets[0].y1, 0.0);
        assert_eq!(dets[0].x2, 100.0);
        assert_eq!(dets[0].y2, 100.0);
    }

    #[test]
    fn test_decode_drops_degenerate_boxes() {
        let scores = vec![0.0, 0.99];
        let boxes = vec![0.5, 0.5, 0.5, 0.5]; // zero area
        let dets = decode_detections(&scores, &boxes, 100.0, 100.0, 0.7);
        assert!(dets.is_empty());
    }

    #[test]
    fn test_order_largest_first() {
        let mut boxes = vec![
            make_box(0.0, 0.0, 10.0, 10.0, 0.99), // area 100, highest score
            make_box(0.0, 0.0, 50.0, 50.0, 0.8),  // area 2500
            make_box(0.0, 0.0, 30.0, 30.0, 0.9),  // area 900
        ];
        order_largest_first(&mut boxes);
        assert!((boxes[0].area() - 2500.0).abs() < 1e-3);
        assert!((boxes[1].area() - 900.0).abs() < 1e-3);
        assert!((boxes[2].area() - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> =
            ["boxes", "scores"].iter().map(|s| s.to_string()).collect();
        assert_eq!(discover_output_indices(&names), (1, 0));
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = ["428", "429"].iter().map(|s| s.to_string()).collect();
        assert_eq!(discover_output_indices(&names), (0, 1));
    }

    #[test]
    fn test_preprocess_shape_and_normalization() {
        // Uniform mid-gray frame: every tensor value is (128-127)/128.
        let rgb = vec![128u8; 64 * 48 * 3];
        let tensor = preprocess(&rgb, 64, 48);
        assert_eq!(
            tensor.shape(),
            &[1, 3, ULTRAFACE_INPUT_HEIGHT, ULTRAFACE_INPUT_WIDTH]
        );
        let expected = (128.0 - ULTRAFACE_MEAN) * ULTRAFACE_SCALE;
        let val = tensor[[0, 0, 0, 0]];
        assert!((val - expected).abs() < 1e-6, "got {val}, expected {expected}");
    }
}
