//! Anchor-free ONNX face detector.
//!
//! Runs an SCRFD-family detection model over a letterboxed RGB photo and
//! decodes per-stride score/box tensors into face regions in original
//! image coordinates. Landmark outputs, when the model exports them, are
//! ignored: downstream encoding crops by box, it does not align.

use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::cmp::Ordering;
use std::path::Path;
use thiserror::Error;

pub(crate) const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub(crate) const DETECTOR_MODEL_VERSION: &str = "scrfd_10g";

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const STRIDES: [u32; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;
/// Decode-time confidence floor. Low on purpose: lenient extraction
/// accepts anything above it, the strict gate lives in the profile.
const SCORE_FLOOR: f32 = 0.3;
const IOU_LIMIT: f32 = 0.4;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("detector inference failed: {0}")]
    Inference(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Axis-aligned face region in original image coordinates.
#[derive(Debug, Clone, Copy)]
pub struct FaceRegion {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceRegion {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &FaceRegion) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let intersection = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Mapping from model input space back to original image coordinates.
struct InputMapping {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

pub struct FaceDetector {
    session: Session,
}

impl FaceDetector {
    /// Load the detection model. Fails when the file is missing: the
    /// service cannot serve a single request without its detector.
    pub fn load(model_path: &Path) -> Result<Self, DetectError> {
        if !model_path.exists() {
            return Err(DetectError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        // 3 strides × (scores, boxes); landmark tensors beyond that are unused.
        if output_names.len() < 6 {
            return Err(DetectError::Inference(format!(
                "detection model exports {} outputs, need at least 6 (scores + boxes per stride)",
                output_names.len()
            )));
        }

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            version = DETECTOR_MODEL_VERSION,
            "detector model loaded"
        );

        Ok(Self { session })
    }

    /// Detect faces in a photo, highest confidence first.
    pub fn detect(&mut self, image: &DynamicImage) -> Result<Vec<FaceRegion>, DetectError> {
        let (input, mapping) = preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (position, &stride) in STRIDES.iter().enumerate() {
            let (_, scores) = outputs[position]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectError::Inference(format!("scores stride {stride}: {e}")))?;
            let (_, deltas) = outputs[position + STRIDES.len()]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectError::Inference(format!("boxes stride {stride}: {e}")))?;

            decode_stride(scores, deltas, stride, &mapping, &mut candidates);
        }

        Ok(suppress(candidates, IOU_LIMIT))
    }
}

/// Letterbox a photo into the square model input as a normalized NCHW
/// tensor. The tensor starts zeroed, and zero is exactly the normalized
/// pixel mean, so the border padding needs no explicit fill.
fn preprocess(image: &DynamicImage) -> (Array4<f32>, InputMapping) {
    let (width, height) = (image.width().max(1), image.height().max(1));
    let side = INPUT_SIZE;

    let scale = (side as f32 / width as f32).min(side as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, side);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, side);
    let pad_x = (side - new_w) / 2;
    let pad_y = (side - new_h) / 2;

    let resized = image
        .resize_exact(new_w, new_h, FilterType::Triangle)
        .to_rgb8();

    let mut tensor = Array4::<f32>::zeros((1, 3, side as usize, side as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x + pad_x) as usize;
        let ty = (y + pad_y) as usize;
        for channel in 0..3 {
            tensor[[0, channel, ty, tx]] = (pixel[channel] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }

    (
        tensor,
        InputMapping {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

/// Decode one stride's score/box tensors into candidate regions.
///
/// Boxes come as per-anchor edge offsets in stride units; anchor centers
/// sit on the stride grid. Results are mapped back through the letterbox
/// into original image coordinates.
fn decode_stride(
    scores: &[f32],
    deltas: &[f32],
    stride: u32,
    mapping: &InputMapping,
    out: &mut Vec<FaceRegion>,
) {
    let grid = (INPUT_SIZE / stride) as usize;
    let anchors = grid * grid * ANCHORS_PER_CELL;

    for idx in 0..anchors.min(scores.len()) {
        let score = scores[idx];
        if score <= SCORE_FLOOR {
            continue;
        }

        let offset = idx * 4;
        if offset + 3 >= deltas.len() {
            break;
        }

        let cell = idx / ANCHORS_PER_CELL;
        let cx = ((cell % grid) as u32 * stride) as f32;
        let cy = ((cell / grid) as u32 * stride) as f32;
        let s = stride as f32;

        let x1 = cx - deltas[offset] * s;
        let y1 = cy - deltas[offset + 1] * s;
        let x2 = cx + deltas[offset + 2] * s;
        let y2 = cy + deltas[offset + 3] * s;

        out.push(FaceRegion {
            x1: (x1 - mapping.pad_x) / mapping.scale,
            y1: (y1 - mapping.pad_y) / mapping.scale,
            x2: (x2 - mapping.pad_x) / mapping.scale,
            y2: (y2 - mapping.pad_y) / mapping.scale,
            confidence: score,
        });
    }
}

/// Non-maximum suppression: keep each candidate only if it does not
/// overlap an already-kept, higher-confidence one. Returns the survivors
/// in descending confidence order.
fn suppress(mut candidates: Vec<FaceRegion>, iou_limit: f32) -> Vec<FaceRegion> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept: Vec<FaceRegion> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|winner| winner.iou(&candidate) <= iou_limit) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> FaceRegion {
        FaceRegion {
            x1,
            y1,
            x2,
            y2,
            confidence,
        }
    }

    #[test]
    fn iou_of_identical_regions_is_one() {
        let a = region(0.0, 0.0, 100.0, 100.0, 0.9);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_regions_is_zero() {
        let a = region(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = region(20.0, 20.0, 30.0, 30.0, 0.9);
        assert!(a.iou(&b).abs() < 1e-6);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = region(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = region(5.0, 0.0, 15.0, 10.0, 0.9);
        // intersection 50, union 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn suppress_drops_overlapping_lower_confidence() {
        let candidates = vec![
            region(5.0, 5.0, 105.0, 105.0, 0.8),
            region(0.0, 0.0, 100.0, 100.0, 0.9),
            region(200.0, 200.0, 250.0, 250.0, 0.7),
        ];
        let kept = suppress(candidates, 0.4);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn suppress_keeps_distant_regions() {
        let candidates = vec![
            region(0.0, 0.0, 10.0, 10.0, 0.9),
            region(50.0, 50.0, 60.0, 60.0, 0.8),
        ];
        assert_eq!(suppress(candidates, 0.4).len(), 2);
    }

    #[test]
    fn suppress_on_empty_input() {
        assert!(suppress(Vec::new(), 0.4).is_empty());
    }

    #[test]
    fn preprocess_shape_and_border() {
        let image = DynamicImage::new_rgb8(320, 240);
        let (tensor, mapping) = preprocess(&image);

        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        // 320x240 scales by 2 to 640x480, padded 80 rows top and bottom.
        assert!((mapping.scale - 2.0).abs() < 1e-6);
        assert!((mapping.pad_y - 80.0).abs() < 1e-6);
        assert!((mapping.pad_x - 0.0).abs() < 1e-6);
        // Border rows stay at the normalized mean (zero).
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 2, 639, 639]], 0.0);
        // Interior pixels of a black image normalize below zero.
        let interior = tensor[[0, 0, 320, 320]];
        assert!((interior - (0.0 - PIXEL_MEAN) / PIXEL_STD).abs() < 1e-6);
    }

    #[test]
    fn decode_stride_maps_back_to_image_space() {
        let stride = 32u32;
        let grid = (INPUT_SIZE / stride) as usize;
        let anchors = grid * grid * ANCHORS_PER_CELL;

        // One hot anchor: cell (2, 3) first anchor, box 1 stride-unit out
        // on each edge.
        let cell = 3 * grid + 2;
        let idx = cell * ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        scores[idx] = 0.95;
        let mut deltas = vec![0.0f32; anchors * 4];
        deltas[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let mapping = InputMapping {
            scale: 2.0,
            pad_x: 0.0,
            pad_y: 80.0,
        };
        let mut out = Vec::new();
        decode_stride(&scores, &deltas, stride, &mapping, &mut out);

        assert_eq!(out.len(), 1);
        let face = &out[0];
        // Anchor center at (64, 96) in input space, edges ±32, then
        // un-letterboxed: x/2, (y-80)/2.
        assert!((face.x1 - 16.0).abs() < 1e-4);
        assert!((face.y1 - (-8.0)).abs() < 1e-4);
        assert!((face.x2 - 48.0).abs() < 1e-4);
        assert!((face.y2 - 24.0).abs() < 1e-4);
        assert!((face.confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn decode_stride_respects_score_floor() {
        let stride = 32u32;
        let grid = (INPUT_SIZE / stride) as usize;
        let anchors = grid * grid * ANCHORS_PER_CELL;
        let scores = vec![SCORE_FLOOR - 0.01; anchors];
        let deltas = vec![1.0f32; anchors * 4];

        let mapping = InputMapping {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let mut out = Vec::new();
        decode_stride(&scores, &deltas, stride, &mapping, &mut out);
        assert!(out.is_empty());
    }
}
