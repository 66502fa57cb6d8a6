//! ArcFace-family face encoder via ONNX Runtime.
//!
//! Produces a 512-dimensional L2-normalized embedding from a
//! margin-expanded square crop of a detected face region.

use crate::detector::FaceRegion;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use mien_core::Embedding;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

pub(crate) const ENCODER_MODEL_FILE: &str = "w600k_r50.onnx";
pub(crate) const ENCODER_MODEL_VERSION: &str = "w600k_r50";

const INPUT_SIZE: u32 = 112;
// Symmetric normalization: ArcFace uses std 127.5, not 128.
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;
const EMBEDDING_DIM: usize = 512;
/// Fraction of the region's longer side added as context on each edge
/// before encoding.
const CROP_MARGIN: f32 = 0.15;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("encoder model not found: {0}")]
    ModelNotFound(String),
    #[error("encoder inference failed: {0}")]
    Inference(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceEncoder {
    session: Session,
}

impl FaceEncoder {
    /// Load the encoder model, failing fast when the file is missing.
    pub fn load(model_path: &Path) -> Result<Self, EncodeError> {
        if !model_path.exists() {
            return Err(EncodeError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            version = ENCODER_MODEL_VERSION,
            "encoder model loaded"
        );

        Ok(Self { session })
    }

    /// Embed the face in `region` of `image`.
    ///
    /// The output carries the encoder's model version so embeddings from
    /// a different profile can never be confused with these.
    pub fn encode(
        &mut self,
        image: &DynamicImage,
        region: &FaceRegion,
    ) -> Result<Embedding, EncodeError> {
        let crop = crop_face(image, region);
        let input = preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncodeError::Inference(format!("embedding output: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(EncodeError::Inference(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: l2_normalize(raw),
            model_version: Some(ENCODER_MODEL_VERSION.to_string()),
        })
    }
}

/// Expand the detection to a margin-padded square, clamp it to the image
/// bounds, and resize the crop to the encoder input size.
fn crop_face(image: &DynamicImage, region: &FaceRegion) -> RgbImage {
    let image_w = image.width() as f32;
    let image_h = image.height() as f32;

    let longer = (region.x2 - region.x1)
        .max(region.y2 - region.y1)
        .max(1.0);
    let side = longer * (1.0 + 2.0 * CROP_MARGIN);
    let center_x = (region.x1 + region.x2) / 2.0;
    let center_y = (region.y1 + region.y2) / 2.0;

    let x = (center_x - side / 2.0).clamp(0.0, (image_w - 1.0).max(0.0));
    let y = (center_y - side / 2.0).clamp(0.0, (image_h - 1.0).max(0.0));
    let crop_w = side.min(image_w - x).max(1.0);
    let crop_h = side.min(image_h - y).max(1.0);

    image
        .crop_imm(x as u32, y as u32, crop_w as u32, crop_h as u32)
        .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
        .to_rgb8()
}

/// Normalize an RGB crop into the NCHW tensor the encoder expects.
fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let size = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for channel in 0..3 {
            tensor[[0, channel, y as usize, x as usize]] =
                (pixel[channel] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|v| v / norm).collect()
    } else {
        raw.to_vec()
    }
}
