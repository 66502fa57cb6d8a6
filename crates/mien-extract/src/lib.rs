//! mien-extract — ONNX-backed embedding extraction.
//!
//! Face detection (SCRFD-family) plus an ArcFace-family encoder, both
//! through ONNX Runtime on CPU. The entire configuration — model files,
//! input geometry, confidence gates — is pinned in this crate as the one
//! process-wide extraction profile; nothing here takes per-call model
//! parameters, so gallery and query embeddings always come from the same
//! configuration.

pub mod detector;
pub mod encoder;

use detector::{DetectError, FaceDetector};
use encoder::{EncodeError, FaceEncoder};
use image::DynamicImage;
use mien_core::{DetectionMode, EmbeddingExtractor, Extraction, ExtractorError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Tag of the pinned extraction profile, recorded on every embedding.
pub const PROFILE: &str = "scrfd_10g+w600k_r50@112";

/// Confidence a detection must clear in [`DetectionMode::Strict`].
/// Lenient extraction accepts anything above the detector's decode floor.
const STRICT_CONFIDENCE: f32 = 0.6;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// The production extractor: detector + encoder under [`PROFILE`].
pub struct OnnxExtractor {
    detector: FaceDetector,
    encoder: FaceEncoder,
}

impl OnnxExtractor {
    /// Load both models from `model_dir`.
    ///
    /// Fails fast when either file is missing or unloadable — no request
    /// can succeed without the extractor, so startup is the right place
    /// to find out.
    pub fn load(model_dir: &Path) -> Result<Self, ExtractError> {
        let detector = FaceDetector::load(&model_dir.join(detector::DETECTOR_MODEL_FILE))?;
        let encoder = FaceEncoder::load(&model_dir.join(encoder::ENCODER_MODEL_FILE))?;
        tracing::info!(profile = PROFILE, "extraction profile ready");
        Ok(Self { detector, encoder })
    }

    /// Default model directory for binaries that take no override.
    pub fn default_model_dir() -> PathBuf {
        PathBuf::from("models")
    }
}

impl EmbeddingExtractor for OnnxExtractor {
    fn extract(
        &mut self,
        image: &DynamicImage,
        mode: DetectionMode,
    ) -> Result<Extraction, ExtractorError> {
        let regions = self
            .detector
            .detect(image)
            .map_err(|e| ExtractorError::Backend(e.to_string()))?;

        // Primary detection only; additional faces in the photo are ignored.
        let Some(best) = regions.first() else {
            return Ok(Extraction::NoFace);
        };

        if mode == DetectionMode::Strict && best.confidence < STRICT_CONFIDENCE {
            tracing::debug!(
                confidence = best.confidence,
                gate = STRICT_CONFIDENCE,
                "best detection below strict gate"
            );
            return Ok(Extraction::NoFace);
        }

        let embedding = self
            .encoder
            .encode(image, best)
            .map_err(|e| ExtractorError::Backend(e.to_string()))?;

        Ok(Extraction::Face(embedding))
    }

    fn profile(&self) -> &str {
        PROFILE
    }
}
