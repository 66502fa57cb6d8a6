//! The extraction seam and the composed identification pipeline.

use crate::gallery::ReferenceSet;
use crate::matcher::{CosineMatcher, MatchResult, Matcher};
use crate::types::Embedding;
use image::DynamicImage;
use serde::Serialize;
use thiserror::Error;

/// Detection strictness for a single extraction call.
///
/// `Lenient` is the gallery-construction mode: reference photos are
/// trusted to contain the labeled person, so the best detection counts
/// even at low confidence. `Strict` is the query mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMode {
    Strict,
    Lenient,
}

/// Extraction outcome: a usable face embedding, or no face located.
///
/// `NoFace` is data, not a failure; backend problems travel through
/// [`ExtractorError`] instead.
#[derive(Debug, Clone)]
pub enum Extraction {
    Face(Embedding),
    NoFace,
}

/// Backend failure inside the embedding extractor.
///
/// Deliberately distinct from [`Extraction::NoFace`]: "try a different
/// photo" and "something is broken" must stay tellable apart, so a
/// backend failure is never coerced into a no-match outcome.
#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("extractor backend failure: {0}")]
    Backend(String),
}

/// Maps an image to a face embedding under one pinned profile.
///
/// Implementations fix their whole configuration (model, detector,
/// input geometry) at construction; no signature in this crate accepts
/// per-call model parameters, which is what keeps load-time and
/// query-time embeddings comparable.
pub trait EmbeddingExtractor {
    fn extract(
        &mut self,
        image: &DynamicImage,
        mode: DetectionMode,
    ) -> Result<Extraction, ExtractorError>;

    /// Tag of the pinned extraction profile.
    fn profile(&self) -> &str;
}

/// Final identification outcome for one submitted image.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Identification {
    /// No face could be located in the query image; the matcher never ran.
    NoFaceDetected,
    /// The reference set is empty, so no comparison was possible.
    NoReferenceData,
    /// Best candidate missed the distance threshold. Label and score are
    /// kept for diagnostics.
    Rejected {
        label: String,
        source_file: String,
        similarity: f32,
    },
    /// Best candidate cleared the distance threshold.
    Confirmed {
        label: String,
        source_file: String,
        similarity: f32,
    },
}

/// Extract a query embedding and match it against the reference set.
///
/// Every expected outcome — no face, empty reference set, rejected,
/// confirmed — comes back as an [`Identification`]; the only `Err` is a
/// genuine extractor backend failure.
pub fn identify<E>(
    extractor: &mut E,
    image: &DynamicImage,
    references: &ReferenceSet,
    threshold: f32,
) -> Result<Identification, ExtractorError>
where
    E: EmbeddingExtractor + ?Sized,
{
    let query = match extractor.extract(image, DetectionMode::Strict)? {
        Extraction::Face(embedding) => embedding,
        Extraction::NoFace => return Ok(Identification::NoFaceDetected),
    };

    let MatchResult {
        label,
        source_file,
        similarity,
        confident,
    } = CosineMatcher.best_match(&query, references, threshold);

    Ok(match (label, source_file) {
        (Some(label), Some(source_file)) if confident => Identification::Confirmed {
            label,
            source_file,
            similarity,
        },
        (Some(label), Some(source_file)) => Identification::Rejected {
            label,
            source_file,
            similarity,
        },
        _ => Identification::NoReferenceData,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::ReferenceEntry;

    /// Stub that returns a fixed extraction outcome regardless of input.
    struct FixedExtractor(Option<Embedding>);

    impl EmbeddingExtractor for FixedExtractor {
        fn extract(
            &mut self,
            _image: &DynamicImage,
            mode: DetectionMode,
        ) -> Result<Extraction, ExtractorError> {
            assert_eq!(mode, DetectionMode::Strict, "queries must extract strictly");
            Ok(match &self.0 {
                Some(embedding) => Extraction::Face(embedding.clone()),
                None => Extraction::NoFace,
            })
        }

        fn profile(&self) -> &str {
            "fixed"
        }
    }

    fn blank_image() -> DynamicImage {
        DynamicImage::new_rgb8(4, 4)
    }

    fn refs(entries: &[(&str, Vec<f32>)]) -> ReferenceSet {
        let mut set = ReferenceSet::new();
        for (file, values) in entries {
            set.insert(ReferenceEntry::from_filename(
                file,
                Embedding::new(values.clone()),
            ))
            .unwrap();
        }
        set
    }

    #[test]
    fn exact_reference_match_is_confirmed() {
        // Two enrolled faces, query identical to one of them, distance
        // threshold 0.4.
        let v1 = vec![0.6, 0.8, 0.0];
        let v2 = vec![0.0, 0.0, 1.0];
        let set = refs(&[("sarah.jpg", v1.clone()), ("peter.jpg", v2)]);
        let mut extractor = FixedExtractor(Some(Embedding::new(v1)));

        let outcome = identify(&mut extractor, &blank_image(), &set, 0.4).unwrap();
        match outcome {
            Identification::Confirmed {
                label,
                source_file,
                similarity,
            } => {
                assert_eq!(label, "sarah");
                assert_eq!(source_file, "sarah.jpg");
                assert!((similarity - 1.0).abs() < 1e-6);
            }
            other => panic!("expected confirmed, got {other:?}"),
        }
    }

    #[test]
    fn no_face_short_circuits_before_matching() {
        // A reference identical to anything would match; NoFace must win
        // because extraction resolves first.
        let set = refs(&[("sarah.jpg", vec![1.0, 0.0])]);
        let mut extractor = FixedExtractor(None);

        let outcome = identify(&mut extractor, &blank_image(), &set, 0.99).unwrap();
        assert!(matches!(outcome, Identification::NoFaceDetected));
    }

    #[test]
    fn empty_reference_set_maps_to_no_reference_data() {
        let mut extractor = FixedExtractor(Some(Embedding::new(vec![1.0, 0.0])));
        let outcome = identify(&mut extractor, &blank_image(), &ReferenceSet::new(), 0.4).unwrap();
        assert!(matches!(outcome, Identification::NoReferenceData));
    }

    #[test]
    fn distant_best_candidate_is_rejected_with_diagnostics() {
        let set = refs(&[("peter.jpg", vec![0.0, 1.0])]);
        let mut extractor = FixedExtractor(Some(Embedding::new(vec![1.0, 0.0])));

        let outcome = identify(&mut extractor, &blank_image(), &set, 0.4).unwrap();
        match outcome {
            Identification::Rejected {
                label,
                source_file,
                similarity,
            } => {
                assert_eq!(label, "peter");
                assert_eq!(source_file, "peter.jpg");
                assert!(similarity.abs() < 1e-6);
            }
            other => panic!("expected rejected, got {other:?}"),
        }
    }

    #[test]
    fn backend_failure_propagates_as_error() {
        struct BrokenExtractor;
        impl EmbeddingExtractor for BrokenExtractor {
            fn extract(
                &mut self,
                _image: &DynamicImage,
                _mode: DetectionMode,
            ) -> Result<Extraction, ExtractorError> {
                Err(ExtractorError::Backend("session lost".into()))
            }
            fn profile(&self) -> &str {
                "broken"
            }
        }

        let set = refs(&[("sarah.jpg", vec![1.0])]);
        let err = identify(&mut BrokenExtractor, &blank_image(), &set, 0.4).unwrap_err();
        assert!(err.to_string().contains("session lost"));
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let outcome = Identification::Confirmed {
            label: "sarah".into(),
            source_file: "sarah.jpg".into(),
            similarity: 1.0,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "confirmed");
        assert_eq!(json["label"], "sarah");

        let json = serde_json::to_value(Identification::NoFaceDetected).unwrap();
        assert_eq!(json["outcome"], "no-face-detected");
    }
}
