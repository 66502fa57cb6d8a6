//! mien-core — Embedding-based face identification engine.
//!
//! Turns images into fixed-length face embeddings through a pinned
//! extractor profile, holds the startup-built reference set, and runs
//! the exhaustive best-match scan with a cosine-distance threshold.

pub mod extractor;
pub mod gallery;
pub mod matcher;
pub mod types;

pub use extractor::{
    identify, DetectionMode, EmbeddingExtractor, Extraction, ExtractorError, Identification,
};
pub use gallery::{load_reference_set, GalleryLoad, ReferenceEntry, ReferenceSet};
pub use matcher::{CosineMatcher, MatchResult, Matcher};
pub use types::Embedding;
