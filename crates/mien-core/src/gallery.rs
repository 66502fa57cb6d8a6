//! Reference gallery: the startup-built comparison pool and its loader.

use crate::extractor::{DetectionMode, EmbeddingExtractor, Extraction};
use crate::types::Embedding;
use serde::Serialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Raster formats accepted as reference images, matched case-insensitively.
const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("duplicate reference file: {0}")]
    DuplicateSource(String),
    #[error("reference directory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// One enrolled reference face.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceEntry {
    /// Identity label: the source filename with its extension stripped.
    pub label: String,
    /// Full source filename; unique within a set.
    pub source_file: String,
    pub embedding: Embedding,
}

impl ReferenceEntry {
    /// Build an entry from a filename, deriving the label from its stem.
    pub fn from_filename(source_file: &str, embedding: Embedding) -> Self {
        let label = Path::new(source_file)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| source_file.to_string());
        Self {
            label,
            source_file: source_file.to_string(),
            embedding,
        }
    }
}

/// The startup-built, immutable-after-construction comparison pool.
///
/// Entries are kept in insertion order; iteration order is stable but
/// not contractual. The set is shared read-only across requests. A
/// rebuild constructs a fresh set and swaps the owning `Arc`; nothing
/// mutates a published set in place.
#[derive(Debug, Default, Clone)]
pub struct ReferenceSet {
    entries: Vec<ReferenceEntry>,
}

impl ReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, rejecting a duplicate source filename.
    ///
    /// The same identity under several filenames is fine (each file is
    /// its own entry); the same filename twice is a construction error.
    pub fn insert(&mut self, entry: ReferenceEntry) -> Result<(), GalleryError> {
        if self
            .entries
            .iter()
            .any(|existing| existing.source_file == entry.source_file)
        {
            return Err(GalleryError::DuplicateSource(entry.source_file));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReferenceEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Why a reference image was left out of the set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    UnreadableImage(String),
    NoFaceDetected,
    Extractor(String),
}

/// A reference image that did not make it into the set, with the reason
/// recorded for operator visibility.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub file: String,
    pub reason: SkipReason,
}

/// Result of a gallery load: the usable set plus the per-file skips.
#[derive(Debug)]
pub struct GalleryLoad {
    pub references: ReferenceSet,
    pub skipped: Vec<SkippedFile>,
}

/// Build the reference set from a directory of face images.
///
/// One-shot, startup-time operation. A missing directory is created and
/// yields an empty set — the service still starts and answers every
/// query with the no-reference-data outcome. Per-file failures
/// (unreadable image, no detectable face, extractor error) are recorded
/// and skipped; no single file ever aborts the load. Files are visited
/// in filename order so repeated loads of identical contents build
/// identical sets.
///
/// Extraction runs in [`DetectionMode::Lenient`]: reference photos are
/// trusted to contain the labeled person, so the best detection is
/// taken even at low confidence.
pub fn load_reference_set<E>(dir: &Path, extractor: &mut E) -> Result<GalleryLoad, GalleryError>
where
    E: EmbeddingExtractor + ?Sized,
{
    let io_err = |source| GalleryError::Io {
        path: dir.display().to_string(),
        source,
    };

    if !dir.exists() {
        fs::create_dir_all(dir).map_err(io_err)?;
        tracing::warn!(path = %dir.display(), "reference directory missing; created empty");
        return Ok(GalleryLoad {
            references: ReferenceSet::new(),
            skipped: Vec::new(),
        });
    }

    let mut files: Vec<String> = fs::read_dir(dir)
        .map_err(io_err)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| has_image_extension(name))
        .collect();
    files.sort();

    let mut references = ReferenceSet::new();
    let mut skipped = Vec::new();

    for file in files {
        let path = dir.join(&file);
        let image = match image::open(&path) {
            Ok(image) => image,
            Err(err) => {
                tracing::warn!(file, error = %err, "skipping unreadable reference image");
                skipped.push(SkippedFile {
                    file,
                    reason: SkipReason::UnreadableImage(err.to_string()),
                });
                continue;
            }
        };

        match extractor.extract(&image, DetectionMode::Lenient) {
            Ok(Extraction::Face(embedding)) => {
                references.insert(ReferenceEntry::from_filename(&file, embedding))?;
            }
            Ok(Extraction::NoFace) => {
                tracing::warn!(file, "skipping reference image with no detectable face");
                skipped.push(SkippedFile {
                    file,
                    reason: SkipReason::NoFaceDetected,
                });
            }
            Err(err) => {
                tracing::warn!(file, error = %err, "skipping reference image on extractor failure");
                skipped.push(SkippedFile {
                    file,
                    reason: SkipReason::Extractor(err.to_string()),
                });
            }
        }
    }

    tracing::info!(
        path = %dir.display(),
        loaded = references.len(),
        skipped = skipped.len(),
        "reference set loaded"
    );

    Ok(GalleryLoad {
        references,
        skipped,
    })
}

fn has_image_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}
