use crate::gallery::ReferenceSet;
use crate::types::Embedding;
use serde::Serialize;

/// Outcome of scanning a reference set for the closest embedding.
///
/// Always produced, never partial: an empty reference set yields the
/// sentinel form (`label == None`, similarity 0.0, not confident) rather
/// than an error, and a best candidate that misses the threshold keeps
/// its label and score with `confident == false` so operators can see
/// how close the nearest reference was.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    /// Identity label of the best candidate; `None` only when the
    /// reference set was empty.
    pub label: Option<String>,
    /// Source filename of the best candidate.
    pub source_file: Option<String>,
    /// Cosine similarity of the best candidate, in [-1, 1].
    pub similarity: f32,
    pub confident: bool,
}

impl MatchResult {
    fn sentinel() -> Self {
        Self {
            label: None,
            source_file: None,
            similarity: 0.0,
            confident: false,
        }
    }
}

/// Strategy for comparing a query embedding against a reference set.
pub trait Matcher {
    fn best_match(
        &self,
        query: &Embedding,
        references: &ReferenceSet,
        threshold: f32,
    ) -> MatchResult;
}

/// Exhaustive cosine-similarity matcher.
///
/// Threshold polarity is cosine distance: a candidate is confident iff
/// `1.0 - similarity < threshold`, strictly. Every entry is scanned with
/// no early exit; on equal scores the first entry seen in iteration
/// order wins, though iteration order itself carries no meaning.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn best_match(
        &self,
        query: &Embedding,
        references: &ReferenceSet,
        threshold: f32,
    ) -> MatchResult {
        let mut best: Option<(&crate::gallery::ReferenceEntry, f32)> = None;

        for entry in references.iter() {
            let similarity = query.similarity(&entry.embedding);
            let better = match best {
                Some((_, top)) => similarity > top,
                None => true,
            };
            if better {
                best = Some((entry, similarity));
            }
        }

        match best {
            None => MatchResult::sentinel(),
            Some((entry, similarity)) => MatchResult {
                label: Some(entry.label.clone()),
                source_file: Some(entry.source_file.clone()),
                similarity,
                confident: 1.0 - similarity < threshold,
            },
        }
    }
}
