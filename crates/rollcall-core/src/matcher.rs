//! Nearest-neighbour matching of an embedding against known identities.

use crate::types::Embedding;

/// Default same/different cutoff for [`EuclideanMatcher`].
///
/// Euclidean distance between L2-normalized ArcFace embeddings; 1.10
/// corresponds to a cosine similarity of roughly 0.395.
pub const DEFAULT_TOLERANCE: f32 = 1.10;

/// Result of matching an embedding against the known embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Index of the accepted match, if the closest embedding passed the tolerance test.
    pub index: Option<usize>,
    /// Index of the closest known embedding, accepted or not.
    pub closest: Option<usize>,
    /// Distance to the closest known embedding (`f32::INFINITY` for an empty gallery).
    pub distance: f32,
}

impl MatchResult {
    pub fn matched(&self) -> bool {
        self.index.is_some()
    }
}

/// Strategy for comparing an embedding against the known embeddings.
pub trait Matcher {
    fn compare(&self, face: &Embedding, known: &[Embedding], tolerance: f32) -> MatchResult;
}

/// Linear-scan Euclidean matcher.
///
/// Picks the first index of minimum distance (exact ties go to the earliest
/// entry) and accepts it only when `distance <= tolerance`.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, face: &Embedding, known: &[Embedding], tolerance: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, candidate) in known.iter().enumerate() {
            let dist = face.distance(candidate);
            // Strict comparison keeps the earliest index on ties.
            if best_idx.is_none() || dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        let index = match best_idx {
            Some(idx) if best_dist <= tolerance => Some(idx),
            _ => None,
        };

        MatchResult {
            index,
            closest: best_idx,
            distance: best_dist,
        }
    }
}
