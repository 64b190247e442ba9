//! Similarity search seam.
//!
//! The cache's eviction logic never inspects how nearest-neighbour search
//! works; it talks to the one-method [`SimilaritySearch`] trait. The
//! shipped implementation is [`LinearScan`] — an O(n·d) scan computing
//! cosine similarity against every stored embedding, which is the right
//! complexity for small-to-medium entry counts. An approximate index can
//! replace it behind the same contract without touching the store.

/// Cosine similarity between two vectors.
///
/// Returns `0.0` for mismatched dimensions or zero-magnitude inputs, which
/// safely fails any positive threshold instead of producing NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Nearest-neighbour search over candidate embeddings.
///
/// Implementations must be deterministic: equal inputs produce equal
/// results, and ties resolve to the earliest candidate.
pub trait SimilaritySearch: Send + Sync {
    /// Return the index and similarity of the nearest candidate whose
    /// cosine similarity to `query` is `>= threshold`, or `None`.
    fn nearest(&self, query: &[f32], threshold: f32, candidates: &[&[f32]]) -> Option<(usize, f32)>;
}

/// Exhaustive linear-scan search.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearScan;

impl SimilaritySearch for LinearScan {
    fn nearest(&self, query: &[f32], threshold: f32, candidates: &[&[f32]]) -> Option<(usize, f32)> {
        let mut best: Option<(usize, f32)> = None;

        for (i, candidate) in candidates.iter().enumerate() {
            let sim = cosine_similarity(query, candidate);
            // Epsilon tolerance so a self-lookup at threshold 1.0 survives
            // float rounding in the norm computation.
            if sim + 1e-6 < threshold {
                continue;
            }
            // Strict > keeps the earliest candidate on ties.
            if best.map_or(true, |(_, b)| sim > b) {
                best = Some((i, sim));
            }
        }

        best
    }
}
