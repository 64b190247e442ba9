//! Semantic cache
//!
//! Similarity-keyed storage of prior generation results. A lookup returns
//! the nearest stored entry whose cosine similarity to the query embedding
//! clears a threshold, so near-duplicate requests reuse a paid generation
//! instead of triggering a new provider call.
//!
//! Split into:
//! - [`index`] — the similarity-search seam (cosine + linear scan)
//! - [`store`] — the [`SemanticCache`] owning entries, TTL/LRU eviction,
//!   and hit/cost statistics

pub mod index;
pub mod store;

// Re-exports
pub use index::{cosine_similarity, LinearScan, SimilaritySearch};
pub use store::{CacheHit, CacheStats, SemanticCache};

use std::hash::{Hash, Hasher};

/// A generated artifact held by the cache and returned to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// Generated text content.
    Text(String),
    /// Reference to a generated image (URL or storage key).
    ImageRef(String),
}

impl Artifact {
    /// Return the inner string, regardless of variant.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text(s) | Self::ImageRef(s) => s,
        }
    }
}

/// Derive a request fingerprint for exact-match correlation.
///
/// Distinct from the embedding: the fingerprint identifies the literal
/// request, the embedding places it in similarity space.
pub fn fingerprint(payload: &str) -> String {
    use std::collections::hash_map::DefaultHasher;

    let mut hasher = DefaultHasher::new();
    payload.hash(&mut hasher);
    format!("req:{:x}", hasher.finish())
}
