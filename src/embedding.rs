//! Embedding collaborator seam
//!
//! The cache compares requests in an embedding vector space, but embedding
//! computation itself is an external concern. [`Embedder`] is the opaque
//! seam; the core never assumes a particular model or dimensionality beyond
//! "the same vector space for every entry".
//!
//! [`NgramEmbedder`] is a deterministic, dependency-free implementation:
//! a hashed bag of character trigrams, L2-normalized. It gives plausible
//! similarity behaviour (overlapping text shares trigrams) and stable
//! results, which is all tests and demos need.

use async_trait::async_trait;

use crate::DispatchError;

/// Opaque embedding provider.
///
/// Implementations must be thread-safe and always produce vectors of the
/// same dimensionality for the lifetime of a cache.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a text or image-spec payload into a vector.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Other`] if the embedding backend fails.
    async fn embed(&self, input: &str) -> Result<Vec<f32>, DispatchError>;
}

/// Deterministic hashed-trigram embedder.
#[derive(Debug, Clone)]
pub struct NgramEmbedder {
    dim: usize,
}

impl NgramEmbedder {
    /// Create an embedder producing vectors of the given dimensionality.
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn embed_sync(&self, input: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut vec = vec![0.0f32; self.dim];
        let chars: Vec<char> = input.to_lowercase().chars().collect();

        if chars.is_empty() {
            return vec;
        }

        for window in chars.windows(3.min(chars.len())) {
            let mut hasher = DefaultHasher::new();
            window.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dim;
            vec[bucket] += 1.0;
        }

        // L2 normalize so cosine similarity reduces to a dot product.
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vec {
                *v /= norm;
            }
        }

        vec
    }
}

impl Default for NgramEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for NgramEmbedder {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, DispatchError> {
        Ok(self.embed_sync(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::index::cosine_similarity;

    #[tokio::test]
    async fn test_embed_deterministic() {
        let e = NgramEmbedder::new(64);
        let a = e.embed("write a blog post about rust").await.unwrap();
        let b = e.embed("write a blog post about rust").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_embed_unit_norm() {
        let e = NgramEmbedder::new(64);
        let v = e.embed("some nontrivial input text").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_similar_inputs_score_higher_than_unrelated() {
        let e = NgramEmbedder::new(256);
        let a = e.embed("write a product description for red shoes").await.unwrap();
        let b = e.embed("write a product description for blue shoes").await.unwrap();
        let c = e.embed("42 17 99").await.unwrap();

        let sim_ab = cosine_similarity(&a, &b);
        let sim_ac = cosine_similarity(&a, &c);
        assert!(
            sim_ab > sim_ac,
            "near-duplicate prompts must be closer: ab={sim_ab}, ac={sim_ac}"
        );
    }

    #[tokio::test]
    async fn test_empty_input_yields_zero_vector() {
        let e = NgramEmbedder::new(32);
        let v = e.embed("").await.unwrap();
        assert!(v.iter().all(|x| x.abs() < f32::EPSILON));
    }

    #[test]
    fn test_zero_dim_clamped_to_one() {
        let e = NgramEmbedder::new(0);
        assert_eq!(e.embed_sync("abc").len(), 1);
    }
}
