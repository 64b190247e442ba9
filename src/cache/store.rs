//! Semantic cache store.
//!
//! ## Responsibility
//! Own the cached artifacts, enforce TTL and capacity eviction, and answer
//! similarity lookups through the [`SimilaritySearch`] seam.
//!
//! ## Guarantees
//! - Lookups run concurrently under a read lock; hit bookkeeping uses
//!   atomics so a lookup never needs write access.
//! - Inserts are exclusive with any concurrent lookup or insert.
//! - Age checks run lazily on insert and lookup; no background timer.
//! - Capacity eviction removes least-recently-accessed entries first.
//!
//! ## NOT Responsible For
//! - Computing embeddings (that belongs to the `embedding` seam)
//! - Deciding when to consult the cache (that belongs to the facade/router)

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info};

use super::index::{LinearScan, SimilaritySearch};
use super::Artifact;
use crate::{micro_to_usd, usd_to_micro};

/// A stored generation result.
///
/// Immutable after creation except for the atomic access bookkeeping.
struct StoredEntry {
    fingerprint: String,
    embedding: Vec<f32>,
    artifact: Artifact,
    created_at: Instant,
    /// Millis since the cache epoch, updated on every hit (LRU ordering).
    last_access_ms: AtomicU64,
    hits: AtomicU64,
    /// What one provider call for this request would have cost.
    cost_saved_baseline_micro: u64,
}

/// A successful cache lookup.
#[derive(Debug, Clone)]
pub struct CacheHit {
    /// The cached artifact.
    pub artifact: Artifact,
    /// Cosine similarity between the query and the stored embedding.
    /// `1.0` for exact fingerprint hits.
    pub similarity: f32,
    /// Fingerprint of the request that created the entry.
    pub fingerprint: String,
    /// Total hits the entry has served, including this one.
    pub entry_hits: u64,
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    /// Lookups that returned an entry.
    pub hits: u64,
    /// Lookups that found nothing above threshold.
    pub misses: u64,
    /// `hits / (hits + misses)`, `0.0` before any lookup.
    pub hit_rate: f64,
    /// Cumulative provider cost avoided by reuse, in USD.
    pub cost_saved_usd: f64,
    /// Entries currently stored.
    pub entry_count: usize,
}

/// Similarity-keyed cache of generation results with TTL and LRU eviction.
pub struct SemanticCache {
    entries: RwLock<Vec<StoredEntry>>,
    search: Box<dyn SimilaritySearch>,
    default_threshold: f32,
    max_entries: usize,
    max_age: Duration,
    enabled: bool,
    epoch: Instant,
    hits: AtomicU64,
    misses: AtomicU64,
    cost_saved_micro: AtomicU64,
}

impl SemanticCache {
    /// Create a cache with linear-scan search.
    ///
    /// # Arguments
    ///
    /// * `max_entries` — capacity before LRU eviction kicks in.
    /// * `max_age` — entries older than this are purged lazily.
    /// * `default_threshold` — similarity floor for [`Self::lookup`].
    pub fn new(max_entries: usize, max_age: Duration, default_threshold: f32) -> Self {
        Self::with_search(max_entries, max_age, default_threshold, Box::new(LinearScan))
    }

    /// Create a cache with a custom similarity-search backend.
    pub fn with_search(
        max_entries: usize,
        max_age: Duration,
        default_threshold: f32,
        search: Box<dyn SimilaritySearch>,
    ) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            search,
            default_threshold,
            max_entries,
            max_age,
            enabled: true,
            epoch: Instant::now(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            cost_saved_micro: AtomicU64::new(0),
        }
    }

    /// Disable the cache: lookups always miss, inserts are no-ops.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether the cache is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Look up the nearest entry at the configured default threshold.
    pub async fn lookup(&self, embedding: &[f32]) -> Option<CacheHit> {
        self.lookup_with(embedding, self.default_threshold, None).await
    }

    /// Look up the nearest entry at an explicit threshold, optionally
    /// short-circuiting on an exact request fingerprint.
    ///
    /// Returns the nearest live entry whose cosine similarity is
    /// `>= threshold`, bumping its hit count and recency. Expired entries
    /// never match and are purged before the scan.
    pub async fn lookup_with(
        &self,
        embedding: &[f32],
        threshold: f32,
        fingerprint: Option<&str>,
    ) -> Option<CacheHit> {
        if !self.enabled {
            return None;
        }

        self.purge_expired().await;

        let entries = self.entries.read().await;

        // Exact-fingerprint fast path before the similarity scan.
        if let Some(fp) = fingerprint {
            if let Some(entry) = entries.iter().find(|e| e.fingerprint == fp) {
                return Some(self.record_hit(entry, 1.0));
            }
        }

        let candidates: Vec<&[f32]> = entries.iter().map(|e| e.embedding.as_slice()).collect();
        match self.search.nearest(embedding, threshold, &candidates) {
            Some((idx, similarity)) => {
                let entry = &entries[idx];
                debug!(
                    similarity = similarity,
                    threshold = threshold,
                    fingerprint = %entry.fingerprint,
                    "cache hit"
                );
                Some(self.record_hit(entry, similarity))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(threshold = threshold, "cache miss");
                None
            }
        }
    }

    /// Store a new entry, evicting by age and capacity as needed.
    ///
    /// `cost_saved_baseline_usd` is what one provider call for this request
    /// costs; every future hit adds it to the saved-cost counter.
    pub async fn insert(
        &self,
        fingerprint: impl Into<String>,
        embedding: Vec<f32>,
        artifact: Artifact,
        cost_saved_baseline_usd: f64,
    ) {
        if !self.enabled {
            return;
        }

        let fingerprint = fingerprint.into();
        let mut entries = self.entries.write().await;

        entries.retain(|e| e.created_at.elapsed() <= self.max_age);

        entries.push(StoredEntry {
            fingerprint: fingerprint.clone(),
            embedding,
            artifact,
            created_at: Instant::now(),
            last_access_ms: AtomicU64::new(self.now_ms()),
            hits: AtomicU64::new(0),
            cost_saved_baseline_micro: usd_to_micro(cost_saved_baseline_usd),
        });

        // LRU eviction until back under capacity.
        while self.max_entries > 0 && entries.len() > self.max_entries {
            let lru = entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.last_access_ms.load(Ordering::Relaxed))
                .map(|(i, _)| i);
            match lru {
                Some(i) => {
                    let evicted = entries.swap_remove(i);
                    debug!(fingerprint = %evicted.fingerprint, "evicted LRU cache entry");
                }
                None => break,
            }
        }

        debug!(fingerprint = %fingerprint, entries = entries.len(), "cached artifact");
    }

    /// Current statistics. Pure read; never mutates entries.
    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
            cost_saved_usd: micro_to_usd(self.cost_saved_micro.load(Ordering::Relaxed)),
            entry_count: self.entries.read().await.len(),
        }
    }

    /// Remove every entry. Counters are preserved.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
        info!("semantic cache cleared");
    }

    fn record_hit(&self, entry: &StoredEntry, similarity: f32) -> CacheHit {
        entry.last_access_ms.store(self.now_ms(), Ordering::Relaxed);
        let entry_hits = entry.hits.fetch_add(1, Ordering::Relaxed) + 1;
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.cost_saved_micro
            .fetch_add(entry.cost_saved_baseline_micro, Ordering::Relaxed);

        CacheHit {
            artifact: entry.artifact.clone(),
            similarity,
            fingerprint: entry.fingerprint.clone(),
            entry_hits,
        }
    }

    async fn purge_expired(&self) {
        // Cheap read-side check first; upgrade only when something expired.
        let any_expired = {
            let entries = self.entries.read().await;
            entries.iter().any(|e| e.created_at.elapsed() > self.max_age)
        };
        if any_expired {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|e| e.created_at.elapsed() <= self.max_age);
            debug!(purged = before - entries.len(), "purged expired cache entries");
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}
