//! # Generation facade
//!
//! ## Responsibility
//! The single entry point orchestration glue talks to. Per request:
//! embed, fingerprint, consult the cache, dispatch on a miss, write the
//! result back, and return a uniform [`GenerationResult`]. Also exposes the
//! outbound read API: per-provider status, cache statistics, and fallback
//! activity.
//!
//! ## Guarantees
//! - A cache hit never contacts a provider and reports zero cost
//! - Identical back-to-back requests are served from the cache on the
//!   second call (cache enabled, exact fingerprint fast path)
//! - Every request carries a unique id through all log events
//!
//! ## NOT Responsible For
//! - Provider selection and bookkeeping (router)
//! - Eviction policy (cache)
//! - Embedding computation (the [`Embedder`] collaborator)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::cache::{fingerprint, Artifact, CacheStats, SemanticCache};
use crate::config::DispatchConfig;
use crate::embedding::Embedder;
use crate::provider::{Modality, ProviderCall};
use crate::routing::{
    BreakerSnapshot, BudgetSnapshot, FallbackStats, ProviderRouter, QuotaSnapshot,
};
use crate::{DispatchError, FallbackLevel, RoutingRequest};

/// The uniform result returned for every generation request.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// Unique id assigned to this request.
    pub request_id: Uuid,
    /// The generated or cached artifact.
    pub artifact: Artifact,
    /// Provider that served the request; `None` when served from cache.
    pub provider: Option<String>,
    /// Whether the artifact came from the cache (fresh hit or stale
    /// terminal fallback).
    pub from_cache: bool,
    /// Cost incurred by this request, USD. Zero for cache serves.
    pub cost_usd: f64,
    /// Wall-clock latency of the serving path.
    pub latency: Duration,
    /// How degraded the serving path was.
    pub fallback: FallbackLevel,
    /// Cosine similarity of the cache hit, when served from cache.
    pub similarity: Option<f32>,
}

/// Point-in-time health and usage of one provider.
#[derive(Debug, Clone)]
pub struct ProviderStatus {
    /// Provider name.
    pub name: String,
    /// What the provider generates.
    pub modality: Modality,
    /// Circuit breaker state.
    pub breaker: Option<BreakerSnapshot>,
    /// Window quota usage, including seconds until reset.
    pub quota: Option<QuotaSnapshot>,
}

/// Full outbound status view.
#[derive(Debug, Clone)]
pub struct ApiStatus {
    /// Per-provider health and usage, in declared order.
    pub providers: Vec<ProviderStatus>,
    /// Daily budget state.
    pub budget: BudgetSnapshot,
}

/// Cache-fronted generation entry point.
pub struct GenerationFacade {
    router: ProviderRouter,
    cache: Arc<SemanticCache>,
    embedder: Arc<dyn Embedder>,
    similarity_threshold: f32,
}

impl GenerationFacade {
    /// Build a facade from config, wiring each configured provider profile
    /// to its call adapter.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ConfigError`] if a configured provider has
    /// no adapter in `adapters`.
    pub fn new(
        config: &DispatchConfig,
        mut adapters: HashMap<String, Arc<dyn ProviderCall>>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, DispatchError> {
        let mut cache = SemanticCache::new(
            config.caching.max_entries,
            Duration::from_secs(config.caching.max_cache_age_days * 24 * 3600),
            config.caching.similarity_threshold,
        );
        if !config.caching.enabled {
            cache = cache.disabled();
        }
        let cache = Arc::new(cache);

        let mut router = ProviderRouter::new(config).with_cache(Arc::clone(&cache));
        for profile in &config.providers {
            let adapter = adapters.remove(&profile.name).ok_or_else(|| {
                DispatchError::ConfigError(format!(
                    "no call adapter registered for provider '{}'",
                    profile.name
                ))
            })?;
            router.register(profile.clone(), adapter);
        }

        Ok(Self {
            router,
            cache,
            embedder,
            similarity_threshold: config.caching.similarity_threshold,
        })
    }

    /// Generate content for a request, consulting the cache first.
    ///
    /// # Errors
    ///
    /// Propagates [`DispatchError::BudgetExceeded`] and
    /// [`DispatchError::AllProvidersExhausted`] from the router, and
    /// [`DispatchError::Other`] from the embedding backend.
    pub async fn generate(
        &self,
        request: RoutingRequest,
    ) -> Result<GenerationResult, DispatchError> {
        let request_id = Uuid::new_v4();
        let span = info_span!("generate", %request_id, modality = ?request.modality);

        async move {
            let embedding = if self.cache.is_enabled() {
                Some(self.embedder.embed(&request.payload).await?)
            } else {
                None
            };
            let fp = fingerprint(&request.payload);

            if let Some(embedding) = &embedding {
                if let Some(hit) = self
                    .cache
                    .lookup_with(embedding, self.similarity_threshold, Some(&fp))
                    .await
                {
                    info!(similarity = hit.similarity, "served from cache");
                    return Ok(GenerationResult {
                        request_id,
                        artifact: hit.artifact,
                        provider: None,
                        from_cache: true,
                        cost_usd: 0.0,
                        latency: Duration::ZERO,
                        fallback: FallbackLevel::Primary,
                        similarity: Some(hit.similarity),
                    });
                }
            }

            let outcome = self
                .router
                .dispatch_with_stale(&request, embedding.as_deref())
                .await?;

            if outcome.fallback == FallbackLevel::CacheOnly {
                return Ok(GenerationResult {
                    request_id,
                    artifact: outcome.artifact,
                    provider: None,
                    from_cache: true,
                    cost_usd: 0.0,
                    latency: outcome.latency,
                    fallback: FallbackLevel::CacheOnly,
                    similarity: None,
                });
            }

            if let Some(embedding) = embedding {
                // A future hit on this entry saves what this call cost.
                self.cache
                    .insert(fp, embedding, outcome.artifact.clone(), outcome.cost_usd)
                    .await;
            }

            info!(
                provider = outcome.provider.as_deref().unwrap_or("-"),
                cost_usd = outcome.cost_usd,
                latency_ms = outcome.latency.as_millis() as u64,
                fallback = ?outcome.fallback,
                "generation complete"
            );

            Ok(GenerationResult {
                request_id,
                artifact: outcome.artifact,
                provider: outcome.provider,
                from_cache: false,
                cost_usd: outcome.cost_usd,
                latency: outcome.latency,
                fallback: outcome.fallback,
                similarity: None,
            })
        }
        .instrument(span)
        .await
    }

    /// Per-provider health, quota usage (with reset countdown), lifetime
    /// spend, and the daily budget state.
    pub fn api_status(&self) -> ApiStatus {
        let providers = self
            .router
            .profiles()
            .into_iter()
            .map(|p| ProviderStatus {
                name: p.name.clone(),
                modality: p.modality,
                breaker: self.router.breakers().snapshot(&p.name),
                quota: self.router.ledger().snapshot(&p.name),
            })
            .collect();

        ApiStatus {
            providers,
            budget: self.router.budget().snapshot(),
        }
    }

    /// Cache hit/miss/cost-saved statistics.
    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Fallback activity within the trailing `window`.
    pub fn fallback_stats(&self, window: Duration) -> FallbackStats {
        self.router.fallback_stats(window)
    }

    /// Drop every cache entry. Statistics are retained.
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    /// Direct access to the router, for advanced wiring and tests.
    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::NgramEmbedder;
    use crate::provider::{EchoProvider, ProviderProfile};
    use crate::routing::BreakerStatus;

    fn config_with_echo(name: &str) -> DispatchConfig {
        let mut config = DispatchConfig::default();
        config.providers.push(ProviderProfile {
            name: name.into(),
            modality: Modality::Text,
            requests_per_minute: 100,
            tokens_per_minute: 0,
            cost_per_window_usd: None,
            cost_per_unit_usd: 0.002,
            avg_latency_ms: 10,
            quality: 0.9,
            timeout_ms: None,
        });
        config
    }

    fn facade_with_echo(config: &DispatchConfig, cost: f64) -> GenerationFacade {
        let mut adapters: HashMap<String, Arc<dyn ProviderCall>> = HashMap::new();
        for p in &config.providers {
            adapters.insert(
                p.name.clone(),
                Arc::new(EchoProvider::with_delay(1).with_cost(cost)),
            );
        }
        GenerationFacade::new(config, adapters, Arc::new(NgramEmbedder::default())).unwrap()
    }

    #[tokio::test]
    async fn test_miss_then_exact_hit() {
        let facade = facade_with_echo(&config_with_echo("echo"), 0.01);
        let req = RoutingRequest::new(Modality::Text, "write a haiku about autumn");

        let first = facade.generate(req.clone()).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.provider.as_deref(), Some("echo"));
        assert!((first.cost_usd - 0.01).abs() < 1e-9);

        let second = facade.generate(req).await.unwrap();
        assert!(second.from_cache, "identical request must hit the cache");
        assert!(second.provider.is_none());
        assert!(second.cost_usd.abs() < f64::EPSILON);
        assert_eq!(second.artifact, first.artifact);
        assert_eq!(second.similarity, Some(1.0));
    }

    #[tokio::test]
    async fn test_request_ids_are_unique() {
        let facade = facade_with_echo(&config_with_echo("echo"), 0.0);
        let a = facade
            .generate(RoutingRequest::new(Modality::Text, "one"))
            .await
            .unwrap();
        let b = facade
            .generate(RoutingRequest::new(Modality::Text, "two"))
            .await
            .unwrap();
        assert_ne!(a.request_id, b.request_id);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_dispatches() {
        let mut config = config_with_echo("echo");
        config.caching.enabled = false;
        let facade = facade_with_echo(&config, 0.01);
        let req = RoutingRequest::new(Modality::Text, "same prompt");

        let first = facade.generate(req.clone()).await.unwrap();
        let second = facade.generate(req).await.unwrap();
        assert!(!first.from_cache);
        assert!(!second.from_cache, "disabled cache must never serve hits");

        let stats = facade.cache_stats().await;
        assert_eq!(stats.entry_count, 0);
    }

    #[tokio::test]
    async fn test_cache_stats_track_cost_saved() {
        let facade = facade_with_echo(&config_with_echo("echo"), 0.05);
        let req = RoutingRequest::new(Modality::Text, "expensive prompt");

        facade.generate(req.clone()).await.unwrap();
        facade.generate(req).await.unwrap();

        let stats = facade.cache_stats().await;
        assert_eq!(stats.hits, 1);
        assert!((stats.cost_saved_usd - 0.05).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_clear_cache_forces_redispatch() {
        let facade = facade_with_echo(&config_with_echo("echo"), 0.01);
        let req = RoutingRequest::new(Modality::Text, "prompt");

        facade.generate(req.clone()).await.unwrap();
        facade.clear_cache().await;
        let after = facade.generate(req).await.unwrap();
        assert!(!after.from_cache);
    }

    #[tokio::test]
    async fn test_api_status_reports_each_provider() {
        let mut config = config_with_echo("alpha");
        config.providers.push(ProviderProfile {
            name: "beta".into(),
            modality: Modality::Image,
            requests_per_minute: 5,
            tokens_per_minute: 0,
            cost_per_window_usd: None,
            cost_per_unit_usd: 0.04,
            avg_latency_ms: 4000,
            quality: 0.85,
            timeout_ms: None,
        });
        let facade = facade_with_echo(&config, 0.01);

        facade
            .generate(RoutingRequest::new(Modality::Text, "hi"))
            .await
            .unwrap();

        let status = facade.api_status();
        assert_eq!(status.providers.len(), 2);
        let alpha = &status.providers[0];
        assert_eq!(alpha.name, "alpha");
        assert_eq!(alpha.breaker.as_ref().unwrap().status, BreakerStatus::Closed);
        let quota = alpha.quota.as_ref().unwrap();
        assert_eq!(quota.requests_used, 1);
        assert!(quota.reset_in <= Duration::from_secs(60));
        assert!((status.budget.daily_budget_usd - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_adapter_is_config_error() {
        let config = config_with_echo("echo");
        let result = GenerationFacade::new(
            &config,
            HashMap::new(),
            Arc::new(NgramEmbedder::default()),
        );
        assert!(matches!(result, Err(DispatchError::ConfigError(_))));
    }
}
