//! Provider router.
//!
//! Owns the registered fleet and the routing registries (quota ledger,
//! breakers, budget) and executes the full dispatch lifecycle: rank, gate,
//! call with timeout, reconcile, fall back. Each attempt runs the same
//! gauntlet in order: deadline, budget, per-request ceiling, quota
//! reservation, breaker. A refusal at any gate skips to the next candidate
//! without consuming a retry; only real provider calls count against
//! `max_retries`.
//!
//! The terminal degraded path serves stale cache content when every
//! provider is exhausted and the caller supplied an embedding.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cache::SemanticCache;
use crate::config::{DispatchConfig, RotationStrategy};
use crate::provider::{Modality, ProviderCall, ProviderProfile};
use crate::routing::breaker::BreakerRegistry;
use crate::routing::budget::BudgetTracker;
use crate::routing::quota::QuotaLedger;
use crate::routing::scorer::{CandidateMetrics, ProviderScorer};
use crate::{DispatchError, FallbackLevel, RoutingOutcome, RoutingRequest};

/// Retention horizon for fallback events. Queries beyond this see nothing.
const EVENT_RETENTION: Duration = Duration::from_secs(3600);

/// Hard cap on retained fallback events.
const EVENT_CAP: usize = 4096;

struct RegisteredProvider {
    profile: ProviderProfile,
    adapter: Arc<dyn ProviderCall>,
}

struct FallbackEvent {
    at: Instant,
    provider: Option<String>,
    cache_only: bool,
}

/// Fallback activity over a query window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackStats {
    /// Fallback dispatches in the window, cache-only included.
    pub total: usize,
    /// How many were served from the cache after full exhaustion.
    pub cache_only: usize,
    /// Fallback serves per provider.
    pub by_provider: HashMap<String, usize>,
}

/// Quota-, breaker-, and budget-aware dispatch across the provider fleet.
pub struct ProviderRouter {
    providers: Vec<RegisteredProvider>,
    ledger: Arc<QuotaLedger>,
    breakers: Arc<BreakerRegistry>,
    budget: Arc<BudgetTracker>,
    scorer: ProviderScorer,
    strategy: RotationStrategy,
    default_max_retries: usize,
    timeouts: Vec<Duration>,
    per_request_max_usd: Option<f64>,
    cache: Option<Arc<SemanticCache>>,
    cache_threshold: f32,
    text_cursor: AtomicUsize,
    image_cursor: AtomicUsize,
    fallback_events: Mutex<VecDeque<FallbackEvent>>,
}

impl ProviderRouter {
    /// Create a router from config. Providers named in the config are not
    /// registered here; attach them with [`ProviderRouter::register`] so
    /// the caller controls which adapter backs each profile.
    pub fn new(config: &DispatchConfig) -> Self {
        let timeouts = if config.resilience.timeouts_ms.is_empty() {
            vec![Duration::from_secs(10)]
        } else {
            config
                .resilience
                .timeouts_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect()
        };

        Self {
            providers: Vec::new(),
            ledger: Arc::new(QuotaLedger::new()),
            breakers: Arc::new(BreakerRegistry::new(
                config.resilience.circuit_breaker_threshold,
                Duration::from_secs(config.resilience.breaker_cooldown_secs),
            )),
            budget: Arc::new(BudgetTracker::new(
                config.cost_limits.daily_budget_usd,
                config.cost_limits.hard_stop_at_budget,
            )),
            scorer: ProviderScorer::new(config.rotation.factors),
            strategy: config.rotation.strategy,
            default_max_retries: config.resilience.max_retries.max(1) as usize,
            timeouts,
            per_request_max_usd: config.cost_limits.per_request_max_usd,
            cache: None,
            cache_threshold: config.caching.similarity_threshold,
            text_cursor: AtomicUsize::new(0),
            image_cursor: AtomicUsize::new(0),
            fallback_events: Mutex::new(VecDeque::new()),
        }
    }

    /// Attach the semantic cache used for the terminal degraded path.
    pub fn with_cache(mut self, cache: Arc<SemanticCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Register a provider profile with its call adapter. Declared order is
    /// the round-robin cycle and the scoring tie-break.
    pub fn register(&mut self, profile: ProviderProfile, adapter: Arc<dyn ProviderCall>) {
        self.ledger.register(&profile);
        self.breakers.register(&profile.name);
        info!(
            provider = profile.name.as_str(),
            rpm = profile.requests_per_minute,
            "provider registered"
        );
        self.providers.push(RegisteredProvider { profile, adapter });
    }

    /// Shared quota ledger, for status reporting.
    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.ledger
    }

    /// Shared breaker registry, for status reporting.
    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Shared budget tracker, for status reporting.
    pub fn budget(&self) -> &Arc<BudgetTracker> {
        &self.budget
    }

    /// Registered provider profiles in declared order.
    pub fn profiles(&self) -> Vec<&ProviderProfile> {
        self.providers.iter().map(|p| &p.profile).collect()
    }

    /// Dispatch with no stale-cache terminal path.
    ///
    /// # Errors
    ///
    /// See [`ProviderRouter::dispatch_with_stale`].
    pub async fn dispatch(&self, request: &RoutingRequest) -> Result<RoutingOutcome, DispatchError> {
        self.dispatch_with_stale(request, None).await
    }

    /// Dispatch a request through the fallback chain.
    ///
    /// When every provider fails and `stale_embedding` is supplied, a final
    /// cache lookup may serve degraded (possibly stale) content at zero
    /// cost.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::BudgetExceeded`] when the daily ceiling would be
    ///   breached under `hard_stop_at_budget`; the whole request aborts,
    ///   including remaining fallback levels.
    /// - [`DispatchError::AllProvidersExhausted`] when every candidate was
    ///   refused or failed and the cache could not serve.
    pub async fn dispatch_with_stale(
        &self,
        request: &RoutingRequest,
        stale_embedding: Option<&[f32]>,
    ) -> Result<RoutingOutcome, DispatchError> {
        let chain = self.build_chain(request);
        let max_attempts = request.max_retries.unwrap_or(self.default_max_retries);
        let mut last = DispatchError::Other("no eligible providers".into());
        let mut attempts = 0usize;

        for (level, idx) in chain.into_iter().enumerate() {
            if attempts >= max_attempts {
                break;
            }
            if request.deadline_expired() {
                warn!("deadline expired, abandoning remaining fallback attempts");
                break;
            }

            let provider = &self.providers[idx];
            let name = provider.profile.name.as_str();
            let est_cost = provider.profile.estimate_cost(request.estimated_units);
            let est_tokens = estimated_tokens(request);

            // A projected daily-budget breach aborts the whole request, not
            // just this candidate: every remaining provider would breach too.
            self.budget.check(est_cost)?;

            if let Some(cap) = request.max_cost_usd.or(self.per_request_max_usd) {
                if est_cost > cap {
                    debug!(provider = name, est_cost, cap, "per-request ceiling refused");
                    last = DispatchError::Other(format!(
                        "provider '{name}' estimated cost ${est_cost:.4} exceeds per-request ceiling ${cap:.4}"
                    ));
                    continue;
                }
            }

            if !self.ledger.reserve(name, est_cost, est_tokens) {
                last = DispatchError::QuotaExceeded {
                    provider: name.to_string(),
                };
                continue;
            }

            if !self.breakers.allow(name) {
                self.ledger.release(name, est_cost, est_tokens);
                last = DispatchError::ProviderUnavailable {
                    provider: name.to_string(),
                };
                continue;
            }

            attempts += 1;
            let timeout = provider
                .profile
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| self.level_timeout(level));

            let started = Instant::now();
            let call = tokio::time::timeout(timeout, provider.adapter.call(&request.payload)).await;
            let latency = started.elapsed();

            match call {
                Ok(Ok(output)) => {
                    self.ledger
                        .commit(name, est_cost, output.cost_usd, est_tokens, output.tokens);
                    self.budget.record(output.cost_usd);
                    self.breakers.record(name, true);

                    let fallback = if level == 0 {
                        FallbackLevel::Primary
                    } else {
                        self.record_fallback(Some(name.to_string()), false);
                        info!(provider = name, level, "served by fallback provider");
                        FallbackLevel::Fallback(level)
                    };

                    return Ok(RoutingOutcome {
                        provider: Some(name.to_string()),
                        success: true,
                        latency,
                        cost_usd: output.cost_usd,
                        artifact: output.artifact,
                        fallback,
                    });
                }
                Ok(Err(err)) => {
                    self.ledger.release(name, est_cost, est_tokens);
                    self.breakers.record(name, false);
                    warn!(provider = name, error = %err, "provider call failed");
                    last = match err {
                        e @ DispatchError::ProviderCallFailed { .. } => e,
                        other => DispatchError::ProviderCallFailed {
                            provider: name.to_string(),
                            reason: other.to_string(),
                        },
                    };
                }
                Err(_) => {
                    self.ledger.release(name, est_cost, est_tokens);
                    self.breakers.record(name, false);
                    warn!(provider = name, timeout_ms = timeout.as_millis() as u64, "provider call timed out");
                    last = DispatchError::ProviderCallFailed {
                        provider: name.to_string(),
                        reason: format!("timed out after {}ms", timeout.as_millis()),
                    };
                }
            }
        }

        self.serve_stale(stale_embedding, last).await
    }

    /// Fallback activity within the trailing `window`.
    pub fn fallback_stats(&self, window: Duration) -> FallbackStats {
        let mut stats = FallbackStats {
            total: 0,
            cache_only: 0,
            by_provider: HashMap::new(),
        };

        if let Ok(events) = self.fallback_events.lock() {
            let cutoff = Instant::now().checked_sub(window);
            for event in events.iter() {
                if let Some(cutoff) = cutoff {
                    if event.at < cutoff {
                        continue;
                    }
                }
                stats.total += 1;
                if event.cache_only {
                    stats.cache_only += 1;
                }
                if let Some(name) = &event.provider {
                    *stats.by_provider.entry(name.clone()).or_insert(0) += 1;
                }
            }
        }

        stats
    }

    async fn serve_stale(
        &self,
        stale_embedding: Option<&[f32]>,
        last: DispatchError,
    ) -> Result<RoutingOutcome, DispatchError> {
        if let (Some(cache), Some(embedding)) = (&self.cache, stale_embedding) {
            if cache.is_enabled() {
                if let Some(hit) = cache.lookup_with(embedding, self.cache_threshold, None).await {
                    warn!(
                        similarity = hit.similarity,
                        "all providers exhausted, serving stale cache content"
                    );
                    self.record_fallback(None, true);
                    return Ok(RoutingOutcome {
                        provider: None,
                        success: true,
                        latency: Duration::ZERO,
                        cost_usd: 0.0,
                        artifact: hit.artifact,
                        fallback: FallbackLevel::CacheOnly,
                    });
                }
            }
        }

        Err(DispatchError::AllProvidersExhausted {
            last: Box::new(last),
        })
    }

    /// Ordered candidate indexes for one dispatch.
    fn build_chain(&self, request: &RoutingRequest) -> Vec<usize> {
        if let Some(chain) = &request.preferred_chain {
            return chain
                .iter()
                .filter_map(|name| {
                    let idx = self
                        .providers
                        .iter()
                        .position(|p| p.profile.name == *name && p.profile.modality == request.modality);
                    if idx.is_none() {
                        warn!(provider = name.as_str(), "unknown provider in preferred chain");
                    }
                    idx
                })
                .collect();
        }

        let candidates: Vec<usize> = self
            .providers
            .iter()
            .enumerate()
            .filter(|(_, p)| p.profile.modality == request.modality)
            .map(|(i, _)| i)
            .collect();

        match self.strategy {
            RotationStrategy::RoundRobin => {
                if candidates.is_empty() {
                    return candidates;
                }
                let cursor = match request.modality {
                    Modality::Text => &self.text_cursor,
                    Modality::Image => &self.image_cursor,
                };
                let start = cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
                let mut rotated = Vec::with_capacity(candidates.len());
                rotated.extend_from_slice(&candidates[start..]);
                rotated.extend_from_slice(&candidates[..start]);
                rotated
            }
            RotationStrategy::CostOptimized => {
                let mut sorted = candidates;
                sorted.sort_by(|a, b| {
                    self.providers[*a]
                        .profile
                        .cost_per_unit_usd
                        .partial_cmp(&self.providers[*b].profile.cost_per_unit_usd)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                sorted
            }
            RotationStrategy::Adaptive => {
                let callable: Vec<usize> = candidates
                    .iter()
                    .copied()
                    .filter(|i| self.breakers.is_callable(&self.providers[*i].profile.name))
                    .collect();
                // Rank callable providers first; tripped ones trail in
                // declared order as a last resort (their breaker may have
                // recovered by the time the chain reaches them).
                let metrics: Vec<CandidateMetrics> = callable
                    .iter()
                    .map(|i| {
                        let p = &self.providers[*i].profile;
                        CandidateMetrics {
                            name: p.name.clone(),
                            remaining_quota: self.ledger.remaining_fraction(&p.name),
                            avg_latency_ms: p.avg_latency_ms,
                            cost_per_unit_usd: p.cost_per_unit_usd,
                            quality: p.quality,
                        }
                    })
                    .collect();

                let by_name: HashMap<&str, usize> = callable
                    .iter()
                    .map(|i| (self.providers[*i].profile.name.as_str(), *i))
                    .collect();

                let mut chain: Vec<usize> = self
                    .scorer
                    .rank(&metrics)
                    .iter()
                    .filter_map(|s| by_name.get(s.name.as_str()).copied())
                    .collect();
                chain.extend(candidates.iter().copied().filter(|i| !callable.contains(i)));
                chain
            }
        }
    }

    fn level_timeout(&self, level: usize) -> Duration {
        *self
            .timeouts
            .get(level)
            .or_else(|| self.timeouts.last())
            .unwrap_or(&Duration::from_secs(10))
    }

    fn record_fallback(&self, provider: Option<String>, cache_only: bool) {
        if let Ok(mut events) = self.fallback_events.lock() {
            let now = Instant::now();
            while events.len() >= EVENT_CAP {
                events.pop_front();
            }
            if let Some(cutoff) = now.checked_sub(EVENT_RETENTION) {
                while events.front().is_some_and(|e| e.at < cutoff) {
                    events.pop_front();
                }
            }
            events.push_back(FallbackEvent {
                at: now,
                provider,
                cache_only,
            });
        }
    }
}

fn estimated_tokens(request: &RoutingRequest) -> u64 {
    match request.modality {
        // One billable unit of text is a thousand tokens.
        Modality::Text => (request.estimated_units * 1000.0).max(0.0) as u64,
        Modality::Image => 0,
    }
}
