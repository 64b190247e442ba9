//! Quota ledger.
//!
//! Per-provider rolling counters for requests, tokens, and cost inside a
//! tumbling window. The ledger is pure bookkeeping: a failed `reserve` is a
//! routing signal ("provider unavailable this cycle"), never an error.
//!
//! Window rollover happens lazily on first access past the boundary,
//! atomically with the check, so no background timer is needed. Each
//! provider's state lives in its own keyed-map entry; the entry guard is
//! the per-provider exclusive section required for reservation atomicity.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::provider::ProviderProfile;
use crate::{micro_to_usd, usd_to_micro};

/// Window limits derived from a [`ProviderProfile`] at registration.
#[derive(Debug, Clone)]
struct QuotaLimits {
    requests_per_window: u32,
    /// `0` means unlimited.
    tokens_per_window: u64,
    /// `None` means unlimited.
    cost_per_window_micro: Option<u64>,
}

/// Mutable per-provider counters. Reset as a unit at window rollover.
#[derive(Debug)]
struct QuotaState {
    requests_used: u32,
    tokens_used: u64,
    cost_used_micro: u64,
    window_start: Instant,
    lifetime_cost_micro: u64,
}

#[derive(Debug)]
struct ProviderQuota {
    limits: QuotaLimits,
    state: QuotaState,
}

impl ProviderQuota {
    /// Tumbling-window rollover: reset counters on first access past the
    /// boundary. Lifetime cost survives.
    fn roll(&mut self, window: Duration) {
        if self.state.window_start.elapsed() >= window {
            self.state.requests_used = 0;
            self.state.tokens_used = 0;
            self.state.cost_used_micro = 0;
            self.state.window_start = Instant::now();
        }
    }

    fn would_fit(&self, est_cost_micro: u64, est_tokens: u64) -> bool {
        if self.state.requests_used >= self.limits.requests_per_window {
            return false;
        }
        if self.limits.tokens_per_window > 0
            && self.state.tokens_used + est_tokens > self.limits.tokens_per_window
        {
            return false;
        }
        if let Some(limit) = self.limits.cost_per_window_micro {
            if self.state.cost_used_micro + est_cost_micro > limit {
                return false;
            }
        }
        true
    }
}

/// Point-in-time view of one provider's quota, for status reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaSnapshot {
    /// Requests used in the current window.
    pub requests_used: u32,
    /// Requests allowed per window.
    pub requests_limit: u32,
    /// Tokens used in the current window.
    pub tokens_used: u64,
    /// Token budget per window (`0` = unlimited).
    pub tokens_limit: u64,
    /// Spend in the current window, USD.
    pub cost_used_usd: f64,
    /// Window spend ceiling in USD, when configured.
    pub cost_limit_usd: Option<f64>,
    /// Time until the current window rolls over.
    pub reset_in: Duration,
    /// Total spend through this provider since startup, USD.
    pub lifetime_cost_usd: f64,
}

/// Per-provider quota bookkeeping with reserve/commit/release semantics.
pub struct QuotaLedger {
    providers: DashMap<String, ProviderQuota>,
    window: Duration,
}

impl QuotaLedger {
    /// Create a ledger with the standard one-minute tumbling window.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(60))
    }

    /// Create a ledger with a custom window length.
    pub fn with_window(window: Duration) -> Self {
        Self {
            providers: DashMap::new(),
            window,
        }
    }

    /// Register a provider's limits. Replaces any previous registration and
    /// resets its counters.
    pub fn register(&self, profile: &ProviderProfile) {
        self.providers.insert(
            profile.name.clone(),
            ProviderQuota {
                limits: QuotaLimits {
                    requests_per_window: profile.requests_per_minute,
                    tokens_per_window: profile.tokens_per_minute,
                    cost_per_window_micro: profile.cost_per_window_usd.map(usd_to_micro),
                },
                state: QuotaState {
                    requests_used: 0,
                    tokens_used: 0,
                    cost_used_micro: 0,
                    window_start: Instant::now(),
                    lifetime_cost_micro: 0,
                },
            },
        );
    }

    /// Provisionally reserve one request plus the estimated tokens/cost.
    ///
    /// Returns `false` when any window limit would be exceeded (or the
    /// provider is unknown); counters are untouched in that case.
    pub fn reserve(&self, provider: &str, est_cost_usd: f64, est_tokens: u64) -> bool {
        let Some(mut entry) = self.providers.get_mut(provider) else {
            warn!(provider = provider, "reserve against unregistered provider");
            return false;
        };

        entry.roll(self.window);

        let est_cost_micro = usd_to_micro(est_cost_usd);
        if !entry.would_fit(est_cost_micro, est_tokens) {
            debug!(
                provider = provider,
                requests_used = entry.state.requests_used,
                requests_limit = entry.limits.requests_per_window,
                "quota reservation refused"
            );
            return false;
        }

        entry.state.requests_used += 1;
        entry.state.tokens_used += est_tokens;
        entry.state.cost_used_micro += est_cost_micro;
        true
    }

    /// Reconcile a reservation with the call's true cost and token usage.
    ///
    /// Adjusts the window counters by the estimate/actual delta and adds
    /// the actual cost to the lifetime total. The request slot stays
    /// consumed.
    pub fn commit(
        &self,
        provider: &str,
        est_cost_usd: f64,
        actual_cost_usd: f64,
        est_tokens: u64,
        actual_tokens: u64,
    ) {
        let Some(mut entry) = self.providers.get_mut(provider) else {
            return;
        };

        let est_micro = usd_to_micro(est_cost_usd);
        let actual_micro = usd_to_micro(actual_cost_usd);

        entry.state.cost_used_micro =
            entry.state.cost_used_micro.saturating_sub(est_micro) + actual_micro;
        entry.state.tokens_used = entry.state.tokens_used.saturating_sub(est_tokens) + actual_tokens;
        entry.state.lifetime_cost_micro += actual_micro;
    }

    /// Roll back a reservation whose call was never attempted (e.g.
    /// short-circuited by the breaker) or failed without incurring cost.
    pub fn release(&self, provider: &str, est_cost_usd: f64, est_tokens: u64) {
        let Some(mut entry) = self.providers.get_mut(provider) else {
            return;
        };

        entry.state.requests_used = entry.state.requests_used.saturating_sub(1);
        entry.state.tokens_used = entry.state.tokens_used.saturating_sub(est_tokens);
        entry.state.cost_used_micro = entry
            .state
            .cost_used_micro
            .saturating_sub(usd_to_micro(est_cost_usd));
    }

    /// Fraction of the most-constrained window limit still available,
    /// in `0.0..=1.0`. Unknown providers report `0.0`.
    pub fn remaining_fraction(&self, provider: &str) -> f64 {
        let Some(mut entry) = self.providers.get_mut(provider) else {
            return 0.0;
        };
        entry.roll(self.window);

        let requests = if entry.limits.requests_per_window > 0 {
            1.0 - f64::from(entry.state.requests_used)
                / f64::from(entry.limits.requests_per_window)
        } else {
            0.0
        };

        let tokens = if entry.limits.tokens_per_window > 0 {
            1.0 - entry.state.tokens_used as f64 / entry.limits.tokens_per_window as f64
        } else {
            1.0
        };

        let cost = match entry.limits.cost_per_window_micro {
            Some(limit) if limit > 0 => {
                1.0 - entry.state.cost_used_micro as f64 / limit as f64
            }
            _ => 1.0,
        };

        requests.min(tokens).min(cost).clamp(0.0, 1.0)
    }

    /// Snapshot one provider's quota state for status reporting.
    pub fn snapshot(&self, provider: &str) -> Option<QuotaSnapshot> {
        let mut entry = self.providers.get_mut(provider)?;
        entry.roll(self.window);

        Some(QuotaSnapshot {
            requests_used: entry.state.requests_used,
            requests_limit: entry.limits.requests_per_window,
            tokens_used: entry.state.tokens_used,
            tokens_limit: entry.limits.tokens_per_window,
            cost_used_usd: micro_to_usd(entry.state.cost_used_micro),
            cost_limit_usd: entry.limits.cost_per_window_micro.map(micro_to_usd),
            reset_in: self
                .window
                .saturating_sub(entry.state.window_start.elapsed()),
            lifetime_cost_usd: micro_to_usd(entry.state.lifetime_cost_micro),
        })
    }
}

impl Default for QuotaLedger {
    fn default() -> Self {
        Self::new()
    }
}
