//! Per-provider circuit breakers.
//!
//! Prevents cascading failures by stopping requests to a degraded provider
//! without permanently disabling it.
//!
//! ## States
//! - **Closed**: normal operation, requests flow through
//! - **Open**: provider failing, requests rejected immediately
//! - **Half-open**: cooldown elapsed, one probe request tests recovery
//!
//! Each reopen from a failed probe doubles the cooldown (capped), so a
//! still-failing provider is not hammered by a thundering herd of retries.
//! State transitions are logged as observability events; they never raise.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info, warn};

/// Current state of one provider's breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerStatus {
    /// Serving normally.
    Closed,
    /// Rejecting all calls until the cooldown elapses.
    Open,
    /// Cooldown elapsed; admitting a single probe call.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    status: BreakerStatus,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    open_until: Option<Instant>,
    /// Doubles the cooldown on every reopen from a failed probe.
    reopen_exponent: u32,
    /// A half-open probe is in flight; concurrent callers are rejected
    /// until its outcome is recorded.
    probe_outstanding: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            status: BreakerStatus::Closed,
            consecutive_failures: 0,
            last_failure: None,
            open_until: None,
            reopen_exponent: 0,
            probe_outstanding: false,
        }
    }
}

/// Snapshot of one breaker for status reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSnapshot {
    /// Current state.
    pub status: BreakerStatus,
    /// Consecutive failures recorded.
    pub consecutive_failures: u32,
    /// Remaining cooldown while open.
    pub open_remaining: Option<Duration>,
}

/// Registry of per-provider circuit breakers.
pub struct BreakerRegistry {
    states: DashMap<String, BreakerState>,
    failure_threshold: u32,
    base_cooldown: Duration,
    max_cooldown: Duration,
}

impl BreakerRegistry {
    /// Create a registry.
    ///
    /// # Arguments
    ///
    /// * `failure_threshold` — consecutive failures before opening.
    /// * `base_cooldown` — initial open duration; doubles per reopen.
    pub fn new(failure_threshold: u32, base_cooldown: Duration) -> Self {
        Self {
            states: DashMap::new(),
            failure_threshold: failure_threshold.max(1),
            base_cooldown,
            max_cooldown: base_cooldown.saturating_mul(16),
        }
    }

    /// Override the cooldown cap.
    pub fn with_max_cooldown(mut self, max_cooldown: Duration) -> Self {
        self.max_cooldown = max_cooldown;
        self
    }

    /// Register a provider in the closed state.
    pub fn register(&self, provider: &str) {
        self.states
            .entry(provider.to_string())
            .or_insert_with(BreakerState::new);
    }

    /// Gate a dispatch attempt. Returns `false` only while open, or for a
    /// second concurrent half-open probe.
    ///
    /// An open breaker whose cooldown has elapsed transitions to half-open
    /// here and admits the caller as the probe.
    pub fn allow(&self, provider: &str) -> bool {
        let Some(mut state) = self.states.get_mut(provider) else {
            return false;
        };

        match state.status {
            BreakerStatus::Closed => true,
            BreakerStatus::Open => {
                let elapsed = state.open_until.map(|t| Instant::now() >= t).unwrap_or(true);
                if elapsed {
                    state.status = BreakerStatus::HalfOpen;
                    state.probe_outstanding = true;
                    info!(provider = provider, "breaker half-open, admitting probe");
                    true
                } else {
                    debug!(provider = provider, "breaker open, rejecting");
                    false
                }
            }
            BreakerStatus::HalfOpen => {
                if state.probe_outstanding {
                    debug!(provider = provider, "probe in flight, rejecting");
                    false
                } else {
                    state.probe_outstanding = true;
                    true
                }
            }
        }
    }

    /// Non-consuming eligibility check for candidate ranking: would a call
    /// currently be admitted, without claiming the half-open probe.
    pub fn is_callable(&self, provider: &str) -> bool {
        let Some(state) = self.states.get(provider) else {
            return false;
        };
        match state.status {
            BreakerStatus::Closed => true,
            BreakerStatus::Open => state.open_until.map(|t| Instant::now() >= t).unwrap_or(true),
            BreakerStatus::HalfOpen => !state.probe_outstanding,
        }
    }

    /// Record a call outcome and drive state transitions.
    pub fn record(&self, provider: &str, success: bool) {
        let Some(mut state) = self.states.get_mut(provider) else {
            return;
        };

        if success {
            match state.status {
                BreakerStatus::HalfOpen => {
                    state.status = BreakerStatus::Closed;
                    state.consecutive_failures = 0;
                    state.reopen_exponent = 0;
                    state.probe_outstanding = false;
                    state.open_until = None;
                    info!(provider = provider, "breaker closed (probe succeeded)");
                }
                BreakerStatus::Closed => {
                    state.consecutive_failures = 0;
                }
                BreakerStatus::Open => {}
            }
            return;
        }

        state.consecutive_failures += 1;
        state.last_failure = Some(Instant::now());

        match state.status {
            BreakerStatus::Closed => {
                if state.consecutive_failures >= self.failure_threshold {
                    let cooldown = self.cooldown_for(state.reopen_exponent);
                    state.status = BreakerStatus::Open;
                    state.open_until = Some(Instant::now() + cooldown);
                    warn!(
                        provider = provider,
                        failures = state.consecutive_failures,
                        cooldown_ms = cooldown.as_millis() as u64,
                        "breaker opened"
                    );
                }
            }
            BreakerStatus::HalfOpen => {
                state.reopen_exponent = state.reopen_exponent.saturating_add(1);
                let cooldown = self.cooldown_for(state.reopen_exponent);
                state.status = BreakerStatus::Open;
                state.probe_outstanding = false;
                state.open_until = Some(Instant::now() + cooldown);
                warn!(
                    provider = provider,
                    cooldown_ms = cooldown.as_millis() as u64,
                    "breaker reopened (probe failed)"
                );
            }
            BreakerStatus::Open => {}
        }
    }

    /// Current status, if the provider is registered.
    pub fn status(&self, provider: &str) -> Option<BreakerStatus> {
        self.states.get(provider).map(|s| s.status)
    }

    /// Snapshot one breaker for status reporting.
    pub fn snapshot(&self, provider: &str) -> Option<BreakerSnapshot> {
        self.states.get(provider).map(|s| BreakerSnapshot {
            status: s.status,
            consecutive_failures: s.consecutive_failures,
            open_remaining: match s.status {
                BreakerStatus::Open => s
                    .open_until
                    .map(|t| t.saturating_duration_since(Instant::now())),
                _ => None,
            },
        })
    }

    /// Manually reset a breaker to closed (e.g. after operator action).
    pub fn reset(&self, provider: &str) {
        if let Some(mut state) = self.states.get_mut(provider) {
            *state = BreakerState::new();
            info!(provider = provider, "breaker manually reset");
        }
    }

    fn cooldown_for(&self, exponent: u32) -> Duration {
        let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_cooldown
            .saturating_mul(multiplier)
            .min(self.max_cooldown)
    }
}
