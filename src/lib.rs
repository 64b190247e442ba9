//! # content-dispatch
//!
//! Quota-aware dispatch of content-generation requests across multiple
//! external AI providers, fronted by a similarity-keyed semantic cache.
//!
//! ## Architecture
//!
//! One-directional flow per request:
//! ```text
//! GenerationFacade → SemanticCache (read) → [miss] → ProviderRouter
//!                  → provider call → SemanticCache (write) → caller
//! ```
//!
//! The router consults a per-provider [`QuotaLedger`](routing::QuotaLedger)
//! and [`BreakerRegistry`](routing::BreakerRegistry) before every attempt,
//! enforces a process-wide daily budget, and falls back to the cache as a
//! terminal degraded path when every provider is exhausted.

// ── Lint policy (aerospace-grade) ─────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod cache;
pub mod config;
pub mod embedding;
pub mod facade;
pub mod provider;
pub mod routing;

// Re-exports for convenience
pub use cache::{Artifact, SemanticCache};
pub use facade::{GenerationFacade, GenerationResult};
pub use provider::{Modality, ProviderCall, ProviderProfile};
pub use routing::ProviderRouter;

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"` — structured JSON output for production log aggregators
/// - anything else (including unset) — human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`DispatchError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
pub fn init_tracing() -> Result<(), DispatchError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| DispatchError::Other(format!("tracing init failed: {e}")))
}

/// Dispatch error taxonomy.
///
/// Quota, breaker, and transport failures are recovered locally by the
/// router (skip to the next provider) and only surface to the caller inside
/// [`DispatchError::AllProvidersExhausted`]. Budget exhaustion is a policy
/// boundary and is never silently retried.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The provider's window limit is reached; routing skips it this cycle.
    #[error("quota exhausted for provider '{provider}'")]
    QuotaExceeded {
        /// Provider whose window is exhausted.
        provider: String,
    },

    /// The provider's circuit breaker is open.
    #[error("provider '{provider}' unavailable (circuit open)")]
    ProviderUnavailable {
        /// Provider whose breaker rejected the attempt.
        provider: String,
    },

    /// A provider call failed at the transport level or timed out.
    #[error("provider '{provider}' call failed: {reason}")]
    ProviderCallFailed {
        /// Provider that failed.
        provider: String,
        /// Transport or timeout detail.
        reason: String,
    },

    /// The daily spend ceiling would be breached with `hard_stop` enabled.
    #[error("daily budget exceeded: spent ${spent_usd:.4} of ${ceiling_usd:.4}")]
    BudgetExceeded {
        /// Spend accumulated today, in USD.
        spent_usd: f64,
        /// The configured daily ceiling, in USD.
        ceiling_usd: f64,
    },

    /// Every eligible and fallback provider failed or was ineligible, and
    /// no cache entry could serve the request.
    #[error("all providers exhausted (last failure: {last})")]
    AllProvidersExhausted {
        /// The last concrete failure observed before giving up.
        last: Box<DispatchError>,
    },

    /// A configuration value is missing or invalid.
    ///
    /// Returned at construction time so that misconfiguration surfaces
    /// immediately rather than at the first dispatch.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

/// How deep into the fallback chain a request travelled before being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackLevel {
    /// Served by the first-ranked provider.
    Primary,
    /// Served by the nth fallback provider (1-based depth).
    Fallback(usize),
    /// Served from the semantic cache after every provider failed.
    CacheOnly,
}

impl FallbackLevel {
    /// Return `true` if any fallback (provider-level or cache-only) was used.
    pub fn is_fallback(&self) -> bool {
        !matches!(self, Self::Primary)
    }
}

/// A content-generation request submitted to the router.
#[derive(Debug, Clone)]
pub struct RoutingRequest {
    /// Which kind of provider may serve this request.
    pub modality: Modality,
    /// Prompt text or image specification.
    pub payload: String,
    /// Explicit ordered provider chain. When present it takes precedence
    /// over the configured selection strategy.
    pub preferred_chain: Option<Vec<String>>,
    /// Maximum number of dispatch attempts across the fallback chain.
    /// `None` uses the configured resilience default.
    pub max_retries: Option<usize>,
    /// Per-request cost ceiling in USD; providers whose estimated cost
    /// exceeds it are ineligible.
    pub max_cost_usd: Option<f64>,
    /// Estimated billable units (thousands of tokens for text, images for
    /// image generation) used for cost estimation and quota reservation.
    pub estimated_units: f64,
    /// Caller-imposed deadline. Once expired, remaining fallback attempts
    /// are abandoned.
    pub deadline: Option<Instant>,
}

impl RoutingRequest {
    /// Create a request with default retries and no ceiling or deadline.
    pub fn new(modality: Modality, payload: impl Into<String>) -> Self {
        Self {
            modality,
            payload: payload.into(),
            preferred_chain: None,
            max_retries: None,
            max_cost_usd: None,
            estimated_units: 1.0,
            deadline: None,
        }
    }

    /// Set an explicit ordered fallback chain.
    pub fn with_chain(mut self, chain: Vec<String>) -> Self {
        self.preferred_chain = Some(chain);
        self
    }

    /// Override the configured maximum number of dispatch attempts.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the per-request cost ceiling in USD.
    pub fn with_max_cost(mut self, max_cost_usd: f64) -> Self {
        self.max_cost_usd = Some(max_cost_usd);
        self
    }

    /// Set the estimated billable units for cost estimation.
    pub fn with_estimated_units(mut self, units: f64) -> Self {
        self.estimated_units = units;
        self
    }

    /// Set the caller-imposed deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Return `true` if the deadline has passed.
    pub fn deadline_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// The result of a routed dispatch.
#[derive(Debug, Clone)]
pub struct RoutingOutcome {
    /// Provider that served the request, or `None` for cache-only outcomes.
    pub provider: Option<String>,
    /// Whether the request was ultimately served.
    pub success: bool,
    /// Wall-clock latency of the winning attempt.
    pub latency: Duration,
    /// Cost incurred by the winning attempt, in USD. Zero for cache-only.
    pub cost_usd: f64,
    /// The generated (or cached) artifact.
    pub artifact: Artifact,
    /// How deep into the fallback chain the request travelled.
    pub fallback: FallbackLevel,
}

// Costs accumulate as integer micro-dollars (1 USD = 1_000_000) to avoid
// floating-point drift in long-running aggregations.
pub(crate) fn usd_to_micro(usd: f64) -> u64 {
    (usd.max(0.0) * 1_000_000.0).round() as u64
}

pub(crate) fn micro_to_usd(micro: u64) -> f64 {
    micro as f64 / 1_000_000.0
}
