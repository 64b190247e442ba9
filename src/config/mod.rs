//! # Dispatch configuration
//!
//! ## Responsibility
//! Parse and validate the TOML configuration that declares the provider
//! fleet, rotation strategy, cache behavior, spend limits, and resilience
//! settings.
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `DispatchConfig`
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Type-safe: invalid field combinations are caught at parse time via serde
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Building the runtime router from config (that belongs to `routing`)
//! - Executing provider calls (that belongs to adapter implementations)

pub mod loader;
pub mod validation;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::provider::ProviderProfile;
use crate::routing::scorer::FactorWeights;

pub use validation::ConfigError;

// ── Default value functions ──────────────────────────────────────────────

/// Default rotation strategy: adaptive weighted scoring.
fn default_strategy() -> RotationStrategy {
    RotationStrategy::Adaptive
}

/// Default cosine similarity threshold for cache hits.
fn default_similarity_threshold() -> f32 {
    0.85
}

/// Default cache entry lifetime: 7 days.
fn default_max_cache_age_days() -> u64 {
    7
}

/// Default cache capacity.
fn default_max_entries() -> usize {
    1000
}

/// Default daily spend ceiling: 10 USD.
fn default_daily_budget_usd() -> f64 {
    10.0
}

/// Default consecutive-failure threshold before a breaker opens.
fn default_circuit_breaker_threshold() -> u32 {
    10
}

/// Default breaker cooldown: 60 seconds.
fn default_breaker_cooldown_secs() -> u64 {
    60
}

/// Default dispatch attempts per request.
fn default_max_retries() -> u32 {
    3
}

/// Default escalating per-attempt timeouts: 10s, 15s, 20s.
fn default_timeouts_ms() -> Vec<u64> {
    vec![10_000, 15_000, 20_000]
}

/// Default enabled state: true.
fn default_true() -> bool {
    true
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for a dispatch core instance.
///
/// Deserialized from a TOML file and validated before use.
/// Every field has either a required value or a documented default.
///
/// # Example
///
/// ```toml
/// [rotation]
/// strategy = "adaptive"
///
/// [caching]
/// similarity_threshold = 0.85
///
/// [cost_limits]
/// daily_budget_usd = 25.0
///
/// [[providers]]
/// name = "openai"
/// modality = "text"
/// requests_per_minute = 60
/// cost_per_unit_usd = 0.002
/// avg_latency_ms = 800
/// quality = 0.95
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct DispatchConfig {
    /// Provider rotation strategy and adaptive scoring weights.
    #[serde(default)]
    pub rotation: RotationConfig,
    /// Semantic cache behavior.
    #[serde(default)]
    pub caching: CachingConfig,
    /// Spend ceilings.
    #[serde(default)]
    pub cost_limits: CostLimitsConfig,
    /// Circuit breakers, retries, and timeouts.
    #[serde(default)]
    pub resilience: ResilienceConfig,
    /// The provider fleet, in declared order. Declared order is the
    /// round-robin cycle and the deterministic tie-break for scoring.
    #[serde(default)]
    pub providers: Vec<ProviderProfile>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            rotation: RotationConfig::default(),
            caching: CachingConfig::default(),
            cost_limits: CostLimitsConfig::default(),
            resilience: ResilienceConfig::default(),
            providers: Vec::new(),
        }
    }
}

// ── Rotation ─────────────────────────────────────────────────────────────

/// Provider selection strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    /// Weighted scoring over quota, latency, cost, and quality.
    Adaptive,
    /// Cycle providers in declared order.
    RoundRobin,
    /// Prefer the cheapest eligible provider.
    CostOptimized,
}

/// Rotation strategy and adaptive scoring weights.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RotationConfig {
    /// Which selection strategy to use.
    #[serde(default = "default_strategy")]
    pub strategy: RotationStrategy,
    /// Factor weights for the `adaptive` strategy. Must sum to 1.0.
    #[serde(default)]
    pub factors: FactorWeights,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            factors: FactorWeights::default(),
        }
    }
}

// ── Caching ──────────────────────────────────────────────────────────────

/// Semantic cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CachingConfig {
    /// Whether the cache participates in dispatch at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum cosine similarity for a cache hit, 0.0 to 1.0.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Entries older than this are expired lazily.
    #[serde(default = "default_max_cache_age_days")]
    pub max_cache_age_days: u64,
    /// Maximum entries held before LRU eviction.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: default_similarity_threshold(),
            max_cache_age_days: default_max_cache_age_days(),
            max_entries: default_max_entries(),
        }
    }
}

// ── Cost limits ──────────────────────────────────────────────────────────

/// Spend ceiling configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CostLimitsConfig {
    /// Process-wide daily spend ceiling, USD. Resets at UTC midnight.
    #[serde(default = "default_daily_budget_usd")]
    pub daily_budget_usd: f64,
    /// Per-request estimated-cost ceiling, USD. `None` means unlimited.
    #[serde(default)]
    pub per_request_max_usd: Option<f64>,
    /// Whether a projected budget breach aborts dispatch. When false the
    /// breach is logged and dispatch proceeds.
    #[serde(default = "default_true")]
    pub hard_stop_at_budget: bool,
}

impl Default for CostLimitsConfig {
    fn default() -> Self {
        Self {
            daily_budget_usd: default_daily_budget_usd(),
            per_request_max_usd: None,
            hard_stop_at_budget: true,
        }
    }
}

// ── Resilience ───────────────────────────────────────────────────────────

/// Circuit breaker, retry, and timeout configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ResilienceConfig {
    /// Consecutive failures before a provider's breaker opens.
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
    /// Initial breaker cooldown in seconds. Doubles per reopen, capped.
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,
    /// Maximum dispatch attempts per request across the fallback chain.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Escalating per-attempt timeouts in milliseconds, indexed by fallback
    /// level. Attempts past the last entry reuse it.
    #[serde(default = "default_timeouts_ms")]
    pub timeouts_ms: Vec<u64>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
            max_retries: default_max_retries(),
            timeouts_ms: default_timeouts_ms(),
        }
    }
}

/// Export the JSON Schema for `DispatchConfig`.
///
/// This enables IDE autocomplete when editing TOML config files.
///
/// # Errors
///
/// Returns `serde_json::Error` if schema serialization fails (should not
/// happen with well-formed derive macros).
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(DispatchConfig);
    serde_json::to_string_pretty(&schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Modality;

    #[test]
    fn test_default_similarity_threshold() {
        assert!((default_similarity_threshold() - 0.85).abs() < f32::EPSILON);
    }

    #[test]
    fn test_default_timeouts_escalate() {
        let t = default_timeouts_ms();
        assert_eq!(t, vec![10_000, 15_000, 20_000]);
    }

    #[test]
    fn test_strategy_serializes_to_snake_case() {
        let json = serde_json::to_string(&RotationStrategy::CostOptimized).unwrap();
        assert_eq!(json, "\"cost_optimized\"");
    }

    #[test]
    fn test_strategy_deserializes_from_snake_case() {
        let s: RotationStrategy = serde_json::from_str("\"round_robin\"").unwrap();
        assert_eq!(s, RotationStrategy::RoundRobin);
    }

    #[test]
    fn test_empty_toml_yields_full_defaults() {
        let config: DispatchConfig = toml::from_str("").unwrap();
        assert_eq!(config.rotation.strategy, RotationStrategy::Adaptive);
        assert!(config.caching.enabled);
        assert!((config.caching.similarity_threshold - 0.85).abs() < f32::EPSILON);
        assert!((config.cost_limits.daily_budget_usd - 10.0).abs() < 1e-9);
        assert!(config.cost_limits.hard_stop_at_budget);
        assert_eq!(config.resilience.circuit_breaker_threshold, 10);
        assert_eq!(config.resilience.max_retries, 3);
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_full_toml_parses() {
        let toml_str = r#"
[rotation]
strategy = "cost_optimized"

[rotation.factors]
remaining_quota = 0.4
latency = 0.1
cost = 0.3
quality = 0.2

[caching]
enabled = true
similarity_threshold = 0.9
max_cache_age_days = 3
max_entries = 500

[cost_limits]
daily_budget_usd = 25.0
per_request_max_usd = 0.50
hard_stop_at_budget = false

[resilience]
circuit_breaker_threshold = 5
breaker_cooldown_secs = 30
max_retries = 4
timeouts_ms = [5000, 10000]

[[providers]]
name = "openai"
modality = "text"
requests_per_minute = 60
tokens_per_minute = 90000
cost_per_unit_usd = 0.002
avg_latency_ms = 800
quality = 0.95

[[providers]]
name = "stability"
modality = "image"
requests_per_minute = 10
cost_per_unit_usd = 0.04
avg_latency_ms = 4000
quality = 0.9
timeout_ms = 30000
"#;
        let config: DispatchConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.rotation.strategy, RotationStrategy::CostOptimized);
        assert!((config.rotation.factors.remaining_quota - 0.4).abs() < 1e-9);
        assert!((config.caching.similarity_threshold - 0.9).abs() < f32::EPSILON);
        assert_eq!(config.cost_limits.per_request_max_usd, Some(0.50));
        assert!(!config.cost_limits.hard_stop_at_budget);
        assert_eq!(config.resilience.timeouts_ms, vec![5000, 10000]);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].name, "openai");
        assert_eq!(config.providers[1].modality, Modality::Image);
        assert_eq!(config.providers[1].timeout_ms, Some(30_000));
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config: DispatchConfig = toml::from_str(
            r#"
[[providers]]
name = "echo"
modality = "text"
requests_per_minute = 100
cost_per_unit_usd = 0.0
avg_latency_ms = 10
quality = 0.5
"#,
        )
        .unwrap();
        let s = toml::to_string_pretty(&config).unwrap();
        let back: DispatchConfig = toml::from_str(&s).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn test_export_schema_produces_valid_json() {
        let schema = export_schema().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&schema).unwrap();
        assert!(parsed.get("properties").is_some() || parsed.get("$ref").is_some());
    }
}
