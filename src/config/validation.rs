//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`DispatchConfig`] that cannot
//! be expressed through the type system alone (e.g., range checks, cross-field
//! invariants, provider name uniqueness).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use std::collections::HashSet;

use super::DispatchConfig;

/// Errors arising from configuration parsing, validation, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "caching.similarity_threshold").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Validate all semantic constraints on a [`DispatchConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Errors
///
/// Returns `Err(Vec<ConfigError>)` with every violation found.
pub fn validate(config: &DispatchConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Adaptive scoring weights ─────────────────────────────────────
    let weight_sum = config.rotation.factors.sum();
    if (weight_sum - 1.0).abs() > 1e-6 {
        errors.push(ConfigError::InvalidField {
            field: "rotation.factors".into(),
            value: format!("{weight_sum}"),
            reason: "factor weights must sum to 1.0".into(),
        });
    }
    for (name, w) in [
        ("remaining_quota", config.rotation.factors.remaining_quota),
        ("latency", config.rotation.factors.latency),
        ("cost", config.rotation.factors.cost),
        ("quality", config.rotation.factors.quality),
    ] {
        if !(0.0..=1.0).contains(&w) {
            errors.push(ConfigError::InvalidField {
                field: format!("rotation.factors.{name}"),
                value: w.to_string(),
                reason: "must be between 0.0 and 1.0".into(),
            });
        }
    }

    // ── Caching ──────────────────────────────────────────────────────
    if !(0.0..=1.0).contains(&config.caching.similarity_threshold) {
        errors.push(ConfigError::InvalidField {
            field: "caching.similarity_threshold".into(),
            value: config.caching.similarity_threshold.to_string(),
            reason: "must be between 0.0 and 1.0".into(),
        });
    }
    if config.caching.max_entries == 0 {
        errors.push(ConfigError::InvalidField {
            field: "caching.max_entries".into(),
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }
    if config.caching.max_cache_age_days == 0 {
        errors.push(ConfigError::InvalidField {
            field: "caching.max_cache_age_days".into(),
            value: "0".into(),
            reason: "must be at least 1 day".into(),
        });
    }

    // ── Cost limits ──────────────────────────────────────────────────
    if config.cost_limits.daily_budget_usd < 0.0 {
        errors.push(ConfigError::InvalidField {
            field: "cost_limits.daily_budget_usd".into(),
            value: config.cost_limits.daily_budget_usd.to_string(),
            reason: "must not be negative".into(),
        });
    }
    if let Some(per_request) = config.cost_limits.per_request_max_usd {
        if per_request <= 0.0 {
            errors.push(ConfigError::InvalidField {
                field: "cost_limits.per_request_max_usd".into(),
                value: per_request.to_string(),
                reason: "must be positive when set".into(),
            });
        }
    }

    // ── Resilience ───────────────────────────────────────────────────
    if config.resilience.circuit_breaker_threshold == 0 {
        errors.push(ConfigError::InvalidField {
            field: "resilience.circuit_breaker_threshold".into(),
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }
    if config.resilience.breaker_cooldown_secs == 0 {
        errors.push(ConfigError::InvalidField {
            field: "resilience.breaker_cooldown_secs".into(),
            value: "0".into(),
            reason: "must be at least 1 second".into(),
        });
    }
    if config.resilience.max_retries == 0 {
        errors.push(ConfigError::InvalidField {
            field: "resilience.max_retries".into(),
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }
    if config.resilience.timeouts_ms.is_empty() {
        errors.push(ConfigError::InvalidField {
            field: "resilience.timeouts_ms".into(),
            value: "[]".into(),
            reason: "at least one timeout level is required".into(),
        });
    }
    for (i, t) in config.resilience.timeouts_ms.iter().enumerate() {
        if *t == 0 {
            errors.push(ConfigError::InvalidField {
                field: format!("resilience.timeouts_ms[{i}]"),
                value: "0".into(),
                reason: "timeouts must be positive".into(),
            });
        }
    }

    // ── Providers ────────────────────────────────────────────────────
    let mut seen = HashSet::new();
    for (i, p) in config.providers.iter().enumerate() {
        if p.name.trim().is_empty() {
            errors.push(ConfigError::InvalidField {
                field: format!("providers[{i}].name"),
                value: String::new(),
                reason: "provider name must not be empty".into(),
            });
        }
        if !seen.insert(p.name.clone()) {
            errors.push(ConfigError::InvalidField {
                field: format!("providers[{i}].name"),
                value: p.name.clone(),
                reason: "provider names must be unique".into(),
            });
        }
        if p.requests_per_minute == 0 {
            errors.push(ConfigError::InvalidField {
                field: format!("providers[{i}].requests_per_minute"),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if p.cost_per_unit_usd < 0.0 {
            errors.push(ConfigError::InvalidField {
                field: format!("providers[{i}].cost_per_unit_usd"),
                value: p.cost_per_unit_usd.to_string(),
                reason: "must not be negative".into(),
            });
        }
        if !(0.0..=1.0).contains(&p.quality) {
            errors.push(ConfigError::InvalidField {
                field: format!("providers[{i}].quality"),
                value: p.quality.to_string(),
                reason: "must be between 0.0 and 1.0".into(),
            });
        }
        if let Some(cap) = p.cost_per_window_usd {
            if cap < 0.0 {
                errors.push(ConfigError::InvalidField {
                    field: format!("providers[{i}].cost_per_window_usd"),
                    value: cap.to_string(),
                    reason: "must not be negative when set".into(),
                });
            }
        }
        if p.timeout_ms == Some(0) {
            errors.push(ConfigError::InvalidField {
                field: format!("providers[{i}].timeout_ms"),
                value: "0".into(),
                reason: "must be positive when set".into(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Modality, ProviderProfile};

    fn base_config() -> DispatchConfig {
        let mut config = DispatchConfig::default();
        config.providers.push(ProviderProfile {
            name: "openai".into(),
            modality: Modality::Text,
            requests_per_minute: 60,
            tokens_per_minute: 0,
            cost_per_window_usd: None,
            cost_per_unit_usd: 0.002,
            avg_latency_ms: 800,
            quality: 0.95,
            timeout_ms: None,
        });
        config
    }

    fn field_of(err: &ConfigError) -> &str {
        match err {
            ConfigError::InvalidField { field, .. } => field,
            other => panic!("expected InvalidField, got {other:?}"),
        }
    }

    #[test]
    fn test_default_config_with_provider_is_valid() {
        assert!(validate(&base_config()).is_ok());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = base_config();
        config.rotation.factors.cost = 0.9;
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| field_of(e) == "rotation.factors"));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut config = base_config();
        config.rotation.factors.latency = -0.2;
        config.rotation.factors.cost = 0.65; // keep the sum at 1.0
        let errors = validate(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| field_of(e) == "rotation.factors.latency"));
    }

    #[test]
    fn test_similarity_threshold_out_of_range() {
        let mut config = base_config();
        config.caching.similarity_threshold = 1.5;
        let errors = validate(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| field_of(e) == "caching.similarity_threshold"));
    }

    #[test]
    fn test_zero_cache_capacity_rejected() {
        let mut config = base_config();
        config.caching.max_entries = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_cache_age_rejected() {
        let mut config = base_config();
        config.caching.max_cache_age_days = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_negative_budget_rejected() {
        let mut config = base_config();
        config.cost_limits.daily_budget_usd = -1.0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_per_request_ceiling_rejected() {
        let mut config = base_config();
        config.cost_limits.per_request_max_usd = Some(0.0);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_breaker_threshold_rejected() {
        let mut config = base_config();
        config.resilience.circuit_breaker_threshold = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_timeouts_rejected() {
        let mut config = base_config();
        config.resilience.timeouts_ms.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_timeout_level_rejected() {
        let mut config = base_config();
        config.resilience.timeouts_ms = vec![10_000, 0];
        let errors = validate(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| field_of(e) == "resilience.timeouts_ms[1]"));
    }

    #[test]
    fn test_duplicate_provider_names_rejected() {
        let mut config = base_config();
        let dup = config.providers[0].clone();
        config.providers.push(dup);
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| field_of(e) == "providers[1].name"));
    }

    #[test]
    fn test_empty_provider_name_rejected() {
        let mut config = base_config();
        config.providers[0].name = "  ".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_rpm_rejected() {
        let mut config = base_config();
        config.providers[0].requests_per_minute = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_quality_out_of_range_rejected() {
        let mut config = base_config();
        config.providers[0].quality = 1.2;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_all_violations_collected() {
        let mut config = base_config();
        config.caching.max_entries = 0;
        config.resilience.max_retries = 0;
        config.providers[0].requests_per_minute = 0;
        let errors = validate(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}
