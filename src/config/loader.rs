//! Configuration file loading.
//!
//! ## Responsibility
//! Read a TOML file from disk, parse it into a [`DispatchConfig`], and run
//! validation before returning. This is the primary entry point for loading
//! dispatch configuration at startup.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - I/O errors and parse errors are distinguished in the error type
//! - File path is included in every error message
//!
//! ## NOT Responsible For
//! - Defining the config schema (that belongs to `mod.rs`)

use std::path::Path;

use super::validation::{self, ConfigError};
use super::DispatchConfig;

/// Load a [`DispatchConfig`] from a TOML file.
///
/// Reads the file, parses it as TOML, and validates all semantic constraints.
///
/// # Errors
///
/// - `ConfigError::Io` if the file cannot be read.
/// - `ConfigError::Parse` if the TOML is malformed.
/// - `ConfigError::Validation` if semantic constraints are violated.
pub fn load_from_file(path: &Path) -> Result<DispatchConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load a [`DispatchConfig`] from a TOML string.
///
/// Useful for testing or embedding configs without file I/O.
///
/// # Errors
///
/// - `ConfigError::Parse` if the TOML is malformed.
/// - `ConfigError::Validation` if semantic constraints are violated.
pub fn load_from_str(content: &str, source_name: &str) -> Result<DispatchConfig, ConfigError> {
    let config: DispatchConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    validation::validate(&config).map_err(|errors| {
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID_TOML: &str = r#"
[rotation]
strategy = "adaptive"

[caching]
similarity_threshold = 0.85
max_entries = 100

[cost_limits]
daily_budget_usd = 5.0

[resilience]
circuit_breaker_threshold = 10
max_retries = 3

[[providers]]
name = "openai"
modality = "text"
requests_per_minute = 60
cost_per_unit_usd = 0.002
avg_latency_ms = 800
quality = 0.95
"#;

    #[test]
    fn test_load_from_str_valid_toml_succeeds() {
        let config = load_from_str(VALID_TOML, "test").unwrap();
        assert_eq!(config.providers.len(), 1);
        assert!((config.cost_limits.daily_budget_usd - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_load_from_str_invalid_toml_returns_parse_error() {
        let result = load_from_str("not valid toml [[[", "bad.toml");
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_load_from_str_semantic_violation_returns_validation_error() {
        let toml_str = r#"
[caching]
similarity_threshold = 2.0
"#;
        let err = load_from_str(toml_str, "test").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("similarity_threshold"));
    }

    #[test]
    fn test_validation_error_lists_every_violation() {
        let toml_str = r#"
[caching]
max_entries = 0

[resilience]
max_retries = 0
"#;
        let err = load_from_str(toml_str, "test").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("caching.max_entries"));
        assert!(msg.contains("resilience.max_retries"));
    }

    #[test]
    fn test_load_from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispatch.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(VALID_TOML.as_bytes()).unwrap();

        let config = load_from_file(&path).unwrap();
        assert_eq!(config.providers[0].name, "openai");
    }

    #[test]
    fn test_load_from_file_missing_returns_io_error() {
        let err = load_from_file(Path::new("/nonexistent/dispatch.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
