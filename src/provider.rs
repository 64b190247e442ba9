//! Provider abstraction
//!
//! Declares the [`ProviderProfile`] identity loaded from configuration and
//! the [`ProviderCall`] adapter trait the router is polymorphic over. The
//! router never sees provider-specific request or response shapes; adapters
//! own those.
//!
//! [`EchoProvider`] is a dependency-free adapter for tests and demos,
//! returning its input after a configurable delay.

use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cache::Artifact;
use crate::DispatchError;

/// Kind of content a provider generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Text generation (chat/completion style APIs).
    Text,
    /// Image generation.
    Image,
}

/// Identity and declared characteristics of an external AI service.
///
/// Immutable after config load. One profile exists per configured provider;
/// mutable runtime state (quota, breaker) lives in the routing registries,
/// keyed by `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProviderProfile {
    /// Unique provider name (e.g. "openai", "gemini", "stability").
    pub name: String,
    /// What this provider generates.
    pub modality: Modality,
    /// Requests allowed per tumbling one-minute window.
    pub requests_per_minute: u32,
    /// Billable token budget per window. `0` means unlimited.
    #[serde(default)]
    pub tokens_per_minute: u64,
    /// Spend ceiling per window in USD. `None` means unlimited.
    #[serde(default)]
    pub cost_per_window_usd: Option<f64>,
    /// Cost per billable unit (1K tokens for text, one image for image
    /// providers), in USD.
    pub cost_per_unit_usd: f64,
    /// Declared average latency, used by the adaptive scorer.
    pub avg_latency_ms: u64,
    /// Declared quality score in `0.0..=1.0`, used by the adaptive scorer.
    pub quality: f64,
    /// Per-provider call timeout override. When absent the router uses the
    /// escalating level timeouts from the resilience config.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ProviderProfile {
    /// Estimated cost in USD for a request of the given billable units.
    pub fn estimate_cost(&self, units: f64) -> f64 {
        self.cost_per_unit_usd * units.max(0.0)
    }
}

/// Successful output of a provider call.
#[derive(Debug, Clone)]
pub struct CallOutput {
    /// The generated artifact.
    pub artifact: Artifact,
    /// Actual cost billed for the call, in USD.
    pub cost_usd: f64,
    /// Billable tokens consumed, when the provider reports them.
    pub tokens: u64,
}

/// Adapter trait for outbound provider calls.
///
/// Implementations must be thread-safe (`Send + Sync`). The trait is
/// object-safe so the router can hold `Arc<dyn ProviderCall>` per profile.
#[async_trait]
pub trait ProviderCall: Send + Sync {
    /// Execute the generation call for the given payload.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ProviderCallFailed`] on transport or API
    /// failure. The router treats a timeout identically.
    async fn call(&self, payload: &str) -> Result<CallOutput, DispatchError>;
}

/// Echo adapter for tests and demos.
///
/// Returns the payload as a text artifact after a simulated delay, billing
/// a fixed per-call cost.
pub struct EchoProvider {
    /// Simulated call latency.
    pub delay_ms: u64,
    /// Cost reported per call, in USD.
    pub cost_per_call_usd: f64,
}

impl EchoProvider {
    /// Create an echo provider with 10ms delay and zero cost.
    pub fn new() -> Self {
        Self {
            delay_ms: 10,
            cost_per_call_usd: 0.0,
        }
    }

    /// Create an echo provider with a custom delay.
    pub fn with_delay(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            cost_per_call_usd: 0.0,
        }
    }

    /// Set the cost reported per call.
    pub fn with_cost(mut self, cost_per_call_usd: f64) -> Self {
        self.cost_per_call_usd = cost_per_call_usd;
        self
    }
}

impl Default for EchoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderCall for EchoProvider {
    async fn call(&self, payload: &str) -> Result<CallOutput, DispatchError> {
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;

        Ok(CallOutput {
            artifact: Artifact::Text(payload.to_string()),
            cost_usd: self.cost_per_call_usd,
            tokens: payload.split_whitespace().count() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(cost: f64) -> ProviderProfile {
        ProviderProfile {
            name: "test".into(),
            modality: Modality::Text,
            requests_per_minute: 60,
            tokens_per_minute: 0,
            cost_per_window_usd: None,
            cost_per_unit_usd: cost,
            avg_latency_ms: 500,
            quality: 0.9,
            timeout_ms: None,
        }
    }

    #[test]
    fn test_estimate_cost_scales_with_units() {
        let p = profile(0.002);
        assert!((p.estimate_cost(1.0) - 0.002).abs() < 1e-9);
        assert!((p.estimate_cost(10.0) - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_cost_negative_units_clamped() {
        let p = profile(0.002);
        assert!(p.estimate_cost(-5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_profile_toml_roundtrip() {
        let p = profile(0.003);
        let s = toml::to_string(&p).unwrap();
        let back: ProviderProfile = toml::from_str(&s).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn test_modality_serde_lowercase() {
        let json = serde_json::to_string(&Modality::Image).unwrap();
        assert_eq!(json, "\"image\"");
    }

    #[tokio::test]
    async fn test_echo_provider_returns_payload() {
        let echo = EchoProvider::with_delay(1).with_cost(0.01);
        let out = echo.call("hello world").await.unwrap();
        assert_eq!(out.artifact, Artifact::Text("hello world".into()));
        assert_eq!(out.tokens, 2);
        assert!((out.cost_usd - 0.01).abs() < f64::EPSILON);
    }
}
