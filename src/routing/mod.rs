//! # Provider routing core
//!
//! ## Responsibility
//! Select a provider (or an ordered fallback sequence) for each request
//! given quota, breaker, and budget state; execute the call with a
//! per-attempt timeout; and reconcile all bookkeeping on completion.
//!
//! ## Guarantees
//! - Per-provider quota and breaker updates are linearizable: all mutation
//!   goes through a keyed map entry, so two concurrent dispatches cannot
//!   both reserve a slot that only has room for one.
//! - No lock is held across an outbound provider call.
//! - A provider with an open breaker is never dispatched to.
//! - With `hard_stop_at_budget`, spend never exceeds the daily ceiling.
//!
//! ## NOT Responsible For
//! - Computing embeddings or caching results (facade and cache own those;
//!   the router only reads the cache on its terminal fallback path)
//! - Provider-specific request/response shapes (adapter implementations)

pub mod breaker;
pub mod budget;
pub mod quota;
pub mod router;
pub mod scorer;

// Re-exports for convenience
pub use breaker::{BreakerRegistry, BreakerSnapshot, BreakerStatus};
pub use budget::{BudgetSnapshot, BudgetTracker};
pub use quota::{QuotaLedger, QuotaSnapshot};
pub use router::{FallbackStats, ProviderRouter};
pub use scorer::{CandidateMetrics, ProviderScorer, ScoreBreakdown};
