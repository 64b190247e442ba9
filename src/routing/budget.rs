//! Daily budget enforcement.
//!
//! Process-wide spend counter with a hard ceiling, reset at each calendar
//! day boundary (UTC). Consulted before every dispatch; incremented on
//! every successful paid call. With `hard_stop` enabled a breach is a
//! deliberate policy boundary surfaced as
//! [`DispatchError::BudgetExceeded`], never silently retried.

use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use crate::{micro_to_usd, usd_to_micro, DispatchError};

#[derive(Debug)]
struct DayState {
    date: NaiveDate,
    spent_micro: u64,
}

/// Snapshot of the budget for status reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetSnapshot {
    /// Spend accumulated today, USD.
    pub spent_today_usd: f64,
    /// Configured daily ceiling, USD.
    pub daily_budget_usd: f64,
    /// Remaining headroom today, USD (zero when over).
    pub remaining_usd: f64,
    /// Whether breaches abort dispatch.
    pub hard_stop: bool,
}

/// Process-wide daily spend tracking.
pub struct BudgetTracker {
    ceiling_micro: u64,
    hard_stop: bool,
    day: Mutex<DayState>,
}

impl BudgetTracker {
    /// Create a tracker for the given daily ceiling.
    pub fn new(daily_budget_usd: f64, hard_stop: bool) -> Self {
        Self {
            ceiling_micro: usd_to_micro(daily_budget_usd),
            hard_stop,
            day: Mutex::new(DayState {
                date: Utc::now().date_naive(),
                spent_micro: 0,
            }),
        }
    }

    /// Check whether an estimated spend fits today's budget.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::BudgetExceeded`] when the estimate would
    /// breach the ceiling and `hard_stop` is enabled. Without `hard_stop`
    /// a breach only logs a warning.
    pub fn check(&self, est_cost_usd: f64) -> Result<(), DispatchError> {
        let mut day = match self.day.lock() {
            Ok(day) => day,
            // A poisoned lock means a panic elsewhere; fail open is unsafe
            // for a spend ceiling, so fail closed.
            Err(_) if self.hard_stop => {
                return Err(DispatchError::BudgetExceeded {
                    spent_usd: micro_to_usd(self.ceiling_micro),
                    ceiling_usd: micro_to_usd(self.ceiling_micro),
                })
            }
            Err(_) => return Ok(()),
        };

        Self::roll_day(&mut day);

        let projected = day.spent_micro + usd_to_micro(est_cost_usd);
        if projected > self.ceiling_micro {
            if self.hard_stop {
                return Err(DispatchError::BudgetExceeded {
                    spent_usd: micro_to_usd(day.spent_micro),
                    ceiling_usd: micro_to_usd(self.ceiling_micro),
                });
            }
            warn!(
                spent_usd = micro_to_usd(day.spent_micro),
                ceiling_usd = micro_to_usd(self.ceiling_micro),
                "daily budget exceeded (soft limit, continuing)"
            );
        }

        Ok(())
    }

    /// Record the actual cost of a completed paid call.
    pub fn record(&self, actual_cost_usd: f64) {
        if let Ok(mut day) = self.day.lock() {
            Self::roll_day(&mut day);
            day.spent_micro += usd_to_micro(actual_cost_usd);
        }
    }

    /// Current budget state.
    pub fn snapshot(&self) -> BudgetSnapshot {
        let spent_micro = match self.day.lock() {
            Ok(mut day) => {
                Self::roll_day(&mut day);
                day.spent_micro
            }
            Err(_) => self.ceiling_micro,
        };

        BudgetSnapshot {
            spent_today_usd: micro_to_usd(spent_micro),
            daily_budget_usd: micro_to_usd(self.ceiling_micro),
            remaining_usd: micro_to_usd(self.ceiling_micro.saturating_sub(spent_micro)),
            hard_stop: self.hard_stop,
        }
    }

    fn roll_day(day: &mut DayState) {
        let today = Utc::now().date_naive();
        if day.date != today {
            info!(spent_usd = micro_to_usd(day.spent_micro), "daily budget reset");
            day.date = today;
            day.spent_micro = 0;
        }
    }
}
