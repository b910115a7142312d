//! Rolling-window spend accounting against a hard ceiling.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use thiserror::Error;

use crate::utils::clock::{SharedClock, system_clock};

/// Health of the budget window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BudgetStatus {
    Healthy,
    /// Past the warning ratio but under the ceiling.
    Warning,
    /// At or past the ceiling; further spend is refused until the
    /// window rolls forward.
    Exceeded,
}

/// Spend refused because the window is already at its ceiling.
#[derive(Debug, Error, Diagnostic)]
#[error("budget exceeded: {spent:.2} of {ceiling:.2} spent in the current window")]
#[diagnostic(
    code(loomflow::resilience::budget_exceeded),
    help("Wait for older entries to roll out of the window or raise the ceiling.")
)]
pub struct BudgetExceededError {
    pub spent: f64,
    pub ceiling: f64,
}

/// Append-only ledger of `(timestamp, cost)` entries with a rolling
/// window. Entries older than the window are pruned lazily on read.
///
/// Process-wide and long-lived: one ledger per governed dependency,
/// shared across threads, guarded by a single mutex.
#[derive(Debug)]
pub struct BudgetLedger {
    window: Duration,
    ceiling: f64,
    warning_ratio: f64,
    clock: SharedClock,
    entries: Mutex<Vec<(DateTime<Utc>, f64)>>,
}

impl BudgetLedger {
    /// Ledger with the default 80% warning ratio.
    pub fn new(ceiling: f64, window: Duration) -> Self {
        Self::with_clock(ceiling, window, system_clock())
    }

    pub fn with_clock(ceiling: f64, window: Duration, clock: SharedClock) -> Self {
        Self {
            window,
            ceiling,
            warning_ratio: 0.8,
            clock,
            entries: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_warning_ratio(mut self, ratio: f64) -> Self {
        self.warning_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    fn prune_and_sum(&self, entries: &mut Vec<(DateTime<Utc>, f64)>) -> f64 {
        let now = self.clock.now();
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::zero());
        entries.retain(|(when, _)| now - *when < window);
        entries.iter().map(|(_, cost)| cost).sum()
    }

    /// Total cost recorded inside the current window.
    pub fn spent(&self) -> f64 {
        let mut entries = self.entries.lock().expect("ledger poisoned");
        self.prune_and_sum(&mut entries)
    }

    /// Health of the current window.
    pub fn status(&self) -> BudgetStatus {
        let spent = self.spent();
        if spent >= self.ceiling {
            BudgetStatus::Exceeded
        } else if spent >= self.ceiling * self.warning_ratio {
            BudgetStatus::Warning
        } else {
            BudgetStatus::Healthy
        }
    }

    /// Record a spend, refusing once the window has reached its
    /// ceiling.
    pub fn record(&self, cost: f64) -> Result<(), BudgetExceededError> {
        let mut entries = self.entries.lock().expect("ledger poisoned");
        let spent = self.prune_and_sum(&mut entries);
        if spent >= self.ceiling {
            return Err(BudgetExceededError {
                spent,
                ceiling: self.ceiling,
            });
        }
        entries.push((self.clock.now(), cost));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::ManualClock;
    use std::sync::Arc;

    fn ledger(ceiling: f64) -> (BudgetLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let ledger =
            BudgetLedger::with_clock(ceiling, Duration::from_secs(3600), clock.clone());
        (ledger, clock)
    }

    #[test]
    fn status_progresses_with_spend() {
        let (ledger, _clock) = ledger(10.0);
        assert_eq!(ledger.status(), BudgetStatus::Healthy);
        ledger.record(7.0).unwrap();
        assert_eq!(ledger.status(), BudgetStatus::Healthy);
        ledger.record(2.0).unwrap();
        assert_eq!(ledger.status(), BudgetStatus::Warning);
        ledger.record(1.5).unwrap();
        assert_eq!(ledger.status(), BudgetStatus::Exceeded);
    }

    #[test]
    fn refuses_spend_once_exceeded() {
        let (ledger, _clock) = ledger(5.0);
        ledger.record(5.0).unwrap();
        let err = ledger.record(0.1).unwrap_err();
        assert_eq!(err.ceiling, 5.0);
    }

    #[test]
    fn window_roll_restores_budget() {
        let (ledger, clock) = ledger(5.0);
        ledger.record(5.0).unwrap();
        assert!(ledger.record(1.0).is_err());

        clock.advance(chrono::Duration::seconds(3601));
        assert_eq!(ledger.spent(), 0.0);
        assert!(ledger.record(1.0).is_ok());
        assert_eq!(ledger.status(), BudgetStatus::Healthy);
    }
}
