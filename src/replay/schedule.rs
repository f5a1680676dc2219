//! Inter-dispatch gap computation

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Timing policy for one replay session
#[derive(Debug, Clone, Copy)]
pub struct SchedulePolicy {
    rate: f64,
    min_gap: Duration,
    fixed_delay: Option<Duration>,
}

impl SchedulePolicy {
    /// Build a policy from a rate multiplier, an optional dispatch-rate cap,
    /// and an optional fixed inter-event delay.
    ///
    /// Callers validate `rate > 0` and `max_rps > 0` up front (config load).
    #[must_use]
    pub fn new(rate: f64, max_rps: Option<f64>, fixed_delay: Option<Duration>) -> Self {
        let min_gap = max_rps
            .map(|rps| Duration::from_secs_f64(1.0 / rps))
            .unwrap_or(Duration::ZERO);

        Self {
            rate,
            min_gap,
            fixed_delay,
        }
    }

    /// Wait before dispatching the event captured at `next`, given its
    /// predecessor was captured at `prev`.
    ///
    /// Negative or out-of-order gaps are clamped to zero before scaling; the
    /// rate cap's floor applies regardless of the source timing.
    #[must_use]
    pub fn gap_between(&self, prev: DateTime<Utc>, next: DateTime<Utc>) -> Duration {
        let base = if let Some(fixed) = self.fixed_delay {
            fixed
        } else {
            let original = (next - prev).to_std().unwrap_or(Duration::ZERO);
            original.div_f64(self.rate)
        };

        base.max(self.min_gap)
    }

    /// Floor between dispatches derived from the rate cap
    #[must_use]
    pub fn min_gap(&self) -> Duration {
        self.min_gap
    }
}
