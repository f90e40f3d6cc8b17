//! # Fibonacci Backoff
//!
//! Progressive backoff for failed reconciliations. It grows more slowly than
//! exponential backoff, so a resource that keeps failing is retried often at
//! first without hammering the store or the API server later on.
//!
//! Every step is a whole multiple of the base unit:
//! `1, 1, 2, 3, 5, 8, ...` units, capped at the maximum.
//!
//! ```rust
//! use asset_store_controller::controller::backoff::FibonacciBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = FibonacciBackoff::new(Duration::from_secs(1), Duration::from_secs(300));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(3));
//! ```

use std::time::Duration;

/// Fibonacci backoff calculator
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    unit: Duration,
    max: Duration,
    prev_units: u32,
    current_units: u32,
}

impl FibonacciBackoff {
    /// `unit` is the first (and second) delay; the sequence never exceeds `max`
    #[must_use]
    pub fn new(unit: Duration, max: Duration) -> Self {
        Self {
            unit,
            max,
            prev_units: 0,
            current_units: 1,
        }
    }

    /// Current delay; advances the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.unit.saturating_mul(self.current_units).min(self.max);

        if result < self.max {
            let next = self.prev_units.saturating_add(self.current_units);
            self.prev_units = self.current_units;
            self.current_units = next;
        }

        result
    }

    /// Restart from the first step after a successful pass
    pub fn reset(&mut self) {
        self.prev_units = 0;
        self.current_units = 1;
    }
}
