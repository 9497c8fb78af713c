//! Reconnect delay schedule.

use std::time::Duration;

/// Exponential backoff for reconnect attempts.
///
/// Delay for attempt `n` (zero-based) is `initial × factor^n`, capped at
/// `max_delay`. The exponent saturates at `max_exponent` so repeated
/// failures stop growing the schedule; a successful open resets it.
#[derive(Debug, Clone)]
pub(crate) struct ReconnectBackoff {
    initial: Duration,
    max_delay: Duration,
    factor: f64,
    max_exponent: u32,
    attempts: u32,
}

impl ReconnectBackoff {
    pub(crate) fn new(initial: Duration, max_delay: Duration, factor: f64, max_exponent: u32) -> Self {
        Self {
            initial,
            max_delay,
            factor,
            max_exponent,
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt, then advances the schedule.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let exponent = self.attempts.min(self.max_exponent);
        let millis = self.initial.as_millis() as f64 * self.factor.powi(exponent as i32);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        self.attempts = self.attempts.saturating_add(1).min(self.max_exponent);
        Duration::from_millis(capped as u64)
    }

    pub(crate) fn reset(&mut self) {
        self.attempts = 0;
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }
}
