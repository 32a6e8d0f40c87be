//! Starvation backoff: exponential wait while no account is eligible

use std::time::Duration;

/// Doubles from `initial` up to `max`; reset once an action gets dispatched
#[derive(Debug, Clone)]
pub struct StarvationBackoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl StarvationBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: None,
        }
    }

    /// Next wait, never longer than `max`
    pub fn next(&mut self) -> Duration {
        let next = match self.current {
            None => self.initial,
            Some(current) => current.saturating_mul(2).min(self.max),
        };
        self.current = Some(next);
        next
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}
