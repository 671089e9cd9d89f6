//! Rate limiting for inference attempts.

use std::time::{Duration, Instant};

/// Default minimum spacing between inference attempts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// Lets an operation through at most once per interval.
///
/// The clock is advanced when an attempt is *allowed*, not when it completes, so a slow operation
/// never causes a backlog of queued attempts.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Returns whether an attempt at time `now` may proceed, recording it if so.
    ///
    /// The first attempt always proceeds.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Forgets the last attempt, so that the next one proceeds immediately.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}
