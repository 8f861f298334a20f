//! Monotonic capture clock and frame pacing
//!
//! Every frame timestamp derives from one `CaptureClock`, so timestamps are
//! monotonic across the stream and recording paths.

use std::time::{Duration, Instant};

/// Monotonic clock whose zero is the moment capture started
#[derive(Debug, Clone, Copy)]
pub struct CaptureClock {
    start: Instant,
}

impl CaptureClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    #[inline]
    pub fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for CaptureClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-rate ticker for the capture loop.
///
/// Deadlines advance by exactly one interval per tick, so a slow frame is
/// absorbed by the next sleep instead of shifting the whole schedule. When the
/// loop falls more than one interval behind, the schedule resets to now
/// rather than bursting to catch up.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    next: Instant,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Time to sleep before the next frame is due; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let now = Instant::now();
        self.next += self.interval;
        if self.next <= now {
            if now.duration_since(self.next) > self.interval {
                self.next = now;
            }
            return Duration::ZERO;
        }
        self.next - now
    }
}
