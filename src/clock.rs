//! Monotonic time and window helpers shared by the rate limiter and latency monitor.

use std::time::{Duration, Instant};

/// A fixed-length rolling window counter (used by the order queue's per-minute rate
/// limit and the dry-run counter). Resets to zero the first time `count` is read or
/// bumped after the window has elapsed, mirroring the teacher's rate-limit middleware
/// (reset-on-expiry rather than a true sliding window).
#[derive(Debug, Clone)]
pub struct RollingWindow {
    window: Duration,
    started_at: Instant,
    count: u32,
}

impl RollingWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            started_at: Instant::now(),
            count: 0,
        }
    }

    fn reset_if_expired(&mut self) {
        if self.started_at.elapsed() >= self.window {
            self.started_at = Instant::now();
            self.count = 0;
        }
    }

    /// Current count after rolling the window over if expired.
    pub fn count(&mut self) -> u32 {
        self.reset_if_expired();
        self.count
    }

    pub fn increment(&mut self) {
        self.reset_if_expired();
        self.count += 1;
    }

    /// Time remaining until the window resets.
    pub fn remaining(&self) -> Duration {
        self.window.saturating_sub(self.started_at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resets_after_window_elapses() {
        let mut w = RollingWindow::new(Duration::from_millis(20));
        w.increment();
        w.increment();
        assert_eq!(w.count(), 2);
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(w.count(), 0);
    }

    #[test]
    fn remaining_shrinks_over_time() {
        let w = RollingWindow::new(Duration::from_millis(100));
        let r1 = w.remaining();
        std::thread::sleep(Duration::from_millis(10));
        let r2 = w.remaining();
        assert!(r2 < r1);
    }
}
