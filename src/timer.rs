/// Elapsed-time gate for the periodic activities of the cooperative loop
///
/// Compares against a caller-supplied `now` instead of reading a clock so the
/// same logic runs against simulated time in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicTimer {
    last_fire_ms: u64,
    interval_ms: u64,
}

impl PeriodicTimer {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            last_fire_ms: 0,
            interval_ms,
        }
    }

    /// Start counting the first interval from `now` rather than from boot
    pub fn starting_at(interval_ms: u64, now_ms: u64) -> Self {
        Self {
            last_fire_ms: now_ms,
            interval_ms,
        }
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_fire_ms) >= self.interval_ms
    }

    pub fn reset(&mut self, now_ms: u64) {
        self.last_fire_ms = now_ms;
    }

    /// Returns true and rearms the timer when the interval has elapsed
    pub fn fire(&mut self, now_ms: u64) -> bool {
        if self.is_due(now_ms) {
            self.reset(now_ms);
            true
        } else {
            false
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn last_fire_ms(&self) -> u64 {
        self.last_fire_ms
    }
}
