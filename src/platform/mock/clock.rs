use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::platform::Clock;

/// Simulated milliseconds; `sleep_ms` advances time instead of waiting
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now_ms: Arc<AtomicU64>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(ms: u64) -> Self {
        let clock = Self::new();
        clock.set(ms);
        clock
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn sleep_ms(&self, ms: u64) {
        self.advance(ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_advances_shared_time() {
        let clock = SimClock::new();
        let other = clock.clone();
        assert_eq!(clock.now_ms(), 0);

        clock.sleep_ms(100);
        other.advance(50);
        assert_eq!(clock.now_ms(), 150);
        assert_eq!(SimClock::starting_at(42).now_ms(), 42);
    }
}
