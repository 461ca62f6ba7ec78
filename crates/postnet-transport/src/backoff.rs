use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter, bounded per spec §4.5 (base 500 ms, cap
/// 8 s, +0-250 ms jitter). Doubles on every failed attempt; resets on a
/// successful connection.
pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter_max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(500),
            Duration::from_secs(8),
            Duration::from_millis(250),
        )
    }
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, jitter_max: Duration) -> Self {
        Self {
            base,
            cap,
            jitter_max,
            current: base,
        }
    }

    /// The delay to wait before the next reconnect attempt, then advances
    /// the backoff for the attempt after that.
    pub fn next_delay(&mut self) -> Duration {
        let jitter_max_ms = self.jitter_max.as_millis() as u64;
        let jitter = if jitter_max_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_max_ms))
        };
        let delay = self.current + jitter;
        self.current = (self.current * 2).min(self.cap);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}
