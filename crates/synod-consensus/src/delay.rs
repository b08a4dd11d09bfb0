//! Simulated network latency.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Sleeps for a random time in `[0, max]` before a send or receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayInjector {
    max: Duration,
}

impl DelayInjector {
    /// Creates an injector bounded by `max`.
    pub fn new(max: Duration) -> Self {
        Self { max }
    }

    /// An injector that never sleeps.
    pub fn none() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Picks the next delay.
    pub fn sample(&self) -> Duration {
        let max_ms = self.max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    /// Sleeps for a sampled delay before `what`.
    pub async fn pause(&self, what: &str) {
        self.pause_within(what, self.max).await;
    }

    /// Like [`pause`](Self::pause), but never sleeps longer than `limit`.
    pub async fn pause_within(&self, what: &str, limit: Duration) {
        let delay = self.sample().min(limit);
        if delay.is_zero() {
            return;
        }
        debug!(delay_ms = delay.as_millis() as u64, what, "injecting delay");
        tokio::time::sleep(delay).await;
    }
}

impl Default for DelayInjector {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_stay_in_bounds() {
        let delay = DelayInjector::new(Duration::from_millis(250));
        for _ in 0..1000 {
            assert!(delay.sample() <= Duration::from_millis(250));
        }
    }

    #[test]
    fn zero_bound_never_sleeps() {
        assert_eq!(DelayInjector::none().sample(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_never_exceeds_bound() {
        let delay = DelayInjector::new(Duration::from_secs(5));
        let start = tokio::time::Instant::now();
        delay.pause("test").await;
        assert!(start.elapsed() <= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_within_respects_limit() {
        let delay = DelayInjector::new(Duration::from_secs(5));
        let start = tokio::time::Instant::now();
        delay.pause_within("test", Duration::from_millis(10)).await;
        assert!(start.elapsed() < Duration::from_millis(20));
    }
}
