//! Leading-edge publish throttle.

use std::time::Duration;

use tokio::time::Instant;

/// Lets a publish through when at least `interval` has passed since the
/// last one. The first call always passes.
#[derive(Debug, Clone)]
pub struct PublishThrottle {
    interval: Duration,
    last_published: Option<Instant>,
}

impl PublishThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_published: None,
        }
    }

    /// Returns whether to publish at `now`, recording it if so.
    pub fn should_publish(&mut self, now: Instant) -> bool {
        let due = match self.last_published {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last_published = Some(now);
        }
        due
    }

    pub fn last_published(&self) -> Option<Instant> {
        self.last_published
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_edge() {
        let start = Instant::now();
        let mut throttle = PublishThrottle::new(Duration::from_millis(5000));

        assert!(throttle.should_publish(start));
        assert!(!throttle.should_publish(start + Duration::from_millis(1)));
        assert!(!throttle.should_publish(start + Duration::from_millis(4999)));
        assert!(throttle.should_publish(start + Duration::from_millis(5000)));
        assert_eq!(
            throttle.last_published(),
            Some(start + Duration::from_millis(5000))
        );
    }

    #[test]
    fn test_suppressed_samples_do_not_extend_window() {
        let start = Instant::now();
        let mut throttle = PublishThrottle::new(Duration::from_secs(5));

        assert!(throttle.should_publish(start));
        for ms in [1000, 2000, 3000, 4000] {
            assert!(!throttle.should_publish(start + Duration::from_millis(ms)));
        }
        assert!(throttle.should_publish(start + Duration::from_millis(5200)));
    }
}
