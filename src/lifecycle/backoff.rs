use std::time::{Duration, Instant};

/// Doubling delay between readiness attempts, bounded by a cap and a deadline.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    next: Duration,
    max: Duration,
    deadline: Instant,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration, timeout: Duration) -> Self {
        Self {
            next: initial,
            max: max.max(initial),
            deadline: Instant::now() + timeout,
        }
    }

    /// Delay before the next attempt, or `None` once the deadline has passed.
    ///
    /// Never returns a delay that ends after the deadline.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        let remaining = self.deadline.checked_duration_since(Instant::now())?;
        if remaining.is_zero() {
            return None;
        }
        let delay = self.next.min(remaining);
        self.next = (self.next * 2).min(self.max);
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_up_to_cap() {
        let mut backoff = Backoff::new(
            Duration::from_millis(1),
            Duration::from_millis(10),
            Duration::from_secs(60),
        );

        let delays: Vec<u128> = (0..6)
            .map(|_| backoff.next_delay().unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_delay_never_passes_deadline() {
        let mut backoff = Backoff::new(
            Duration::from_secs(5),
            Duration::from_secs(5),
            Duration::from_millis(50),
        );
        let delay = backoff.next_delay().unwrap();
        assert!(delay <= Duration::from_millis(50));
    }

    #[test]
    fn test_expired_after_deadline() {
        let mut backoff = Backoff::new(
            Duration::from_millis(1),
            Duration::from_millis(1),
            Duration::ZERO,
        );
        assert_eq!(backoff.next_delay(), None);
    }
}
