//! Request deadlines.
//!
//! One deadline value is created per request and propagated to every LLM and
//! executor call; the most restrictive of the per-call timeout and the
//! remaining request budget wins.

use std::time::{Duration, Instant};

/// An absolute point in time by which a request must finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// Time left, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// The smaller of a per-call timeout and the remaining request budget.
    pub fn clamp(&self, per_call: Duration) -> Duration {
        per_call.min(self.remaining())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_deadline_not_expired() {
        let deadline = Deadline::after(Duration::from_secs(60));
        assert!(!deadline.is_expired());
        assert!(deadline.remaining() > Duration::from_secs(59));
    }

    #[test]
    fn test_expired_deadline() {
        let deadline = Deadline::after(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(1));
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_clamp_takes_most_restrictive() {
        let deadline = Deadline::after(Duration::from_secs(10));
        assert_eq!(deadline.clamp(Duration::from_secs(5)), Duration::from_secs(5));
        assert!(deadline.clamp(Duration::from_secs(30)) <= Duration::from_secs(10));
    }
}
