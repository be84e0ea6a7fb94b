//! Circuit breaker for external dependencies.
//!
//! State machine:
//!
//! ```text
//!   CLOSED ──(failure_threshold)──▶ OPEN ──(cooldown)──▶ HALF_OPEN
//!     ▲                                                      │
//!     ├──────────────────(probe succeeds)────────────────────┤
//!     └◀─────────────────(probe fails → OPEN again)──────────┘
//! ```
//!
//! - **Closed**: calls pass through; consecutive failures are counted.
//! - **Open**: calls short-circuit with `CircuitOpen` until the cooldown
//!   elapses.
//! - **Half-open**: exactly one probe call is admitted; its outcome decides
//!   whether the circuit closes or reopens.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::BreakerConfig;
use crate::error::{Error, Result};

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// A circuit breaker guarding one named dependency.
pub struct CircuitBreaker {
    dependency: String,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            dependency: dependency.into(),
            failure_threshold: config.failure_threshold.max(1),
            cooldown: Duration::from_millis(config.cooldown_ms),
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// The dependency this breaker guards.
    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Current state, advancing open → half-open when the cooldown elapsed.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        self.advance(&mut inner);
        inner.state
    }

    /// Count of consecutive failures observed while closed.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner
            .lock()
            .expect("breaker lock poisoned")
            .consecutive_failures
    }

    fn advance(&self, inner: &mut BreakerInner) {
        if inner.state == BreakerState::Open {
            let elapsed = inner
                .opened_at
                .map(|t| t.elapsed() >= self.cooldown)
                .unwrap_or(true);
            if elapsed {
                inner.state = BreakerState::HalfOpen;
                inner.probe_in_flight = false;
            }
        }
    }

    /// Admission check. Returns `CircuitOpen` without touching the dependency
    /// when the circuit is open, or when half-open and the probe slot is taken.
    pub fn admit(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        self.advance(&mut inner);
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => Err(Error::circuit_open(&self.dependency)),
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(Error::circuit_open(&self.dependency))
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        inner.opened_at = None;
        inner.state = BreakerState::Closed;
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::HalfOpen => {
                // The probe failed: reopen for another cooldown window.
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
            }
            _ => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
        }
    }

    /// Run `f` through the breaker: admission check, then outcome recording.
    ///
    /// `CircuitOpen` errors returned here never ran `f`; all other errors came
    /// from the dependency itself.
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit()?;
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "llm",
            BreakerConfig {
                failure_threshold: threshold,
                cooldown_ms,
            },
        )
    }

    #[test]
    fn test_starts_closed() {
        let b = breaker(3, 1000);
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.admit().is_ok());
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let b = breaker(3, 60_000);
        for _ in 0..2 {
            b.admit().unwrap();
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Closed);

        b.admit().unwrap();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);

        // Short-circuits in O(1) without touching the dependency.
        assert!(matches!(b.admit(), Err(Error::CircuitOpen { .. })));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let b = breaker(3, 60_000);
        b.record_failure();
        b.record_failure();
        assert_eq!(b.consecutive_failures(), 2);
        b.record_success();
        assert_eq!(b.consecutive_failures(), 0);
    }

    #[test]
    fn test_half_open_admits_single_probe() {
        let b = breaker(1, 10);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(b.state(), BreakerState::HalfOpen);

        // One probe admitted, concurrent calls rejected.
        assert!(b.admit().is_ok());
        assert!(matches!(b.admit(), Err(Error::CircuitOpen { .. })));

        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.admit().is_ok());
    }

    #[test]
    fn test_failed_probe_reopens() {
        let b = breaker(1, 10);
        b.record_failure();
        std::thread::sleep(Duration::from_millis(20));

        b.admit().unwrap();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(matches!(b.admit(), Err(Error::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn test_call_wraps_outcome() {
        let b = breaker(2, 60_000);

        let ok: Result<u32> = b.call(|| async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        for _ in 0..2 {
            let _: Result<u32> = b
                .call(|| async { Err(Error::LlmUnavailable("503".into())) })
                .await;
        }
        let blocked: Result<u32> = b.call(|| async { Ok(7) }).await;
        assert!(matches!(blocked, Err(Error::CircuitOpen { .. })));
    }
}
