//! Circuit breaker guarding a model backend
//!
//! Each client owns one breaker. After `threshold` consecutive hard failures
//! the breaker opens and calls fail fast until `cooldown` has passed; the
//! next call is then let through as a probe.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are rejected without reaching the backend
    Open,
    /// Cooldown elapsed, the next request decides
    HalfOpen,
}

#[derive(Debug, Default)]
struct BreakerInner {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Consecutive-failure circuit breaker
///
/// ```
/// use kiln_agent::CircuitBreaker;
/// use std::time::Duration;
///
/// let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
/// breaker.record_failure();
/// breaker.record_failure();
/// assert!(breaker.check().is_err());
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner::default()),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        match inner.opened_at {
            None => CircuitState::Closed,
            Some(at) if at.elapsed() >= self.cooldown => CircuitState::HalfOpen,
            Some(_) => CircuitState::Open,
        }
    }

    /// `Err(remaining)` while the breaker is open
    pub fn check(&self) -> Result<(), Duration> {
        let inner = self.lock();
        match inner.opened_at {
            Some(at) if at.elapsed() < self.cooldown => {
                Err(self.cooldown.saturating_sub(at.elapsed()))
            }
            _ => Ok(()),
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        if inner.consecutive_failures >= self.threshold {
            // A failed probe restarts the cooldown
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(60))
    }
}
