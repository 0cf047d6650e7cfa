//! Execution controls: optional timeout and a circuit breaker for backend failures.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Caller-tunable limits for sandboxed execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionControls {
    /// Wall-clock limit per execution (milliseconds). `None` waits forever.
    pub timeout_ms: Option<u64>,
    /// Consecutive infrastructure failures before the runner stops trying.
    pub breaker_threshold: u32,
}

impl Default for ExecutionControls {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            breaker_threshold: 5,
        }
    }
}

impl ExecutionControls {
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Atomic circuit breaker that opens after N consecutive failures.
///
/// Thread-safe via `AtomicU32`. Resets on success.
#[derive(Debug)]
pub struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    threshold: u32,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given failure threshold.
    ///
    /// A threshold of 0 disables the breaker.
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            threshold,
        }
    }

    /// Returns `true` if the breaker is open (too many consecutive failures).
    pub fn is_open(&self) -> bool {
        self.threshold > 0 && self.consecutive_failures.load(Ordering::Relaxed) >= self.threshold
    }

    /// Record a failure. Returns current consecutive failure count.
    pub fn record_failure(&self) -> u32 {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Reset on success.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Current consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}
