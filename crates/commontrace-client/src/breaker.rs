//! Circuit breaker state machine.
//!
//! Closed -> Open after enough failures inside the rolling window;
//! Open -> Half-Open once the recovery window elapses (the first caller
//! through becomes the probe); Half-Open -> Closed on probe success,
//! back to Open on probe failure.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Failures within the window before the circuit opens
pub const FAILURE_THRESHOLD: u32 = 5;

/// How long the circuit stays open, and how long the failure-counting
/// window lasts
pub const RECOVERY_WINDOW: Duration = Duration::from_secs(30);

/// Observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
enum Inner {
    Closed {
        failures: u32,
        window_start: Option<Instant>,
    },
    Open {
        opened_at: Instant,
    },
    HalfOpen,
}

/// Per-target circuit breaker
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    threshold: u32,
    recovery: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_settings(FAILURE_THRESHOLD, RECOVERY_WINDOW)
    }

    pub fn with_settings(threshold: u32, recovery: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::Closed {
                failures: 0,
                window_start: None,
            }),
            threshold,
            recovery,
        }
    }

    /// Current state (Open may report Half-Open once the window elapsed)
    pub fn state(&self) -> BreakerState {
        match *self.lock() {
            Inner::Closed { .. } => BreakerState::Closed,
            Inner::Open { .. } => BreakerState::Open,
            Inner::HalfOpen => BreakerState::HalfOpen,
        }
    }

    /// Gate a call. `Ok` means proceed (and in Half-Open, this caller is
    /// the probe); `Err(())` means reject immediately.
    pub fn check(&self) -> Result<(), ()> {
        self.check_at(Instant::now())
    }

    /// Record a successful (or at least server-alive) response
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if matches!(*inner, Inner::HalfOpen) {
            tracing::info!("circuit closed: probe succeeded");
        }
        *inner = Inner::Closed {
            failures: 0,
            window_start: None,
        };
    }

    /// Record a circuit-relevant failure (5xx, timeout, transport)
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    fn check_at(&self, now: Instant) -> Result<(), ()> {
        let mut inner = self.lock();
        match *inner {
            Inner::Closed { .. } => Ok(()),
            Inner::Open { opened_at } => {
                if now.duration_since(opened_at) >= self.recovery {
                    // Recovery window elapsed: let exactly one probe through
                    tracing::info!("circuit half-open: probing backend");
                    *inner = Inner::HalfOpen;
                    Ok(())
                } else {
                    Err(())
                }
            }
            // A probe is already in flight; keep rejecting until it lands
            Inner::HalfOpen => Err(()),
        }
    }

    fn record_failure_at(&self, now: Instant) {
        let mut inner = self.lock();
        match *inner {
            Inner::Closed {
                failures,
                window_start,
            } => {
                // Failures outside the rolling window restart the count
                let (failures, window_start) = match window_start {
                    Some(start) if now.duration_since(start) < self.recovery => {
                        (failures + 1, start)
                    }
                    _ => (1, now),
                };
                if failures >= self.threshold {
                    tracing::warn!(failures, "circuit opened: failure threshold reached");
                    *inner = Inner::Open { opened_at: now };
                } else {
                    *inner = Inner::Closed {
                        failures,
                        window_start: Some(window_start),
                    };
                }
            }
            // Failed probe: reopen for a fresh recovery window
            Inner::HalfOpen => {
                tracing::warn!("circuit reopened: probe failed");
                *inner = Inner::Open { opened_at: now };
            }
            Inner::Open { .. } => {}
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned breaker falls back to whatever state it held
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
