//! Circuit breaker guarding downstream interactions.
//!
//! Binary open/closed with a cool-down. Closed counts consecutive failures;
//! reaching the threshold opens the circuit for the cool-down period, after
//! which the next `allow` closes it again. Any recorded success closes the
//! circuit immediately.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Consecutive failures before the circuit opens.
pub const DEFAULT_THRESHOLD: u32 = 5;

/// How long the circuit stays open once tripped.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    open_until: Option<Instant>,
}

/// Thread-safe two-state circuit breaker.
///
/// All transitions happen under one mutex so concurrent callers observe a
/// consistent state.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_COOLDOWN)
    }
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Whether a call may proceed.
    ///
    /// When the cool-down has elapsed the transitioning caller closes the
    /// circuit and is allowed through.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        match state.open_until {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                state.open_until = None;
                true
            }
            None => true,
        }
    }

    /// Records a successful call, closing the circuit and clearing the
    /// failure count.
    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        state.failure_count = 0;
        state.open_until = None;
    }

    /// Records a failed call.
    ///
    /// # Returns
    /// `true` when this failure tripped the circuit open.
    pub fn record_failure(&self) -> bool {
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        state.failure_count += 1;
        if state.failure_count >= self.threshold {
            state.failure_count = 0;
            state.open_until = Some(Instant::now() + self.cooldown);
            tracing::warn!(
                cooldown_secs = self.cooldown.as_secs(),
                "circuit breaker opened"
            );
            return true;
        }
        false
    }

    /// Remaining cool-down, if the circuit is currently open.
    pub fn remaining(&self) -> Option<Duration> {
        let state = self.state.lock().expect("breaker mutex poisoned");
        state
            .open_until
            .and_then(|until| until.checked_duration_since(Instant::now()))
    }
}
