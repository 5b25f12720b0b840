//! Circuit breaker around the one-way UDP send.
//!
//! # State machine
//!
//! ```text
//!            failure (< threshold)
//!           ┌─────────────────────┐
//!           ↓                     │
//!       ┌────────┐  failures ≥ N  ┌──────┐
//!       │ Closed │───────────────>│ Open │
//!       └────────┘                └──────┘
//!           ↑                        │ call after open_timeout
//!           │ successes ≥ M          ↓
//!       ┌──────────┐  failure   ┌──────────┐
//!       │ HalfOpen │<───────────│ HalfOpen │ (probing)
//!       └──────────┘───────────>└──────────┘
//!                      to Open
//! ```
//!
//! Pure state machine in the action style: the caller asks for a call
//! decision, performs the guarded operation itself when permitted, and
//! reports the outcome back. No I/O happens here, so the full transition
//! table is unit-tested under a manual clock.

use std::{ops::Sub, time::Duration};

/// Breaker tuning.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures in Closed that trip the breaker.
    pub failure_threshold: u32,
    /// Successful probes in HalfOpen that close the breaker.
    pub success_threshold: u32,
    /// Time Open before the next call is allowed to probe.
    pub open_timeout: Duration,
    /// Concurrent probes permitted while HalfOpen.
    pub half_open_max_in_flight: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
            half_open_max_in_flight: 3,
        }
    }
}

/// Breaker state, parameterized over the clock's instant type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState<I> {
    /// Normal operation, counting consecutive failures.
    Closed {
        /// Failures since the last success
        consecutive_failures: u32,
    },
    /// Tripped; calls are rejected until the timeout elapses.
    Open {
        /// When the breaker tripped
        opened_at: I,
    },
    /// Probing the downstream with a bounded number of calls.
    HalfOpen {
        /// Probes currently permitted but not yet resolved
        in_flight: u32,
        /// Successful probes so far
        successes: u32,
    },
}

/// Whether a guarded call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum CallDecision {
    /// Perform the operation, then report `on_success`/`on_failure`.
    Permitted,
    /// Do not perform the operation; count a breaker-open drop.
    Rejected,
}

/// Three-state failure isolator.
#[derive(Debug)]
pub struct CircuitBreaker<I> {
    config: BreakerConfig,
    state: BreakerState<I>,
}

impl<I> CircuitBreaker<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create a closed breaker.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self { config, state: BreakerState::Closed { consecutive_failures: 0 } }
    }

    /// Decide whether a call may go downstream at time `now`.
    pub fn on_call(&mut self, now: I) -> CallDecision {
        match self.state {
            BreakerState::Closed { .. } => CallDecision::Permitted,
            BreakerState::Open { opened_at } => {
                if now - opened_at >= self.config.open_timeout {
                    // This call becomes the first probe.
                    self.state = BreakerState::HalfOpen { in_flight: 0, successes: 0 };
                    CallDecision::Permitted
                } else {
                    CallDecision::Rejected
                }
            },
            BreakerState::HalfOpen { in_flight, successes } => {
                if in_flight < self.config.half_open_max_in_flight {
                    self.state = BreakerState::HalfOpen { in_flight: in_flight + 1, successes };
                    CallDecision::Permitted
                } else {
                    CallDecision::Rejected
                }
            },
        }
    }

    /// Record a successful guarded call.
    pub fn on_success(&mut self) {
        match self.state {
            BreakerState::Closed { .. } => {
                self.state = BreakerState::Closed { consecutive_failures: 0 };
            },
            BreakerState::HalfOpen { in_flight, successes } => {
                if successes + 1 >= self.config.success_threshold {
                    self.state = BreakerState::Closed { consecutive_failures: 0 };
                } else {
                    self.state = BreakerState::HalfOpen { in_flight, successes: successes + 1 };
                }
            },
            // A success while Open can only come from a call permitted before
            // the trip; it does not reopen the window.
            BreakerState::Open { .. } => {},
        }
    }

    /// Record a failed guarded call at time `now`.
    pub fn on_failure(&mut self, now: I) {
        match self.state {
            BreakerState::Closed { consecutive_failures } => {
                if consecutive_failures + 1 >= self.config.failure_threshold {
                    self.state = BreakerState::Open { opened_at: now };
                } else {
                    self.state =
                        BreakerState::Closed { consecutive_failures: consecutive_failures + 1 };
                }
            },
            BreakerState::HalfOpen { .. } => {
                self.state = BreakerState::Open { opened_at: now };
            },
            BreakerState::Open { .. } => {},
        }
    }

    /// Force Closed (operator recovery).
    pub fn reset(&mut self) {
        self.state = BreakerState::Closed { consecutive_failures: 0 };
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> BreakerState<I> {
        self.state
    }

    /// True when calls are currently rejected without probing.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.state, BreakerState::Open { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    struct Tick(u64);

    impl Sub for Tick {
        type Output = Duration;

        fn sub(self, rhs: Self) -> Duration {
            Duration::from_millis(self.0 - rhs.0)
        }
    }

    fn config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            open_timeout: Duration::from_millis(100),
            half_open_max_in_flight: 2,
        }
    }

    #[test]
    fn trips_after_consecutive_failures() {
        let mut breaker = CircuitBreaker::new(config());

        for i in 0..3 {
            assert_eq!(breaker.on_call(Tick(i)), CallDecision::Permitted);
            breaker.on_failure(Tick(i));
        }

        assert!(breaker.is_open());
        assert_eq!(breaker.on_call(Tick(50)), CallDecision::Rejected);
    }

    #[test]
    fn success_resets_the_failure_count() {
        let mut breaker = CircuitBreaker::new(config());

        breaker.on_failure(Tick(0));
        breaker.on_failure(Tick(1));
        breaker.on_success();
        breaker.on_failure(Tick(2));
        breaker.on_failure(Tick(3));

        // Two failures since the success: still closed
        assert_eq!(breaker.state(), BreakerState::Closed { consecutive_failures: 2 });
    }

    #[test]
    fn open_permits_a_probe_after_timeout() {
        let mut breaker = CircuitBreaker::new(config());
        for i in 0..3 {
            breaker.on_failure(Tick(i));
        }

        assert_eq!(breaker.on_call(Tick(99)), CallDecision::Rejected);
        assert_eq!(breaker.on_call(Tick(102)), CallDecision::Permitted);
        assert_eq!(breaker.state(), BreakerState::HalfOpen { in_flight: 0, successes: 0 });
    }

    #[test]
    fn half_open_bounds_concurrent_probes() {
        let mut breaker = CircuitBreaker::new(config());
        for i in 0..3 {
            breaker.on_failure(Tick(i));
        }

        // Timeout elapsed: first probe, then up to max_in_flight more
        assert_eq!(breaker.on_call(Tick(200)), CallDecision::Permitted);
        assert_eq!(breaker.on_call(Tick(200)), CallDecision::Permitted);
        assert_eq!(breaker.on_call(Tick(200)), CallDecision::Permitted);
        assert_eq!(breaker.on_call(Tick(200)), CallDecision::Rejected);
    }

    #[test]
    fn probe_successes_close_the_breaker() {
        let mut breaker = CircuitBreaker::new(config());
        for i in 0..3 {
            breaker.on_failure(Tick(i));
        }

        assert_eq!(breaker.on_call(Tick(200)), CallDecision::Permitted);
        breaker.on_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen { in_flight: 0, successes: 1 });

        assert_eq!(breaker.on_call(Tick(201)), CallDecision::Permitted);
        breaker.on_success();
        assert_eq!(breaker.state(), BreakerState::Closed { consecutive_failures: 0 });
    }

    #[test]
    fn probe_failure_reopens_immediately() {
        let mut breaker = CircuitBreaker::new(config());
        for i in 0..3 {
            breaker.on_failure(Tick(i));
        }

        assert_eq!(breaker.on_call(Tick(200)), CallDecision::Permitted);
        breaker.on_failure(Tick(201));

        assert_eq!(breaker.state(), BreakerState::Open { opened_at: Tick(201) });
        // The open window restarts from the probe failure
        assert_eq!(breaker.on_call(Tick(250)), CallDecision::Rejected);
        assert_eq!(breaker.on_call(Tick(301)), CallDecision::Permitted);
    }

    #[test]
    fn reset_forces_closed() {
        let mut breaker = CircuitBreaker::new(config());
        for i in 0..3 {
            breaker.on_failure(Tick(i));
        }
        assert!(breaker.is_open());

        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed { consecutive_failures: 0 });
        assert_eq!(breaker.on_call(Tick(10)), CallDecision::Permitted);
    }
}
