//! Fuzz target for the circuit breaker state machine.
//!
//! Drives arbitrary call/success/failure sequences with arbitrary clock
//! advances and checks the structural invariants: half-open probes never
//! exceed the configured bound, and an open breaker rejects every call until
//! its timeout has elapsed.

#![no_main]

use std::{ops::Sub, time::Duration};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use weir_core::breaker::{BreakerConfig, BreakerState, CallDecision, CircuitBreaker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Tick(u64);

impl Sub for Tick {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        Duration::from_millis(self.0 - rhs.0)
    }
}

#[derive(Debug, Arbitrary)]
enum Op {
    Call,
    Success,
    Failure,
    Advance(u16),
    Reset,
}

fuzz_target!(|ops: Vec<Op>| {
    let config = BreakerConfig::default();
    let mut breaker: CircuitBreaker<Tick> = CircuitBreaker::new(config);
    let mut now = Tick(0);

    for op in ops {
        match op {
            Op::Call => {
                let opened_at = match breaker.state() {
                    BreakerState::Open { opened_at } => Some(opened_at),
                    _ => None,
                };
                let decision = breaker.on_call(now);

                if let Some(opened_at) = opened_at {
                    let timed_out = now - opened_at >= config.open_timeout;
                    let expected =
                        if timed_out { CallDecision::Permitted } else { CallDecision::Rejected };
                    assert_eq!(decision, expected, "open breaker honours its timeout");
                }

                if let BreakerState::HalfOpen { in_flight, .. } = breaker.state() {
                    assert!(in_flight <= config.half_open_max_in_flight);
                }
            },
            Op::Success => breaker.on_success(),
            Op::Failure => breaker.on_failure(now),
            Op::Advance(ms) => now = Tick(now.0 + u64::from(ms)),
            Op::Reset => {
                breaker.reset();
                assert_eq!(breaker.state(), BreakerState::Closed { consecutive_failures: 0 });
            },
        }

        if let BreakerState::Closed { consecutive_failures } = breaker.state() {
            assert!(consecutive_failures < config.failure_threshold);
        }
    }
});
