//! Admission state machines and shared records for the weir gateway.
//!
//! Everything in this crate is sans-IO: no sockets, no filesystem, no global
//! clock. Time enters as an explicit instant parameter and randomness through
//! the [`env::Environment`] abstraction, so every component runs identically
//! under the production runtime and under a deterministic test clock.
//!
//! # Components
//!
//! - [`classify`]: deep-packet-inspection protocol whitelist
//! - [`ratelimit`]: per-source fixed-window limiter with a bounded table
//! - [`shaper`]: continuously-refilled token bucket
//! - [`breaker`]: closed/open/half-open circuit breaker
//! - [`monitor`]: link liveness from heartbeat beacons
//! - [`metrics`]: the typed counter record every admission decision updates
//! - [`admission`]: the sum-typed verdicts shared by the pipeline

pub mod admission;
pub mod breaker;
pub mod classify;
pub mod env;
pub mod metrics;
pub mod monitor;
pub mod ratelimit;
pub mod shaper;
