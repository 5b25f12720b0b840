//! One-way UDP gateway runtime.
//!
//! Two processes share this crate. `weir-send` runs the ingress (S1) side:
//! it accepts TCP streams and UDP datagrams from untrusted clients, pushes
//! every chunk through the admission pipeline (classify → per-source rate
//! limit → shape → circuit breaker) and emits admitted payloads as CRC-sealed
//! frames over UDP. `weir-recv` runs the egress (S2) side: it receives
//! frames, validates them, and persists each payload as one atomically
//! published file. Nothing on the egress side ever opens a socket toward the
//! ingress side; the UDP link is the only coupling.
//!
//! # Architecture
//!
//! The state machines live in [`weir_core`] (sans-IO, driven by explicit
//! instants); this crate is the glue that wires them to tokio sockets, the
//! filesystem, and the supervisor. Each long-lived component is one task:
//!
//! - ingress: TCP listener, optional UDP listener, the encapsulator (which
//!   owns the outbound socket and all admission state)
//! - egress: UDP listener with a bounded worker pool, the decapsulator and
//!   its directory spool, the heartbeat monitor
//! - both: watchdog gate, supervisor with bounded restart intensity

#![warn(missing_docs)]

pub mod config;
pub mod control;
pub mod egress;
pub mod ingress;
pub mod signals;
pub mod supervisor;
pub mod system_env;
pub mod watchdog;

pub use config::{Config, ConfigError};
pub use system_env::SystemEnv;
