//! The decapsulator: validate, recognize beacons, persist.
//!
//! Per-datagram errors never leave this module; they become counters and
//! sampled logs. The one escalation is a persistently failing spool: after a
//! run of consecutive write failures the decapsulator flags itself fatal and
//! the listener hands the component to the supervisor.
//!
//! Nothing here can write to a network. The decapsulator holds no socket and
//! its interface has no send operation; the one-way property is structural.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use tokio::sync::Notify;
use weir_core::{
    admission::DropReason,
    env::Environment,
    metrics::GatewayMetrics,
    monitor::{LinkEvent, LinkMonitor},
};

use super::spool::{Spool, SpoolError};

/// Consecutive write failures after which the spool is declared failing.
const FATAL_WRITE_THRESHOLD: u32 = 8;

/// What became of one received datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Disposition {
    /// Payload persisted under this file name.
    Persisted(String),
    /// Liveness beacon; monitor updated, nothing written.
    Heartbeat,
    /// Dropped; the reason's counter was bumped.
    Dropped(DropReason),
}

/// Frame validation and persistence.
pub struct Decapsulator<E: Environment, S: Spool> {
    env: E,
    spool: S,
    metrics: Arc<GatewayMetrics>,
    monitor: Arc<Mutex<LinkMonitor<E::Instant>>>,
    link_dead: Arc<AtomicBool>,
    consecutive_write_failures: AtomicU32,
    fatal: Arc<Notify>,
    fatal_flagged: AtomicBool,
}

impl<E: Environment, S: Spool> Decapsulator<E, S> {
    /// Assemble the egress processing path.
    pub fn new(
        env: E,
        spool: S,
        metrics: Arc<GatewayMetrics>,
        monitor: Arc<Mutex<LinkMonitor<E::Instant>>>,
        link_dead: Arc<AtomicBool>,
    ) -> Self {
        Self {
            env,
            spool,
            metrics,
            monitor,
            link_dead,
            consecutive_write_failures: AtomicU32::new(0),
            fatal: Arc::new(Notify::new()),
            fatal_flagged: AtomicBool::new(false),
        }
    }

    /// Validate and process one datagram.
    pub fn process(&self, datagram: &[u8]) -> Disposition {
        let frame = match weir_proto::decode(datagram) {
            Ok(frame) => frame,
            Err(error) => {
                let count = self.metrics.record_drop(DropReason::IntegrityFailed);
                if count % 100 == 1 {
                    tracing::warn!(%error, len = datagram.len(), "frame rejected");
                }
                return Disposition::Dropped(DropReason::IntegrityFailed);
            },
        };

        if frame.is_heartbeat() {
            self.metrics.heartbeats_seen.incr();
            let recovered = {
                // INVARIANT: observe_beacon cannot panic; the lock cannot be
                // poisoned by this use.
                #[allow(clippy::unwrap_used)]
                let mut monitor = self.monitor.lock().unwrap();
                monitor.observe_beacon(self.env.now())
            };
            if let Some(LinkEvent::Recovered) = recovered {
                self.metrics.link_recovered_events.incr();
                self.link_dead.store(false, Ordering::SeqCst);
                tracing::info!("link recovered: beacons resumed");
            }
            return Disposition::Heartbeat;
        }

        match self.spool.store(frame.payload) {
            Ok(name) => {
                self.consecutive_write_failures.store(0, Ordering::Relaxed);
                self.metrics.packets_received.incr();
                self.metrics.bytes_received.add(frame.payload.len() as u64);
                tracing::trace!(name, src = %frame.src_ip, "record persisted");
                Disposition::Persisted(name)
            },
            Err(error) => {
                self.metrics.record_drop(DropReason::WriteFailed);
                tracing::error!(%error, "record write failed");

                let failures = self.consecutive_write_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= FATAL_WRITE_THRESHOLD
                    && !self.fatal_flagged.swap(true, Ordering::SeqCst)
                {
                    tracing::error!(failures, "spool is failing persistently");
                    self.fatal.notify_waiters();
                }
                Disposition::Dropped(DropReason::WriteFailed)
            },
        }
    }

    /// Sync the spool directory; called at shutdown under a deadline.
    pub fn flush(&self) -> Result<(), SpoolError> {
        self.spool.flush()
    }

    /// Notifier fired once when the spool is declared failing.
    pub(crate) fn fatal_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.fatal)
    }

    /// True once the spool has been declared failing.
    #[must_use]
    pub fn is_failing(&self) -> bool {
        self.fatal_flagged.load(Ordering::SeqCst)
    }
}
