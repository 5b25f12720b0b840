//! Periodic link-liveness evaluation.
//!
//! Beacon observations arrive through the decapsulator; this task only runs
//! the timeout check on a coarse timer and publishes the dead/alive flag for
//! the control surface. The dead transition is reported exactly once, as is
//! the recovery (which the decapsulator reports when beacons resume).

use std::{
    sync::{Arc, Mutex, atomic::AtomicBool, atomic::Ordering},
    time::Duration,
};

use weir_core::{
    env::Environment,
    metrics::GatewayMetrics,
    monitor::{LinkEvent, LinkMonitor},
};

use crate::{signals::Shutdown, supervisor::ChildError};

/// Evaluation loop.
pub(crate) async fn run<E: Environment>(
    env: E,
    monitor: Arc<Mutex<LinkMonitor<E::Instant>>>,
    link_dead: Arc<AtomicBool>,
    metrics: Arc<GatewayMetrics>,
    check_interval: Duration,
    mut shutdown: Shutdown,
) -> Result<(), ChildError> {
    loop {
        tokio::select! {
            () = env.sleep(check_interval) => {
                let event = {
                    // INVARIANT: check cannot panic; the lock cannot be
                    // poisoned by this use.
                    #[allow(clippy::unwrap_used)]
                    let mut monitor = monitor.lock().unwrap();
                    monitor.check(env.now())
                };
                if let Some(LinkEvent::Dead { silent_for }) = event {
                    metrics.link_dead_events.incr();
                    link_dead.store(true, Ordering::SeqCst);
                    tracing::warn!(?silent_for, "link dead: no beacons from the ingress side");
                }
            },
            () = shutdown.recv() => return Ok(()),
        }
    }
}
