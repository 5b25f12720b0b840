//! Component supervision with bounded restart intensity.
//!
//! Each long-lived component is a child task described by a [`ChildSpec`].
//! Children are restarted in isolation: one crashing child never restarts its
//! siblings. All restarts draw from one shared budget; exhausting it (50
//! restarts in any 10-second window by default) signals shutdown and is the
//! only path that terminates the process.
//!
//! Ordering: children start in the order they were added (leaves first) and
//! all observe the same shutdown signal. Listeners select on it ahead of
//! their sockets so they stop admitting work first; the egress runtime then
//! drains its worker pool and flushes the spool before the process exits.

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::sync::watch;
use weir_core::{env::Environment, metrics::GatewayMetrics};

use crate::signals::{Shutdown, ShutdownHandle};

/// Error type children report to the supervisor.
pub type ChildError = Box<dyn std::error::Error + Send + Sync>;

/// A running child instance.
pub type ChildFuture = Pin<Box<dyn Future<Output = Result<(), ChildError>> + Send>>;

/// Description of one supervised component.
pub struct ChildSpec {
    /// Component name (used in the health registry and logs).
    pub name: &'static str,
    /// Whether the watchdog gates its pulse on this component.
    pub critical: bool,
    /// Factory producing a fresh run future for each (re)start.
    pub start: Box<dyn FnMut() -> ChildFuture + Send>,
}

/// Supervision tuning.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    /// Restarts tolerated inside the window before the process exits.
    pub max_restarts: u32,
    /// Sliding window for restart counting.
    pub restart_window: Duration,
    /// Pause before restarting a failed child.
    pub restart_backoff: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: 50,
            restart_window: Duration::from_secs(10),
            restart_backoff: Duration::from_millis(200),
        }
    }
}

/// Why `Supervisor::run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Shutdown was signalled and every child stopped.
    Graceful,
    /// The restart budget was exhausted; shutdown was forced.
    IntensityExhausted,
}

/// Liveness of one registered component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    /// Running.
    Up,
    /// Crashed, waiting out the restart backoff.
    Restarting,
    /// Exited cleanly (shutdown) or permanently (budget exhausted).
    Stopped,
}

/// Typed component-liveness record, read by the watchdog and the control
/// surface.
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    inner: Arc<Mutex<HashMap<&'static str, (ChildState, bool)>>>,
}

impl HealthRegistry {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<&'static str, (ChildState, bool)>> {
        // INVARIANT: the map operations below never panic, so the mutex
        // cannot be poisoned by this type's own methods.
        #[allow(clippy::unwrap_used)]
        self.inner.lock().unwrap()
    }

    pub(crate) fn register(&self, name: &'static str, critical: bool) {
        self.lock().insert(name, (ChildState::Up, critical));
    }

    pub(crate) fn set(&self, name: &'static str, state: ChildState) {
        if let Some(entry) = self.lock().get_mut(name) {
            entry.0 = state;
        }
    }

    /// First critical component that is not up, if any.
    #[must_use]
    pub fn first_down_critical(&self) -> Option<&'static str> {
        self.lock()
            .iter()
            .find(|(_, (state, critical))| *critical && *state != ChildState::Up)
            .map(|(name, _)| *name)
    }

    /// True when every critical component is up.
    #[must_use]
    pub fn all_critical_up(&self) -> bool {
        self.first_down_critical().is_none()
    }

    /// Name and state of every registered component.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(&'static str, ChildState)> {
        let mut entries: Vec<_> =
            self.lock().iter().map(|(name, (state, _))| (*name, *state)).collect();
        entries.sort_unstable_by_key(|(name, _)| *name);
        entries
    }
}

struct RestartBudget<I> {
    window: Duration,
    max: u32,
    history: Mutex<VecDeque<I>>,
}

impl<I> RestartBudget<I>
where
    I: Copy + Ord + std::ops::Sub<Output = Duration>,
{
    fn new(config: &SupervisorConfig) -> Self {
        Self {
            window: config.restart_window,
            max: config.max_restarts,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one restart; false when the budget is exceeded.
    fn record(&self, now: I) -> bool {
        // INVARIANT: the deque operations below never panic.
        #[allow(clippy::unwrap_used)]
        let mut history = self.history.lock().unwrap();
        while let Some(&oldest) = history.front() {
            if now - oldest > self.window {
                history.pop_front();
            } else {
                break;
            }
        }
        history.push_back(now);
        history.len() <= self.max as usize
    }
}

/// The supervision tree for one gateway process.
pub struct Supervisor<E: Environment> {
    env: E,
    config: SupervisorConfig,
    metrics: Arc<GatewayMetrics>,
    health: HealthRegistry,
    handle: ShutdownHandle,
    shutdown: Shutdown,
    children: Vec<ChildSpec>,
}

impl<E: Environment> Supervisor<E> {
    /// Create an empty supervisor sharing the process shutdown handle.
    #[must_use]
    pub fn new(
        env: E,
        config: SupervisorConfig,
        metrics: Arc<GatewayMetrics>,
        handle: ShutdownHandle,
    ) -> Self {
        let shutdown = handle.subscribe();
        Self {
            env,
            config,
            metrics,
            health: HealthRegistry::default(),
            handle,
            shutdown,
            children: Vec::new(),
        }
    }

    /// The health registry shared with the watchdog and control surface.
    #[must_use]
    pub fn health(&self) -> HealthRegistry {
        self.health.clone()
    }

    /// A shutdown receiver for a child being assembled.
    #[must_use]
    pub fn shutdown_receiver(&self) -> Shutdown {
        self.handle.subscribe()
    }

    /// Register a child; children start in registration order.
    pub fn add_child(&mut self, spec: ChildSpec) {
        self.health.register(spec.name, spec.critical);
        self.children.push(spec);
    }

    /// Run the tree until shutdown or restart-intensity exhaustion.
    pub async fn run(mut self) -> ExitReason {
        let budget = Arc::new(RestartBudget::new(&self.config));
        let (exhausted_tx, mut exhausted_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(self.children.len());
        for spec in self.children.drain(..) {
            joins.push(tokio::spawn(supervise(
                spec,
                self.env.clone(),
                self.config,
                Arc::clone(&self.metrics),
                self.health.clone(),
                Arc::clone(&budget),
                exhausted_tx.clone(),
                self.handle.subscribe(),
            )));
        }
        drop(exhausted_tx);

        let reason = tokio::select! {
            () = self.shutdown.recv() => ExitReason::Graceful,
            changed = exhausted_rx.changed() => {
                if changed.is_ok() {
                    tracing::error!("restart intensity exhausted, forcing shutdown");
                    self.handle.signal();
                    ExitReason::IntensityExhausted
                } else {
                    // Every supervise loop ended without exhausting the
                    // budget: all children stopped on their own.
                    ExitReason::Graceful
                }
            },
        };

        for join in joins {
            let _ = join.await;
        }
        reason
    }
}

#[allow(clippy::too_many_arguments)]
async fn supervise<E: Environment>(
    mut spec: ChildSpec,
    env: E,
    config: SupervisorConfig,
    metrics: Arc<GatewayMetrics>,
    health: HealthRegistry,
    budget: Arc<RestartBudget<E::Instant>>,
    exhausted_tx: watch::Sender<bool>,
    shutdown: Shutdown,
) {
    loop {
        health.set(spec.name, ChildState::Up);
        let run = tokio::spawn((spec.start)());

        match run.await {
            Ok(Ok(())) => {
                tracing::debug!(child = spec.name, "component stopped");
                health.set(spec.name, ChildState::Stopped);
                return;
            },
            Ok(Err(error)) => {
                tracing::warn!(child = spec.name, %error, "component failed");
            },
            Err(join_error) => {
                if join_error.is_panic() {
                    metrics.handler_panics.incr();
                    tracing::error!(child = spec.name, "component panicked");
                } else {
                    // Cancelled: runtime is tearing down.
                    health.set(spec.name, ChildState::Stopped);
                    return;
                }
            },
        }

        if shutdown.is_signalled() {
            health.set(spec.name, ChildState::Stopped);
            return;
        }

        if !budget.record(env.now()) {
            health.set(spec.name, ChildState::Stopped);
            let _ = exhausted_tx.send(true);
            return;
        }

        metrics.child_restarts.incr();
        health.set(spec.name, ChildState::Restarting);
        tracing::info!(child = spec.name, "restarting component");
        env.sleep(config.restart_backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use weir_core::env::ManualEnv;

    use super::*;
    use crate::signals::shutdown_pair;

    fn test_config(max_restarts: u32) -> SupervisorConfig {
        SupervisorConfig {
            max_restarts,
            restart_window: Duration::from_secs(10),
            restart_backoff: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn graceful_shutdown_stops_children() {
        let (handle, _shutdown) = shutdown_pair();
        let metrics = GatewayMetrics::shared();
        let mut supervisor =
            Supervisor::new(ManualEnv::new(1), test_config(50), Arc::clone(&metrics), handle.clone());

        let child_shutdown = handle.subscribe();
        supervisor.add_child(ChildSpec {
            name: "sleeper",
            critical: true,
            start: Box::new(move || {
                let mut shutdown = child_shutdown.clone();
                Box::pin(async move {
                    shutdown.recv().await;
                    Ok(())
                })
            }),
        });

        let run = tokio::spawn(supervisor.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.signal();

        assert_eq!(run.await.unwrap(), ExitReason::Graceful);
        assert_eq!(metrics.snapshot().child_restarts, 0);
    }

    #[tokio::test]
    async fn failing_child_is_restarted_until_budget_exhausts() {
        let (handle, _shutdown) = shutdown_pair();
        let metrics = GatewayMetrics::shared();
        let mut supervisor =
            Supervisor::new(ManualEnv::new(1), test_config(3), Arc::clone(&metrics), handle.clone());

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        supervisor.add_child(ChildSpec {
            name: "crasher",
            critical: true,
            start: Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Err::<(), ChildError>("boom".into()) })
            }),
        });

        assert_eq!(supervisor.run().await, ExitReason::IntensityExhausted);

        // Initial start + 3 budgeted restarts, then the 4th failure trips.
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(metrics.snapshot().child_restarts, 3);
    }

    #[tokio::test]
    async fn panicking_child_is_counted_and_restarted() {
        let (handle, _shutdown) = shutdown_pair();
        let metrics = GatewayMetrics::shared();
        let mut supervisor =
            Supervisor::new(ManualEnv::new(1), test_config(2), Arc::clone(&metrics), handle.clone());

        supervisor.add_child(ChildSpec {
            name: "panicker",
            critical: false,
            start: Box::new(|| Box::pin(async { panic!("unhandled") })),
        });

        assert_eq!(supervisor.run().await, ExitReason::IntensityExhausted);
        assert_eq!(metrics.snapshot().handler_panics, 3);
    }

    #[tokio::test]
    async fn sibling_survives_a_crashing_child() {
        let (handle, _shutdown) = shutdown_pair();
        let metrics = GatewayMetrics::shared();
        let mut supervisor =
            Supervisor::new(ManualEnv::new(1), test_config(2), Arc::clone(&metrics), handle.clone());

        let sibling_starts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&sibling_starts);
        let sibling_shutdown = handle.subscribe();
        supervisor.add_child(ChildSpec {
            name: "steady",
            critical: true,
            start: Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut shutdown = sibling_shutdown.clone();
                Box::pin(async move {
                    shutdown.recv().await;
                    Ok(())
                })
            }),
        });
        supervisor.add_child(ChildSpec {
            name: "crasher",
            critical: false,
            start: Box::new(|| Box::pin(async { Err::<(), ChildError>("boom".into()) })),
        });

        assert_eq!(supervisor.run().await, ExitReason::IntensityExhausted);

        // The steady sibling was started exactly once; restarts were isolated
        // to the crasher.
        assert_eq!(sibling_starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn health_registry_reflects_stopped_children() {
        let (handle, _shutdown) = shutdown_pair();
        let metrics = GatewayMetrics::shared();
        let mut supervisor =
            Supervisor::new(ManualEnv::new(1), test_config(50), metrics, handle.clone());
        let health = supervisor.health();

        supervisor.add_child(ChildSpec {
            name: "oneshot",
            critical: true,
            start: Box::new(|| Box::pin(async { Ok(()) })),
        });

        assert!(health.all_critical_up());

        let run = tokio::spawn(supervisor.run());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(health.first_down_critical(), Some("oneshot"));
        handle.signal();
        run.await.unwrap();
    }
}
