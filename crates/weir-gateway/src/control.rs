//! Control surface for external collaborators.
//!
//! The CLI status commands and the HTTP health API are external components;
//! this handle is the whole of their contract with the gateway. It can read
//! (counters, component health, link state) and perform exactly one data
//! plane mutation: forgetting a rate-limited source.

use std::{
    net::Ipv4Addr,
    sync::{Arc, atomic::AtomicBool, atomic::Ordering},
};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use weir_core::metrics::{GatewayMetrics, MetricsSnapshot};

use crate::{
    ingress::encap::Command,
    supervisor::{ChildState, HealthRegistry},
};

/// State of one supervised component, for the status surface.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ComponentStatus {
    /// Component name.
    pub name: &'static str,
    /// Current liveness.
    pub state: &'static str,
}

/// Point-in-time gateway status.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Counter snapshot.
    pub metrics: MetricsSnapshot,
    /// Per-component liveness.
    pub components: Vec<ComponentStatus>,
    /// Link liveness; absent on the ingress side (which cannot know).
    pub link_dead: Option<bool>,
}

/// Cloneable handle given to the out-of-scope control collaborators.
#[derive(Clone)]
pub struct ControlHandle {
    metrics: Arc<GatewayMetrics>,
    health: HealthRegistry,
    commands: Option<mpsc::Sender<Command>>,
    link_dead: Option<Arc<AtomicBool>>,
}

impl ControlHandle {
    /// Build a handle with read access only.
    #[must_use]
    pub fn new(metrics: Arc<GatewayMetrics>, health: HealthRegistry) -> Self {
        Self { metrics, health, commands: None, link_dead: None }
    }

    /// Attach the encapsulator command channel (ingress side).
    #[must_use]
    pub fn with_commands(mut self, commands: mpsc::Sender<Command>) -> Self {
        self.commands = Some(commands);
        self
    }

    /// Attach the link-dead flag (egress side).
    #[must_use]
    pub fn with_link_flag(mut self, link_dead: Arc<AtomicBool>) -> Self {
        self.link_dead = Some(link_dead);
        self
    }

    /// Comprehensive status for operators.
    #[must_use]
    pub fn status(&self) -> StatusReport {
        let components = self
            .health
            .snapshot()
            .into_iter()
            .map(|(name, state)| ComponentStatus {
                name,
                state: match state {
                    ChildState::Up => "up",
                    ChildState::Restarting => "restarting",
                    ChildState::Stopped => "stopped",
                },
            })
            .collect();

        StatusReport {
            metrics: self.metrics.snapshot(),
            components,
            link_dead: self.link_dead.as_ref().map(|flag| flag.load(Ordering::SeqCst)),
        }
    }

    /// Liveness of every critical component.
    #[must_use]
    pub fn health_check(&self) -> bool {
        self.health.all_critical_up()
    }

    /// Forget one source in the rate limiter (operator recovery).
    ///
    /// Returns true when an entry existed. False when it did not, or when
    /// this handle has no ingress attached.
    pub async fn reset_source(&self, ip: Ipv4Addr) -> bool {
        let Some(commands) = &self.commands else {
            return false;
        };

        let (reply, response) = oneshot::channel();
        if commands.send(Command::ResetSource { ip, reply }).await.is_err() {
            return false;
        }
        response.await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reports_counters_and_components() {
        let metrics = GatewayMetrics::shared();
        metrics.packets_forwarded.incr();

        let health = HealthRegistry::default();
        health.register("encapsulator", true);

        let handle = ControlHandle::new(Arc::clone(&metrics), health);
        let report = handle.status();

        assert_eq!(report.metrics.packets_forwarded, 1);
        assert_eq!(
            report.components,
            vec![ComponentStatus { name: "encapsulator", state: "up" }]
        );
        assert_eq!(report.link_dead, None);
        assert!(handle.health_check());
    }

    #[test]
    fn link_flag_is_surfaced_when_attached() {
        let flag = Arc::new(AtomicBool::new(true));
        let handle = ControlHandle::new(GatewayMetrics::shared(), HealthRegistry::default())
            .with_link_flag(Arc::clone(&flag));

        assert_eq!(handle.status().link_dead, Some(true));
        flag.store(false, Ordering::SeqCst);
        assert_eq!(handle.status().link_dead, Some(false));
    }

    #[tokio::test]
    async fn reset_without_ingress_is_a_no_op() {
        let handle = ControlHandle::new(GatewayMetrics::shared(), HealthRegistry::default());
        assert!(!handle.reset_source(Ipv4Addr::LOCALHOST).await);
    }
}
