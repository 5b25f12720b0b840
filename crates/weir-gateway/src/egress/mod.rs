//! Egress (S2) runtime assembly.
//!
//! Binds the receive socket, builds the decapsulator over its directory
//! spool, and registers the listener and link monitor with the supervisor.
//! After the supervisor stops, [`Egress::drain_and_flush`] completes the
//! ordered shutdown: wait out in-flight workers under a deadline, then sync
//! the spool.

pub mod decap;
pub mod listener;
pub mod monitor;
pub mod spool;

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, atomic::AtomicBool, atomic::Ordering},
    time::Duration,
};

use tokio::{net::UdpSocket, sync::Semaphore};
use weir_core::{env::Environment, metrics::GatewayMetrics, monitor::LinkMonitor};

use self::{decap::Decapsulator, spool::DirSpool};
use crate::{
    config::{Config, ConfigError},
    supervisor::{ChildSpec, Supervisor},
};

/// Errors that prevent the egress side from assembling.
#[derive(thiserror::Error, Debug)]
pub enum EgressError {
    /// Configuration did not validate for this side.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The receive socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: SocketAddr,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Handles to a started egress side.
pub struct Egress<E: Environment> {
    /// Bound receive address (useful when the port was ephemeral).
    pub udp_addr: SocketAddr,
    /// The decapsulator, shared with the in-flight workers.
    pub decap: Arc<Decapsulator<E, DirSpool<E>>>,
    /// True while the link is declared dead.
    pub link_dead: Arc<AtomicBool>,
    pool: Arc<Semaphore>,
    pool_size: u32,
}

/// Bind the socket and register the egress children with the supervisor.
pub async fn start<E: Environment>(
    config: &Config,
    env: E,
    metrics: Arc<GatewayMetrics>,
    supervisor: &mut Supervisor<E>,
) -> Result<Egress<E>, EgressError> {
    let data_dir = config.validate_egress()?;

    let bind = config.s2_bind();
    let socket = Arc::new(
        UdpSocket::bind(bind).await.map_err(|source| EgressError::Bind { addr: bind, source })?,
    );
    let udp_addr =
        socket.local_addr().map_err(|source| EgressError::Bind { addr: bind, source })?;

    let link_monitor =
        Arc::new(Mutex::new(LinkMonitor::new(config.link_monitor(), env.now())));
    let link_dead = Arc::new(AtomicBool::new(false));
    let decap = Arc::new(Decapsulator::new(
        env.clone(),
        DirSpool::new(data_dir, env.clone()),
        Arc::clone(&metrics),
        Arc::clone(&link_monitor),
        Arc::clone(&link_dead),
    ));
    let pool = Arc::new(Semaphore::new(config.worker_pool_size as usize));

    // Listener child.
    {
        let socket = Arc::clone(&socket);
        let decap = Arc::clone(&decap);
        let pool = Arc::clone(&pool);
        let metrics = Arc::clone(&metrics);
        let shutdown = supervisor.shutdown_receiver();
        supervisor.add_child(ChildSpec {
            name: "s2-listener",
            critical: true,
            start: Box::new(move || {
                Box::pin(listener::run(
                    Arc::clone(&socket),
                    Arc::clone(&decap),
                    Arc::clone(&pool),
                    Arc::clone(&metrics),
                    shutdown.clone(),
                ))
            }),
        });
    }

    // Link monitor child.
    {
        let env = env.clone();
        let monitor = Arc::clone(&link_monitor);
        let link_dead = Arc::clone(&link_dead);
        let metrics = Arc::clone(&metrics);
        let check_interval = config.heartbeat_check_interval();
        let shutdown = supervisor.shutdown_receiver();
        supervisor.add_child(ChildSpec {
            name: "heartbeat-monitor",
            critical: false,
            start: Box::new(move || {
                Box::pin(monitor::run(
                    env.clone(),
                    Arc::clone(&monitor),
                    Arc::clone(&link_dead),
                    Arc::clone(&metrics),
                    check_interval,
                    shutdown.clone(),
                ))
            }),
        });
    }

    tracing::info!(%udp_addr, "egress assembled");

    Ok(Egress { udp_addr, decap, link_dead, pool, pool_size: config.worker_pool_size })
}

impl<E: Environment> Egress<E> {
    /// Complete the ordered shutdown after the listener has stopped.
    ///
    /// Waits for every in-flight worker (all pool permits) under `deadline`,
    /// then syncs the spool under the same deadline. Both steps are best
    /// effort: exceeding the deadline is logged and shutdown proceeds.
    pub async fn drain_and_flush(&self, deadline: Duration) {
        match tokio::time::timeout(deadline, self.pool.acquire_many(self.pool_size)).await {
            Ok(Ok(_permits)) => tracing::debug!("worker pool drained"),
            Ok(Err(_closed)) => {},
            Err(_elapsed) => {
                tracing::warn!(?deadline, "worker pool drain deadline exceeded");
            },
        }

        let decap = Arc::clone(&self.decap);
        let flushed =
            tokio::time::timeout(deadline, tokio::task::spawn_blocking(move || decap.flush()))
                .await;
        match flushed {
            Ok(Ok(Ok(()))) => tracing::debug!("spool flushed"),
            Ok(Ok(Err(error))) => tracing::warn!(%error, "spool flush failed"),
            Ok(Err(join_error)) => tracing::warn!(%join_error, "spool flush task failed"),
            Err(_elapsed) => tracing::warn!(?deadline, "spool flush deadline exceeded"),
        }
    }

    /// True once the link has been declared dead (for the status surface).
    #[must_use]
    pub fn link_is_dead(&self) -> bool {
        self.link_dead.load(Ordering::SeqCst)
    }
}
