//! Ingress (S1) runtime assembly.
//!
//! Binds the listen sockets, builds the encapsulator pipeline, and registers
//! everything with the supervisor. Sockets are bound eagerly so a bad bind
//! fails startup with a precise error and so tests can read the ephemeral
//! ports; restarted children reattach to the same sockets and the same
//! command channel.

pub mod encap;
pub mod tcp;
pub mod udp;

use std::{net::SocketAddr, sync::Arc};

use tokio::{
    net::{TcpListener, UdpSocket},
    sync::mpsc,
};
use weir_core::{classify::Classifier, env::Environment, metrics::GatewayMetrics};

use self::encap::{Command, Encapsulator, UdpFrameSender};
use crate::{
    config::{Config, ConfigError},
    supervisor::{ChildSpec, Supervisor},
};

/// Depth of the submission channel into the encapsulator. This is the
/// ingress backpressure point: handlers await here when the pipeline lags.
const COMMAND_CHANNEL_DEPTH: usize = 1024;

/// Errors that prevent the ingress side from assembling.
#[derive(thiserror::Error, Debug)]
pub enum IngressError {
    /// Configuration did not validate for this side.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: SocketAddr,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Handles to a started ingress side.
pub struct Ingress {
    /// Bound TCP listen address (useful when the port was ephemeral).
    pub tcp_addr: SocketAddr,
    /// Bound UDP listen address, when UDP ingress is enabled.
    pub udp_addr: Option<SocketAddr>,
    /// Command channel shared with the control surface.
    pub commands: mpsc::Sender<Command>,
}

/// Bind sockets and register the ingress children with the supervisor.
pub async fn start<E: Environment>(
    config: &Config,
    env: E,
    metrics: Arc<GatewayMetrics>,
    supervisor: &mut Supervisor<E>,
) -> Result<Ingress, IngressError> {
    let peer = config.validate_ingress()?;

    let tcp_bind = config.s1_tcp_bind();
    let listener = Arc::new(
        TcpListener::bind(tcp_bind)
            .await
            .map_err(|source| IngressError::Bind { addr: tcp_bind, source })?,
    );
    let tcp_addr = listener
        .local_addr()
        .map_err(|source| IngressError::Bind { addr: tcp_bind, source })?;

    let mut udp_socket = None;
    let mut udp_addr = None;
    if let Some(udp_bind) = config.s1_udp_bind() {
        let socket = UdpSocket::bind(udp_bind)
            .await
            .map_err(|source| IngressError::Bind { addr: udp_bind, source })?;
        udp_addr = Some(
            socket
                .local_addr()
                .map_err(|source| IngressError::Bind { addr: udp_bind, source })?,
        );
        udp_socket = Some(Arc::new(socket));
    }

    let (commands, command_rx) = mpsc::channel(COMMAND_CHANNEL_DEPTH);
    let command_rx = Arc::new(tokio::sync::Mutex::new(command_rx));

    // Encapsulator child. Its state (and outbound socket) is rebuilt fresh
    // on restart; the command channel survives so handlers keep working.
    {
        let env = env.clone();
        let metrics = Arc::clone(&metrics);
        let config = config.clone();
        let shutdown = supervisor.shutdown_receiver();
        supervisor.add_child(ChildSpec {
            name: "encapsulator",
            critical: true,
            start: Box::new(move || {
                let env = env.clone();
                let metrics = Arc::clone(&metrics);
                let config = config.clone();
                let command_rx = Arc::clone(&command_rx);
                let shutdown = shutdown.clone();
                Box::pin(async move {
                    let sender = UdpFrameSender::bind(config.s1_bind_ip, peer).await?;
                    let encapsulator = Encapsulator::new(
                        env.clone(),
                        sender,
                        Classifier::new(config.allowed_protocols.clone()),
                        config.rate_limiter(),
                        config.shaper(),
                        config.breaker(),
                        metrics,
                        config.max_payload_bytes as usize,
                        config.s1_bind_ip.unwrap_or(std::net::Ipv4Addr::UNSPECIFIED),
                    );
                    encap::run(encapsulator, env, command_rx, config.heartbeat_interval(), shutdown)
                        .await
                })
            }),
        });
    }

    // TCP listener child.
    {
        let env = env.clone();
        let metrics = Arc::clone(&metrics);
        let commands = commands.clone();
        let throttle = config.accept_throttle();
        let max_payload = config.max_payload_bytes as usize;
        let shutdown = supervisor.shutdown_receiver();
        supervisor.add_child(ChildSpec {
            name: "s1-tcp-listener",
            critical: true,
            start: Box::new(move || {
                Box::pin(tcp::run(
                    Arc::clone(&listener),
                    env.clone(),
                    Arc::clone(&metrics),
                    throttle,
                    max_payload,
                    commands.clone(),
                    shutdown.clone(),
                ))
            }),
        });
    }

    // Optional UDP listener child.
    if let Some(socket) = udp_socket {
        let metrics = Arc::clone(&metrics);
        let commands = commands.clone();
        let max_payload = config.max_payload_bytes as usize;
        let shutdown = supervisor.shutdown_receiver();
        supervisor.add_child(ChildSpec {
            name: "s1-udp-listener",
            critical: false,
            start: Box::new(move || {
                Box::pin(udp::run(
                    Arc::clone(&socket),
                    Arc::clone(&metrics),
                    max_payload,
                    commands.clone(),
                    shutdown.clone(),
                ))
            }),
        });
    }

    tracing::info!(%tcp_addr, ?udp_addr, %peer, "ingress assembled");

    Ok(Ingress { tcp_addr, udp_addr, commands })
}
