//! S1 TCP listener and per-connection handlers.
//!
//! The listener accepts, throttles, and spawns; each handler exclusively
//! owns its accepted socket and one read buffer, reads whatever chunks the
//! OS delivers, and offers them to the encapsulator in arrival order.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

use tokio::{io::AsyncReadExt, net::TcpListener, net::TcpStream, sync::mpsc};
use weir_core::{
    env::Environment,
    metrics::GatewayMetrics,
    shaper::{ShaperConfig, TokenBucket},
};

use super::encap::{Command, Submission};
use crate::{signals::Shutdown, supervisor::ChildError};

/// Accept errors tolerated back-to-back before the listener is considered
/// broken and handed to the supervisor.
const MAX_CONSECUTIVE_ACCEPT_ERRORS: u32 = 8;

/// Extract an IPv4 peer address; IPv4-mapped IPv6 is unmapped.
pub(crate) fn ipv4_of(addr: SocketAddr) -> Option<Ipv4Addr> {
    match addr.ip() {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(ip) => ip.to_ipv4_mapped(),
    }
}

/// Accept loop.
///
/// The listener socket is shared so a restart reuses the bound port; if the
/// socket itself is broken, repeated restarts exhaust the intensity budget
/// and take the process down, which is the correct end state.
pub(crate) async fn run<E: Environment>(
    listener: Arc<TcpListener>,
    env: E,
    metrics: Arc<GatewayMetrics>,
    throttle: ShaperConfig,
    max_payload: usize,
    commands: mpsc::Sender<Command>,
    mut shutdown: Shutdown,
) -> Result<(), ChildError> {
    let mut accept_bucket = TokenBucket::new(throttle, env.now());
    let mut consecutive_errors = 0u32;

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    consecutive_errors = 0;

                    let Some(peer_ip) = ipv4_of(peer) else {
                        metrics.non_ipv4_rejected.incr();
                        tracing::debug!(%peer, "dropped non-IPv4 connection");
                        continue;
                    };

                    if !accept_bucket.try_acquire(env.now()) {
                        metrics.connections_throttled.incr();
                        tracing::debug!(%peer, "connection throttled");
                        continue;
                    }

                    metrics.connections_accepted.incr();
                    tokio::spawn(handle_connection(
                        stream,
                        peer_ip,
                        peer.port(),
                        max_payload,
                        Arc::clone(&metrics),
                        commands.clone(),
                        shutdown.clone(),
                    ));
                },
                Err(error) => {
                    consecutive_errors += 1;
                    tracing::warn!(%error, consecutive_errors, "accept failed");
                    if consecutive_errors >= MAX_CONSECUTIVE_ACCEPT_ERRORS {
                        return Err(format!("listen socket failing: {error}").into());
                    }
                    env.sleep(std::time::Duration::from_millis(100)).await;
                },
            },
            () = shutdown.recv() => return Ok(()),
        }
    }
}

/// One connection: read chunks, forward each with the peer as source.
async fn handle_connection(
    mut stream: TcpStream,
    peer_ip: Ipv4Addr,
    peer_port: u16,
    max_payload: usize,
    metrics: Arc<GatewayMetrics>,
    commands: mpsc::Sender<Command>,
    mut shutdown: Shutdown,
) {
    // One byte above the limit so an oversized chunk is observable instead
    // of silently clamped to the buffer.
    let mut buf = vec![0u8; max_payload + 1];

    loop {
        tokio::select! {
            read = stream.read(&mut buf) => match read {
                Ok(0) => {
                    tracing::debug!(%peer_ip, peer_port, "peer closed");
                    return;
                },
                Ok(n) if n > max_payload => {
                    // Connection stays open; only the chunk is dropped.
                    let count = metrics.payload_too_large.incr();
                    if count % 100 == 1 {
                        tracing::debug!(%peer_ip, peer_port, len = n, "oversized chunk dropped");
                    }
                },
                Ok(n) => {
                    let submission = Submission {
                        src_ip: peer_ip,
                        src_port: peer_port,
                        payload: bytes::Bytes::copy_from_slice(&buf[..n]),
                    };
                    if commands.send(Command::Submit(submission)).await.is_err() {
                        // Encapsulator is gone; nothing left to forward to.
                        return;
                    }
                },
                Err(error) => {
                    tracing::debug!(%peer_ip, peer_port, %error, "read failed");
                    return;
                },
            },
            () = shutdown.recv() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv6Addr, SocketAddrV6};

    use super::*;

    #[test]
    fn mapped_ipv6_is_unmapped() {
        let mapped = Ipv4Addr::new(10, 1, 2, 3).to_ipv6_mapped();
        let addr = SocketAddr::V6(SocketAddrV6::new(mapped, 5000, 0, 0));
        assert_eq!(ipv4_of(addr), Some(Ipv4Addr::new(10, 1, 2, 3)));
    }

    #[test]
    fn bare_ipv6_is_rejected() {
        let addr = SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::LOCALHOST, 5000, 0, 0));
        assert_eq!(ipv4_of(addr), None);
    }
}
