//! S1 UDP listener.
//!
//! Datagram ingress is optional and stateless: each datagram becomes one
//! submission carrying the sender as source. Oversized datagrams are dropped
//! here, before the admission pipeline spends any work on them.

use std::sync::Arc;

use tokio::{net::UdpSocket, sync::mpsc};
use weir_core::metrics::GatewayMetrics;

use super::{
    encap::{Command, Submission},
    tcp::ipv4_of,
};
use crate::{signals::Shutdown, supervisor::ChildError};

/// Largest UDP datagram the socket can deliver.
const RECV_BUFFER: usize = 65_536;

/// Receive loop.
pub(crate) async fn run(
    socket: Arc<UdpSocket>,
    metrics: Arc<GatewayMetrics>,
    max_payload: usize,
    commands: mpsc::Sender<Command>,
    mut shutdown: Shutdown,
) -> Result<(), ChildError> {
    let mut buf = vec![0u8; RECV_BUFFER];

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, from)) => {
                    let Some(src_ip) = ipv4_of(from) else {
                        metrics.non_ipv4_rejected.incr();
                        continue;
                    };

                    if n > max_payload {
                        let count = metrics.payload_too_large.incr();
                        if count % 100 == 1 {
                            tracing::debug!(%from, len = n, "oversized datagram dropped");
                        }
                        continue;
                    }

                    let submission = Submission {
                        src_ip,
                        src_port: from.port(),
                        payload: bytes::Bytes::copy_from_slice(&buf[..n]),
                    };
                    if commands.send(Command::Submit(submission)).await.is_err() {
                        return Ok(());
                    }
                },
                Err(error) => {
                    return Err(format!("udp ingress socket failing: {error}").into());
                },
            },
            () = shutdown.recv() => return Ok(()),
        }
    }
}
