//! S2 UDP listener with a bounded worker pool.
//!
//! The listener owns the receive loop and nothing else: each datagram's
//! bytes are copied out of the receive buffer and handed to a blocking-pool
//! worker holding one semaphore permit. When no permit is free the datagram
//! is dropped and counted; the listener never waits on a worker, so a slow
//! disk shows up as `s2_backpressure_dropped`, not as an unbounded socket
//! buffer.

use std::sync::Arc;

use bytes::Bytes;
use tokio::{net::UdpSocket, sync::Semaphore};
use weir_core::{admission::DropReason, env::Environment, metrics::GatewayMetrics};

use super::{decap::Decapsulator, spool::Spool};
use crate::{signals::Shutdown, supervisor::ChildError};

/// Largest UDP datagram the socket can deliver.
const RECV_BUFFER: usize = 65_536;

/// Receive errors tolerated back-to-back before the listener gives up.
const MAX_CONSECUTIVE_RECV_ERRORS: u32 = 8;

/// Receive loop.
pub(crate) async fn run<E: Environment, S: Spool>(
    socket: Arc<UdpSocket>,
    decap: Arc<Decapsulator<E, S>>,
    pool: Arc<Semaphore>,
    metrics: Arc<GatewayMetrics>,
    mut shutdown: Shutdown,
) -> Result<(), ChildError> {
    let fatal = decap.fatal_signal();
    let mut buf = vec![0u8; RECV_BUFFER];
    let mut consecutive_errors = 0u32;

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, _from)) => {
                    consecutive_errors = 0;

                    match Arc::clone(&pool).try_acquire_owned() {
                        Ok(permit) => {
                            let datagram = Bytes::copy_from_slice(&buf[..n]);
                            let decap = Arc::clone(&decap);
                            tokio::task::spawn_blocking(move || {
                                let _permit = permit;
                                let _ = decap.process(&datagram);
                            });
                        },
                        Err(_) => {
                            let count = metrics.record_drop(DropReason::BackpressureDropped);
                            if count % 100 == 1 {
                                tracing::debug!(len = n, "worker pool saturated, datagram dropped");
                            }
                        },
                    }

                    // The notify can fire between selects; the flag cannot
                    // be missed.
                    if decap.is_failing() {
                        return Err("spool failing persistently".into());
                    }
                },
                Err(error) => {
                    consecutive_errors += 1;
                    tracing::warn!(%error, consecutive_errors, "recv failed");
                    if consecutive_errors >= MAX_CONSECUTIVE_RECV_ERRORS {
                        return Err(format!("egress socket failing: {error}").into());
                    }
                },
            },
            () = fatal.notified() => {
                return Err("spool failing persistently".into());
            },
            () = shutdown.recv() => return Ok(()),
        }
    }
}
