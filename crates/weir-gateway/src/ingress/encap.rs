//! The encapsulator: single serialization point of the ingress side.
//!
//! Handlers submit chunks through a bounded channel; one task owns the
//! outbound UDP socket and every piece of admission state (classifier, rate
//! table, token bucket, breaker). Per-connection ordering follows from the
//! channel; no lock is shared with any other task.
//!
//! Admission order per payload: classify → per-source rate limit → token
//! bucket → encode → breaker-wrapped send. A token consumed by the shaper is
//! not refunded when the breaker then rejects the call; the shaper meters
//! attempts on the wire path, not deliveries.
//!
//! Heartbeats bypass classification and rate limiting but pass through the
//! token bucket and the breaker-wrapped send, so the beacon never exceeds
//! the configured global packet rate.

use std::{net::Ipv4Addr, sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::{
    net::UdpSocket,
    sync::{mpsc, oneshot},
};
use weir_core::{
    admission::{DropReason, Verdict},
    breaker::{BreakerConfig, CallDecision, CircuitBreaker},
    classify::Classifier,
    env::Environment,
    metrics::GatewayMetrics,
    ratelimit::{RateDecision, RateLimiterConfig, SourceLimiter},
    shaper::{ShaperConfig, TokenBucket},
};

use crate::{signals::Shutdown, supervisor::ChildError};

/// Rate-table sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// One chunk offered to the admission pipeline.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Source address of the originating client
    pub src_ip: Ipv4Addr,
    /// Source port of the originating client
    pub src_port: u16,
    /// Chunk bytes exactly as read from the socket
    pub payload: Bytes,
}

/// Commands accepted by the encapsulator task.
#[derive(Debug)]
pub enum Command {
    /// Offer a payload to the admission pipeline.
    Submit(Submission),
    /// Clear one source from the rate table (operator recovery).
    ResetSource {
        /// Source to forget
        ip: Ipv4Addr,
        /// True if an entry existed
        reply: oneshot::Sender<bool>,
    },
}

/// The guarded downstream operation: one frame onto the wire.
///
/// The production implementation is the outbound UDP socket; tests inject
/// recording and failing senders to drive the breaker deterministically.
pub trait FrameSender: Send + 'static {
    /// Send one encoded frame.
    fn send_frame(&mut self, frame: &[u8]) -> impl Future<Output = std::io::Result<()>> + Send;
}

/// Production sender: `send_to` on the exclusively owned UDP socket.
pub struct UdpFrameSender {
    socket: UdpSocket,
    peer: std::net::SocketAddr,
}

impl UdpFrameSender {
    /// Bind an ephemeral local socket aimed at the egress peer.
    pub async fn bind(
        local_ip: Option<Ipv4Addr>,
        peer: std::net::SocketAddr,
    ) -> std::io::Result<Self> {
        let local = std::net::SocketAddr::from((local_ip.unwrap_or(Ipv4Addr::UNSPECIFIED), 0));
        let socket = UdpSocket::bind(local).await?;
        Ok(Self { socket, peer })
    }
}

impl FrameSender for UdpFrameSender {
    async fn send_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        self.socket.send_to(frame, self.peer).await.map(|_| ())
    }
}

/// Encapsulator state machine plus its owned sender.
pub struct Encapsulator<E: Environment, S: FrameSender> {
    env: E,
    sender: S,
    classifier: Classifier,
    limiter: SourceLimiter<E::Instant>,
    bucket: TokenBucket<E::Instant>,
    breaker: CircuitBreaker<E::Instant>,
    metrics: Arc<GatewayMetrics>,
    max_payload: usize,
    beacon_ip: Ipv4Addr,
}

impl<E: Environment, S: FrameSender> Encapsulator<E, S> {
    /// Assemble the pipeline.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        env: E,
        sender: S,
        classifier: Classifier,
        limiter_config: RateLimiterConfig,
        shaper_config: ShaperConfig,
        breaker_config: BreakerConfig,
        metrics: Arc<GatewayMetrics>,
        max_payload: usize,
        beacon_ip: Ipv4Addr,
    ) -> Self {
        let now = env.now();
        Self {
            sender,
            classifier,
            limiter: SourceLimiter::new(limiter_config),
            bucket: TokenBucket::new(shaper_config, now),
            breaker: CircuitBreaker::new(breaker_config),
            metrics,
            max_payload,
            beacon_ip,
            env,
        }
    }

    /// Run one payload through the full admission pipeline.
    pub async fn submit(&mut self, submission: &Submission) -> Verdict {
        let payload = &submission.payload;

        if payload.len() > self.max_payload {
            return self.deny(DropReason::PayloadTooLarge, submission);
        }
        if !self.classifier.admits(payload) {
            return self.deny(DropReason::ProtocolRejected, submission);
        }
        if let RateDecision::Deny { .. } = self.limiter.check(submission.src_ip, self.env.now()) {
            return self.deny(DropReason::RateLimited, submission);
        }
        if !self.bucket.try_acquire(self.env.now()) {
            return self.deny(DropReason::Shaped, submission);
        }

        let frame = match weir_proto::encode(submission.src_ip, submission.src_port, payload) {
            Ok(frame) => frame,
            // Unreachable in practice: max_payload is validated against the
            // frame limit at startup. Counted rather than unwound.
            Err(_) => return self.deny(DropReason::PayloadTooLarge, submission),
        };

        match self.guarded_send(&frame).await {
            Ok(()) => {
                self.metrics.packets_forwarded.incr();
                self.metrics.bytes_forwarded.add(payload.len() as u64);
                Verdict::Admitted
            },
            Err(reason) => self.deny(reason, submission),
        }
    }

    /// Emit the liveness beacon.
    ///
    /// Skipped (and counted as shaped) when the bucket is empty: liveness
    /// must not punch through the global packet budget.
    pub async fn emit_heartbeat(&mut self) {
        if !self.bucket.try_acquire(self.env.now()) {
            self.metrics.record_drop(DropReason::Shaped);
            tracing::debug!("heartbeat shaped away");
            return;
        }

        let frame = weir_proto::heartbeat_frame(self.beacon_ip);
        match self.guarded_send(&frame).await {
            Ok(()) => {
                self.metrics.heartbeats_sent.incr();
            },
            Err(reason) => {
                self.metrics.record_drop(reason);
            },
        }
    }

    /// Clear one source from the rate table.
    pub fn reset_source(&mut self, ip: Ipv4Addr) -> bool {
        self.limiter.reset(ip)
    }

    /// Periodic rate-table maintenance.
    pub fn sweep(&mut self) {
        let removed = self.limiter.sweep(self.env.now());
        if removed > 0 {
            tracing::debug!(removed, "swept idle rate-limiter entries");
        }
    }

    async fn guarded_send(&mut self, frame: &[u8]) -> Result<(), DropReason> {
        match self.breaker.on_call(self.env.now()) {
            CallDecision::Rejected => Err(DropReason::CircuitOpen),
            CallDecision::Permitted => match self.sender.send_frame(frame).await {
                Ok(()) => {
                    self.breaker.on_success();
                    Ok(())
                },
                Err(error) => {
                    self.breaker.on_failure(self.env.now());
                    tracing::warn!(%error, "frame send failed");
                    Err(DropReason::SendFailed)
                },
            },
        }
    }

    fn deny(&self, reason: DropReason, submission: &Submission) -> Verdict {
        let count = self.metrics.record_drop(reason);
        // 1:100 sampling keeps a flood from amplifying itself in the logs.
        if count % 100 == 1 {
            tracing::debug!(
                reason = reason.as_str(),
                src_ip = %submission.src_ip,
                src_port = submission.src_port,
                len = submission.payload.len(),
                dropped_so_far = count,
                "payload dropped"
            );
        }
        Verdict::Denied(reason)
    }
}

/// Drive the encapsulator until shutdown or until every submitter is gone.
///
/// The command receiver lives behind a mutex owned by no task, so a restart
/// after a panic reattaches to the same channel and the handlers' senders
/// stay valid.
pub(crate) async fn run<E: Environment, S: FrameSender>(
    mut encap: Encapsulator<E, S>,
    env: E,
    commands: Arc<tokio::sync::Mutex<mpsc::Receiver<Command>>>,
    heartbeat_interval: Duration,
    mut shutdown: Shutdown,
) -> Result<(), ChildError> {
    let mut commands = commands.lock().await;

    // First beacon announces liveness as soon as the pipeline exists.
    encap.emit_heartbeat().await;
    let mut last_beacon = env.now();
    let mut last_sweep = env.now();

    loop {
        let now = env.now();
        let nap = heartbeat_interval
            .saturating_sub(now - last_beacon)
            .min(SWEEP_INTERVAL.saturating_sub(now - last_sweep));

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Submit(submission)) => {
                    let _ = encap.submit(&submission).await;
                },
                Some(Command::ResetSource { ip, reply }) => {
                    let _ = reply.send(encap.reset_source(ip));
                },
                None => {
                    tracing::debug!("all submitters closed");
                    break;
                },
            },
            () = env.sleep(nap) => {
                let now = env.now();
                if now - last_beacon >= heartbeat_interval {
                    encap.emit_heartbeat().await;
                    last_beacon = now;
                }
                if now - last_sweep >= SWEEP_INTERVAL {
                    encap.sweep();
                    last_sweep = now;
                }
            },
            () = shutdown.recv() => break,
        }
    }

    // Dropping the encapsulator closes the outbound socket; this is the last
    // ingress resource to go, after the listeners have already stopped.
    Ok(())
}
