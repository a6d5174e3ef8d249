//! Statsd UDP listener.
//!
//! One task owns the socket. Every datagram is decoded and folded into the
//! aggregator on that task; there is no hand-off queue, so listener
//! throughput is bounded by aggregation cost.
//!
//! Shutdown is cooperative. [`ListenerHandle::stop`] signals the loop and
//! then waits until the socket has actually been closed, so the same port
//! can be bound again right away.

use crate::core::config::{ListenerConfig, DEFAULT_STATSD_PORT};
use crate::core::{RelayError, Result};
use crate::metrics::{decode_packet, BucketAggregator};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Packet and line counters for one listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    packets_received: AtomicU64,
    lines_decoded: AtomicU64,
    lines_dropped: AtomicU64,
    packets_forwarded: AtomicU64,
}

/// Point-in-time copy of [`ListenerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStatsSnapshot {
    pub packets_received: u64,
    pub lines_decoded: u64,
    pub lines_dropped: u64,
    pub packets_forwarded: u64,
}

impl ListenerStats {
    /// Read all counters
    pub fn snapshot(&self) -> ListenerStatsSnapshot {
        ListenerStatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            lines_decoded: self.lines_decoded.load(Ordering::Relaxed),
            lines_dropped: self.lines_dropped.load(Ordering::Relaxed),
            packets_forwarded: self.packets_forwarded.load(Ordering::Relaxed),
        }
    }
}

/// Owns the socket for the lifetime of the receive loop. Dropping it closes
/// the socket first and then fires the completion signal, on every exit
/// path including a panic in the loop.
struct SocketGuard {
    socket: Option<UdpSocket>,
    done: Option<oneshot::Sender<()>>,
}

impl SocketGuard {
    fn socket(&self) -> Option<&UdpSocket> {
        self.socket.as_ref()
    }
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        drop(self.socket.take());
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

/// Statsd listener, not yet bound.
pub struct UdpListener {
    config: ListenerConfig,
    aggregator: Arc<BucketAggregator>,
}

impl UdpListener {
    /// Create a listener feeding `aggregator`
    pub fn new(config: ListenerConfig, aggregator: Arc<BucketAggregator>) -> Self {
        Self { config, aggregator }
    }

    /// Bind the socket and spawn the receive loop.
    pub async fn start(self) -> Result<ListenerHandle> {
        let socket = bind(&self.config.bind_address, self.config.port).await?;
        let local_addr = socket.local_addr()?;

        let forwarder = match self.config.forward_to.as_deref() {
            Some(target) => connect_forwarder(target).await,
            None => None,
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let (done_tx, done_rx) = oneshot::channel();
        let stats = Arc::new(ListenerStats::default());

        let guard = SocketGuard {
            socket: Some(socket),
            done: Some(done_tx),
        };

        let receive_loop = ReceiveLoop {
            aggregator: self.aggregator,
            forwarder,
            stats: Arc::clone(&stats),
            max_packet_size: self.config.max_packet_size,
            poll_timeout: self.config.poll_timeout,
        };

        let task = tokio::spawn(receive_loop.run(guard, stop_rx));

        tracing::info!(%local_addr, "statsd listener started");

        Ok(ListenerHandle {
            local_addr,
            stats,
            stop_tx,
            done_rx: Some(done_rx),
            task: Some(task),
        })
    }
}

/// Control handle for a running listener.
///
/// Dropping the handle without calling [`stop`](Self::stop) also ends the
/// loop, but nobody waits for the socket to close.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    stats: Arc<ListenerStats>,
    stop_tx: watch::Sender<bool>,
    done_rx: Option<oneshot::Receiver<()>>,
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Address the socket is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live counters
    pub fn stats(&self) -> ListenerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop the loop and wait until the socket is released.
    pub async fn stop(&mut self) -> Result<()> {
        let _ = self.stop_tx.send(true);

        if let Some(done) = self.done_rx.take() {
            // The sender lives in the guard, so an error here still means
            // the guard has been dropped.
            let _ = done.await;
        }

        if let Some(task) = self.task.take() {
            task.await?;
        }

        tracing::info!(local_addr = %self.local_addr, "statsd listener stopped");
        Ok(())
    }
}

struct ReceiveLoop {
    aggregator: Arc<BucketAggregator>,
    forwarder: Option<UdpSocket>,
    stats: Arc<ListenerStats>,
    max_packet_size: usize,
    poll_timeout: Duration,
}

impl ReceiveLoop {
    async fn run(self, guard: SocketGuard, mut stop: watch::Receiver<bool>) {
        let Some(socket) = guard.socket() else {
            return;
        };
        let mut buf = vec![0u8; self.max_packet_size];

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                // Either a stop request or the handle was dropped.
                _ = stop.changed() => break,
                received = tokio::time::timeout(self.poll_timeout, socket.recv_from(&mut buf)) => {
                    match received {
                        Err(_) => continue,
                        Ok(Ok((len, peer))) => self.handle_datagram(&buf[..len], peer),
                        Ok(Err(e)) => {
                            tracing::warn!(error = %e, "statsd receive failed");
                        },
                    }
                },
            }
        }

        drop(guard);
    }

    fn handle_datagram(&self, datagram: &[u8], peer: SocketAddr) {
        self.stats.packets_received.fetch_add(1, Ordering::Relaxed);

        if let Some(forwarder) = &self.forwarder {
            match forwarder.try_send(datagram) {
                Ok(_) => {
                    self.stats.packets_forwarded.fetch_add(1, Ordering::Relaxed);
                },
                Err(e) => tracing::debug!(error = %e, "statsd forward failed"),
            }
        }

        let decoded = decode_packet(datagram);
        tracing::trace!(
            %peer,
            bytes = datagram.len(),
            samples = decoded.samples.len(),
            dropped = decoded.dropped,
            "statsd datagram"
        );

        self.stats
            .lines_decoded
            .fetch_add(decoded.samples.len() as u64, Ordering::Relaxed);
        self.stats
            .lines_dropped
            .fetch_add(decoded.dropped as u64, Ordering::Relaxed);

        self.aggregator.submit_all(decoded.samples);
    }
}

/// Resolve the bind address. Only a `localhost` that fails to resolve falls
/// back to `127.0.0.1`; bind failures are reported as they are.
async fn resolve_bind_addrs(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    match tokio::net::lookup_host((host, port)).await {
        Ok(addrs) => Ok(addrs.collect()),
        Err(e) if host == "localhost" => {
            tracing::warn!(error = %e, "localhost does not resolve, binding 127.0.0.1");
            Ok(vec![SocketAddr::from((Ipv4Addr::LOCALHOST, port))])
        },
        Err(e) => Err(RelayError::network(format!("cannot resolve {host}: {e}"))),
    }
}

async fn bind(host: &str, port: u16) -> Result<UdpSocket> {
    let addrs = resolve_bind_addrs(host, port).await?;
    UdpSocket::bind(addrs.as_slice())
        .await
        .map_err(|e| RelayError::network(format!("cannot bind {host}:{port}: {e}")))
}

/// Split `host[:port]`, defaulting to the statsd port.
fn parse_forward_target(target: &str) -> (String, u16) {
    if let Ok(addr) = target.parse::<SocketAddr>() {
        return (addr.ip().to_string(), addr.port());
    }
    match target.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse::<u16>() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (target.to_string(), DEFAULT_STATSD_PORT),
        },
        _ => (target.trim_matches(&['[', ']'][..]).to_string(), DEFAULT_STATSD_PORT),
    }
}

async fn connect_forwarder(target: &str) -> Option<UdpSocket> {
    let (host, port) = parse_forward_target(target);

    let remote = match tokio::net::lookup_host((host.as_str(), port)).await {
        Ok(mut addrs) => addrs.next(),
        Err(e) => {
            tracing::warn!(target, error = %e, "cannot resolve statsd forward target");
            None
        },
    }?;

    let local: SocketAddr = if remote.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };

    let socket = match UdpSocket::bind(local).await {
        Ok(socket) => socket,
        Err(e) => {
            tracing::warn!(target, error = %e, "cannot open statsd forward socket");
            return None;
        },
    };

    if let Err(e) = socket.connect(remote).await {
        tracing::warn!(target, error = %e, "cannot connect statsd forward socket");
        return None;
    }

    tracing::info!(%remote, "forwarding statsd datagrams");
    Some(socket)
}
