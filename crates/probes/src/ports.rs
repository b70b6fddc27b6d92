//! Targeted TCP port scanner.
//!
//! Used on a selected device rather than in the continuous discovery
//! loop: a worker pool draws ports from a bounded queue, attempts a TCP
//! connect with a per-port timeout, and streams each open port to a
//! callback as soon as it is found.

use lanscout_core::{Error, InterfaceInfo, Result, ScanContext};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::trace;

/// Concurrent TCP connect scanner bound to one network interface.
pub struct PortScanner {
    workers: usize,
    iface: InterfaceInfo,
}

impl PortScanner {
    /// `workers` controls how many connects are in flight at once. More
    /// workers scan faster but hold more file descriptors.
    pub fn new(workers: usize, iface: InterfaceInfo) -> Self {
        Self {
            workers: workers.max(1),
            iface,
        }
    }

    /// Probe `ports` on `ip`, invoking `on_open` for every port that
    /// accepts a TCP connection. The callback runs on worker tasks and
    /// must be thread-safe; invocation order follows completion, not the
    /// input order.
    ///
    /// Returns [`Error::Cancelled`] when the context is cancelled before
    /// the queue drains.
    pub async fn stream<F>(
        &self,
        ctx: &ScanContext,
        ip: IpAddr,
        ports: &[u16],
        per_port_timeout: Duration,
        on_open: F,
    ) -> Result<()>
    where
        F: Fn(u16) + Send + Sync + 'static,
    {
        if ports.is_empty() {
            return Ok(());
        }

        let on_open = Arc::new(on_open);
        let (port_tx, port_rx) = mpsc::channel::<u16>(self.workers);
        let port_rx = Arc::new(tokio::sync::Mutex::new(port_rx));

        let mut workers = JoinSet::new();
        for _ in 0..self.workers {
            let ctx = ctx.clone();
            let rx = Arc::clone(&port_rx);
            let on_open = Arc::clone(&on_open);
            let local = self.iface.ipv4;
            workers.spawn(async move {
                loop {
                    let port = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            _ = ctx.cancelled() => return,
                            port = rx.recv() => match port {
                                Some(p) => p,
                                None => return,
                            },
                        }
                    };
                    if probe_port(local, ip, port, per_port_timeout).await {
                        trace!(%ip, port, "port open");
                        on_open(port);
                    }
                }
            });
        }

        // Feed the queue; stop on cancellation and report it.
        let mut cancelled = false;
        for &port in ports {
            tokio::select! {
                _ = ctx.cancelled() => {
                    cancelled = true;
                    break;
                }
                sent = port_tx.send(port) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        drop(port_tx);

        while workers.join_next().await.is_some() {}

        if cancelled || ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// One TCP connect attempt, bound to the interface's local address so the
/// probe leaves through the right NIC on multi-homed hosts.
async fn probe_port(local: std::net::Ipv4Addr, ip: IpAddr, port: u16, deadline: Duration) -> bool {
    let target = SocketAddr::new(ip, port);
    let socket = match target {
        SocketAddr::V4(_) => {
            let Ok(socket) = TcpSocket::new_v4() else {
                return false;
            };
            if socket.bind(SocketAddr::from((local, 0))).is_err() {
                return false;
            }
            socket
        }
        SocketAddr::V6(_) => match TcpSocket::new_v6() {
            Ok(socket) => socket,
            Err(_) => return false,
        },
    };

    matches!(timeout(deadline, socket.connect(target)).await, Ok(Ok(_)))
}
