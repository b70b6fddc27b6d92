//! ARP cache sweeper.
//!
//! lanscout runs without elevated privileges, so it cannot send ARP
//! requests itself. Instead the sweeper initiates small outbound touches
//! (UDP writes and TCP dials) to every host in the subnet; the OS has to
//! resolve each target's MAC to send them, which populates the ARP cache
//! the ARP scanner reads. The touches themselves are expected to fail.

use async_trait::async_trait;
use lanscout_core::{InterfaceInfo, ScanContext, Sweeper};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

const MAX_CONCURRENT_TOUCHES: usize = 200;
const TOUCH_DEADLINE: Duration = Duration::from_millis(300);

/// Discard and traceroute ports: closed nearly everywhere, which is fine —
/// the write only needs to force ARP resolution.
const UDP_TOUCH_PORTS: [u16; 2] = [9, 33434];
const TCP_TOUCH_PORTS: [u16; 2] = [80, 443];

/// Subnets wider than /16 are capped to their first /16 worth of
/// addresses to keep sweeps bounded on misconfigured CIDRs.
const MAX_SWEEP_PREFIX: u8 = 16;

/// Sweeps the interface's subnet to keep the OS ARP cache warm.
pub struct SubnetSweeper {
    iface: InterfaceInfo,
    interval: Option<Duration>,
    timeout: Duration,
}

impl SubnetSweeper {
    /// Sweeper that runs once immediately, then at the default interval.
    pub fn new(iface: InterfaceInfo) -> Self {
        Self {
            iface,
            interval: Some(lanscout_core::DEFAULT_SWEEP_INTERVAL),
            timeout: lanscout_core::DEFAULT_SWEEP_TIMEOUT,
        }
    }

    /// Repeat interval between sweeps; `None` sweeps exactly once.
    pub fn with_interval(mut self, interval: Option<Duration>) -> Self {
        self.interval = interval;
        self
    }

    /// Deadline applied to each individual sweep pass.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Every IPv4 address to touch: the whole subnet including network and
    /// broadcast addresses, excluding this host's own IP, capped at a /16
    /// equivalent for very wide subnets.
    fn targets(&self) -> Vec<Ipv4Addr> {
        let subnet = self.iface.subnet;
        let network = u32::from(subnet.network());

        let effective_prefix = if subnet.prefix() < MAX_SWEEP_PREFIX {
            warn!(
                subnet = %subnet,
                cap = MAX_SWEEP_PREFIX,
                "large subnet detected, capping ARP sweep"
            );
            MAX_SWEEP_PREFIX
        } else {
            subnet.prefix()
        };
        let host_bits = 32 - u32::from(effective_prefix);
        let last = network | ((1u64 << host_bits) - 1) as u32;

        let own = u32::from(self.iface.ipv4);
        (network..=last)
            .filter(|&addr| addr != own)
            .map(Ipv4Addr::from)
            .collect()
    }

    async fn sweep(&self, ctx: &ScanContext) {
        let targets = self.targets();
        if targets.is_empty() {
            return;
        }
        debug!(subnet = %self.iface.subnet, targets = targets.len(), "sweeping subnet to trigger ARP resolution");

        let sweep_ctx = ScanContext::with_timeout(ctx.token().child_token(), self.timeout);
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_TOUCHES));
        let mut touches = JoinSet::new();

        for ip in targets {
            if sweep_ctx.is_cancelled() {
                debug!("sweep interrupted, letting in-flight touches drain");
                break;
            }
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            touches.spawn(async move {
                touch_target(ip).await;
                drop(permit);
            });
        }

        while touches.join_next().await.is_some() {}
    }
}

#[async_trait]
impl Sweeper for SubnetSweeper {
    /// Sweep immediately, then on the configured interval until cancelled.
    /// Without an interval, sweep once and return.
    async fn run(&self, ctx: ScanContext) {
        self.sweep(&ctx).await;

        let Some(interval) = self.interval else {
            return;
        };
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            self.sweep(&ctx).await;
        }
    }
}

/// Fire-and-forget touches against one host. Failures are the expected
/// outcome; only the side effect on the ARP cache matters.
async fn touch_target(ip: Ipv4Addr) {
    for port in UDP_TOUCH_PORTS {
        if let Ok(socket) = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
            let _ = timeout(
                TOUCH_DEADLINE,
                socket.send_to(&[0], SocketAddr::from((ip, port))),
            )
            .await;
        }
    }
    for port in TCP_TOUCH_PORTS {
        if let Ok(Ok(stream)) = timeout(
            TOUCH_DEADLINE,
            TcpStream::connect(SocketAddr::from((ip, port))),
        )
        .await
        {
            drop(stream);
        }
    }
}
