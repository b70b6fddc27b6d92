//! ARP cache scanner.
//!
//! Discovers devices by reading the system's ARP table. Nothing is sent on
//! the wire — the scanner only reports what the OS already learned, which
//! makes it cheap and non-intrusive but dependent on recent traffic. The
//! `lanscout-probes` sweeper exists to keep that cache populated.

mod bsd;
mod linux;
#[cfg(windows)]
mod windows;

use crate::device::Device;
use crate::error::Result;
use crate::iface::InterfaceInfo;
use crate::scanner::{ScanContext, Scanner};
use async_trait::async_trait;
use chrono::Utc;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A single ARP cache entry as produced by the platform readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpEntry {
    pub ip: IpAddr,
    pub mac: [u8; 6],
    /// How long ago the entry was confirmed, when the platform reports it.
    pub age: Option<Duration>,
    /// OS name of the interface the entry belongs to.
    pub interface: String,
}

/// Scanner that polls the OS ARP cache.
pub struct ArpScanner {
    iface: InterfaceInfo,
    poll_interval: Duration,
}

impl ArpScanner {
    pub fn new(iface: InterfaceInfo) -> Self {
        Self {
            iface,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the cache polling interval (default 250 ms). Zero falls
    /// back to the default.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.poll_interval = interval;
        }
        self
    }

    async fn read_entries(&self) -> Result<Vec<ArpEntry>> {
        #[cfg(target_os = "linux")]
        {
            linux::read_cache().await
        }
        #[cfg(any(
            target_os = "macos",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd"
        ))]
        {
            bsd::read_cache().await
        }
        #[cfg(windows)]
        {
            windows::read_cache(&self.iface)
        }
        #[cfg(not(any(
            target_os = "linux",
            target_os = "macos",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd",
            windows
        )))]
        {
            Ok(Vec::new())
        }
    }

    async fn emit_entries(
        &self,
        ctx: &ScanContext,
        out: &mpsc::Sender<Arc<Device>>,
        entries: Vec<ArpEntry>,
    ) -> Result<()> {
        let now = Utc::now();
        for entry in entries {
            if entry.interface != self.iface.name {
                continue;
            }
            if is_multicast_mac(&entry.mac)
                || is_broadcast_mac(&entry.mac)
                || is_multicast_ipv4(&entry.ip)
                || is_subnet_broadcast(&entry.ip, &self.iface)
            {
                continue;
            }

            let device = Arc::new(Device::new(entry.ip));
            device.set_mac(format_mac(&entry.mac));
            device.add_source(self.name());
            match entry.age {
                Some(age) if !age.is_zero() => {
                    let age = chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero());
                    device.set_last_seen(now - age);
                }
                _ => device.set_last_seen(now),
            }

            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                sent = out.send(device) => {
                    if sent.is_err() {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Scanner for ArpScanner {
    fn name(&self) -> &'static str {
        "arp-cache"
    }

    /// Poll the ARP cache until the scan is cancelled, emitting filtered
    /// entries as devices on every pass.
    async fn scan(&self, ctx: ScanContext, out: mpsc::Sender<Arc<Device>>) -> Result<()> {
        loop {
            match self.read_entries().await {
                Ok(entries) => self.emit_entries(&ctx, &out, entries).await?,
                Err(err) => {
                    if ctx.is_cancelled() {
                        return Ok(());
                    }
                    tracing::debug!(%err, "failed to read ARP cache");
                }
            }

            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

/// Parse `aa:bb:cc:dd:ee:ff` (single-digit groups included, as printed by
/// the BSD `arp` tool) into raw bytes.
pub(crate) fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let mut bytes = [0u8; 6];
    let mut count = 0;
    for group in s.split(':') {
        if count == 6 || group.is_empty() || group.len() > 2 {
            return None;
        }
        bytes[count] = u8::from_str_radix(group, 16).ok()?;
        count += 1;
    }
    (count == 6).then_some(bytes)
}

pub(crate) fn format_mac(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

/// Multicast MACs have the least-significant bit of the first octet set.
fn is_multicast_mac(mac: &[u8; 6]) -> bool {
    mac[0] & 0x01 != 0
}

fn is_broadcast_mac(mac: &[u8; 6]) -> bool {
    mac.iter().all(|&b| b == 0xFF)
}

/// IPv4 multicast range 224.0.0.0/4: high nibble of the first octet is 1110.
fn is_multicast_ipv4(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.octets()[0] & 0xF0 == 224,
        IpAddr::V6(_) => false,
    }
}

/// The subnet broadcast address (`network | !mask`) for our interface.
fn is_subnet_broadcast(ip: &IpAddr, iface: &InterfaceInfo) -> bool {
    match ip {
        IpAddr::V4(v4) => *v4 == iface.subnet.broadcast(),
        IpAddr::V6(_) => false,
    }
}
