//! Network interface resolution and IPv4 subnet arithmetic.

use crate::error::{Error, Result};
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use tracing::debug;

/// An IPv4 subnet in CIDR form, normalised so host bits are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubnetV4 {
    network: Ipv4Addr,
    prefix: u8,
}

impl SubnetV4 {
    /// Build a subnet from any address inside it plus the netmask.
    pub fn from_ip_mask(ip: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        let prefix = u32::from(netmask).count_ones() as u8;
        Self::new(ip, prefix)
    }

    /// Build a subnet from any address inside it plus the prefix length.
    /// Prefixes above 32 are clamped.
    pub fn new(ip: Ipv4Addr, prefix: u8) -> Self {
        let prefix = prefix.min(32);
        let network = Ipv4Addr::from(u32::from(ip) & Self::mask_bits(prefix));
        Self { network, prefix }
    }

    fn mask_bits(prefix: u8) -> u32 {
        if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - prefix as u32)
        }
    }

    /// The network address (host bits zero).
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// Prefix length in bits.
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// The subnet mask as a dotted quad.
    pub fn mask(&self) -> Ipv4Addr {
        Ipv4Addr::from(Self::mask_bits(self.prefix))
    }

    /// The subnet broadcast address (`network | !mask`).
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !Self::mask_bits(self.prefix))
    }

    /// Whether the address falls inside this subnet.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & Self::mask_bits(self.prefix) == u32::from(self.network)
    }
}

impl fmt::Display for SubnetV4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// The network interface a discovery engine operates on.
///
/// Created once at engine construction and immutable thereafter.
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    /// OS interface name (`eth0`, `en0`, ...).
    pub name: String,
    /// OS interface index; used to match Windows ARP table rows.
    pub index: u32,
    /// The host's IPv4 address on this interface.
    pub ipv4: Ipv4Addr,
    /// The interface's IPv4 subnet.
    pub subnet: SubnetV4,
}

impl InterfaceInfo {
    /// Resolve an interface by name, or auto-detect the default one when
    /// `name` is empty.
    ///
    /// Auto-detection first asks the OS which local address it would route
    /// to a public destination (a connected UDP socket; no packet is sent)
    /// and matches that address to an interface. If that fails it falls
    /// back to the first non-loopback interface with an IPv4 address.
    pub fn resolve(name: &str) -> Result<Self> {
        let interfaces = list_interfaces()?;

        if !name.is_empty() {
            let iface = interfaces
                .iter()
                .find(|i| i.name == name)
                .ok_or_else(|| Error::InterfaceNotFound {
                    name: name.to_string(),
                })?;
            return Self::from_os_interface(iface);
        }

        if let Some(local) = default_route_local_ip() {
            if let Some(iface) = interfaces
                .iter()
                .find(|i| i.addr.iter().any(|a| a.ip() == IpAddr::V4(local)))
            {
                debug!(interface = %iface.name, ip = %local, "auto-detected default interface");
                return Self::from_os_interface(iface);
            }
        }

        interfaces
            .iter()
            .find(|i| {
                i.addr.iter().any(|a| match a {
                    Addr::V4(v4) => !v4.ip.is_loopback(),
                    Addr::V6(_) => false,
                })
            })
            .ok_or(Error::NoDefaultInterface)
            .and_then(Self::from_os_interface)
    }

    fn from_os_interface(iface: &NetworkInterface) -> Result<Self> {
        let v4 = iface
            .addr
            .iter()
            .find_map(|a| match a {
                Addr::V4(v4) => Some(v4),
                Addr::V6(_) => None,
            })
            .ok_or_else(|| Error::NoIpv4Address {
                name: iface.name.clone(),
            })?;

        // Some virtual interfaces report no netmask; a /24 is the least
        // surprising assumption for a LAN segment.
        let netmask = v4.netmask.unwrap_or_else(|| {
            debug!(interface = %iface.name, "interface reports no netmask, assuming /24");
            Ipv4Addr::new(255, 255, 255, 0)
        });

        Ok(Self {
            name: iface.name.clone(),
            index: iface.index,
            ipv4: v4.ip,
            subnet: SubnetV4::from_ip_mask(v4.ip, netmask),
        })
    }
}

fn list_interfaces() -> Result<Vec<NetworkInterface>> {
    NetworkInterface::show()
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, format!("{e:?}"))))
}

/// The local IPv4 address the OS would use to reach the public internet.
/// Connecting a UDP socket selects a route without sending anything.
fn default_route_local_ip() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect(("8.8.8.8", 53)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(_) => None,
    }
}

/// Numeric ordering for IPv4 addresses (`192.168.1.2 < 192.168.1.100`),
/// falling back to string order for anything else. Useful for stable,
/// human-friendly device listings.
pub fn compare_ips(a: &IpAddr, b: &IpAddr) -> Ordering {
    match (a, b) {
        (IpAddr::V4(a4), IpAddr::V4(b4)) => u32::from(*a4).cmp(&u32::from(*b4)),
        _ => a.to_string().cmp(&b.to_string()),
    }
}
