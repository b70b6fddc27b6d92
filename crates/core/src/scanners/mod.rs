//! Built-in discovery scanners.
//!
//! Each scanner implements the [`Scanner`](crate::Scanner) capability and
//! contributes partial [`Device`](crate::Device) observations that the
//! engine fuses by IP:
//!
//! - [`ArpScanner`] reads the OS ARP cache (lightweight, MAC-bearing,
//!   but only as fresh as the cache — pair it with the sweeper).
//! - [`MdnsScanner`] performs DNS-SD service discovery (rich names and
//!   metadata, only for devices that advertise).
//! - [`SsdpScanner`] sends a UPnP M-SEARCH (smart TVs, media servers,
//!   IoT gear).

pub mod arp;
pub mod mdns;
pub mod ssdp;

pub use arp::ArpScanner;
pub use mdns::MdnsScanner;
pub use ssdp::SsdpScanner;
