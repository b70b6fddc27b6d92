//! # lanscout Probes
//!
//! Active probing companions to the passive `lanscout-core` scanners:
//!
//! - [`SubnetSweeper`] walks the subnet touching unreachable ports so the
//!   OS performs ARP resolution as a side effect, feeding the ARP scanner.
//! - [`PortScanner`] runs targeted concurrent TCP connect probes against a
//!   single selected device.
//!
//! Neither requires elevated privileges; both send only ordinary outbound
//! traffic.

pub mod ports;
pub mod sweeper;

pub use ports::PortScanner;
pub use sweeper::SubnetSweeper;
