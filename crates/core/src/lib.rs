//! # lanscout Core
//!
//! Core discovery engine for unprivileged local-network device discovery.
//! Aggregates observations from independent protocol scanners (ARP cache,
//! mDNS/DNS-SD, SSDP) into a single deduplicated device inventory, enriched
//! with manufacturer names resolved from the IEEE OUI registry.
//!
//! ## Design
//!
//! - **Scanners** feed a fan-in channel; the [`Engine`] merges observations
//!   of the same IP into one [`Device`] and emits [`Event`]s.
//! - No scanner requires elevated privileges: the ARP scanner only reads
//!   the OS cache, and the sweeper in `lanscout-probes` primes that cache
//!   with ordinary outbound traffic.
//! - Everything long-running takes a [`ScanContext`] and returns promptly
//!   on cancellation.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lanscout_core::{Engine, Event, InterfaceInfo};
//! use lanscout_core::scanners::{ArpScanner, MdnsScanner, SsdpScanner};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let iface = InterfaceInfo::resolve("")?;
//!     let engine = Arc::new(
//!         Engine::builder()
//!             .interface(iface.clone())
//!             .scanner(Arc::new(ArpScanner::new(iface.clone())))
//!             .scanner(Arc::new(MdnsScanner::new(iface.clone())))
//!             .scanner(Arc::new(SsdpScanner::new(iface)))
//!             .build()?,
//!     );
//!
//!     let mut events = engine.start().expect("freshly built engine");
//!     while let Some(event) = events.recv().await {
//!         if let Event::DeviceDiscovered(device) = event {
//!             println!("found {}", device.ip());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod iface;
pub mod oui;
pub mod scanner;
pub mod scanners;

pub use device::{Device, DeviceSnapshot};
pub use engine::{Engine, EngineBuilder, Sweeper};
pub use error::{Error, Result};
pub use events::{Event, ScanStats};
pub use iface::{compare_ips, InterfaceInfo, SubnetV4};
pub use oui::OuiRegistry;
pub use scanner::{ScanContext, Scanner};

use std::time::Duration;

/// Current version of the lanscout core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent string for outbound HTTP and SSDP requests.
pub const USER_AGENT: &str = concat!("lanscout/", env!("CARGO_PKG_VERSION"));

/// Default interval between scan cycle starts.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(20);

/// Default per-scan deadline.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between sweeper runs.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Default per-sweep deadline.
pub const DEFAULT_SWEEP_TIMEOUT: Duration = Duration::from_secs(20);

/// Capacity of the engine's event channel. Writes are non-blocking;
/// events beyond this buffer are dropped.
pub const EVENT_BUFFER: usize = 512;
