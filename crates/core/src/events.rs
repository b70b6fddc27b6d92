//! Engine lifecycle and discovery events.

use crate::device::Device;
use crate::error::Error;
use std::sync::Arc;
use std::time::Duration;

/// Statistics attached to a completed scan cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanStats {
    /// Distinct devices observed during the scan.
    pub device_count: usize,
    /// Wall-clock duration of the scan.
    pub duration: Duration,
}

/// Something that happened during device discovery.
///
/// Delivered through the stream returned by
/// [`Engine::start`](crate::Engine::start). Ordering contract:
/// `EngineStarted` is the first event and `EngineStopped` the last; within
/// a scan, `ScanStarted` precedes every `DeviceDiscovered`, which precede
/// `ScanCompleted`.
///
/// `DeviceDiscovered` carries a shared pointer to the canonical device for
/// that IP; later observations within the same scan mutate it in place, so
/// an event per observation is emitted but the pointer may repeat.
#[derive(Debug, Clone)]
pub enum Event {
    /// The engine began background discovery.
    EngineStarted,
    /// A scan cycle started.
    ScanStarted,
    /// A scanner observed a device (new or newly merged).
    DeviceDiscovered(Arc<Device>),
    /// A scan cycle finished.
    ScanCompleted(ScanStats),
    /// A scanner or the engine hit a non-fatal error; the scan continues.
    Error(Arc<Error>),
    /// The engine shut down; the stream closes after this event.
    EngineStopped,
}

impl Event {
    /// Short tag for logging and display.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::EngineStarted => "engine-started",
            Event::ScanStarted => "scan-started",
            Event::DeviceDiscovered(_) => "device-discovered",
            Event::ScanCompleted(_) => "scan-completed",
            Event::Error(_) => "error",
            Event::EngineStopped => "engine-stopped",
        }
    }
}
