//! The fused device model.
//!
//! A [`Device`] aggregates what multiple discovery protocols learned about
//! one IP address. Scanners construct partial observations; the engine folds
//! them together with [`Device::merge`]. Consumers receive `Arc<Device>`
//! pointers through the event stream and may hold them indefinitely: later
//! observations of the same IP mutate the same allocation through its
//! synchronised setters, so retained references see enrichment.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::RwLock;

/// A discovered network device, uniquely identified by its IP address.
///
/// All fields other than the IP are filled in progressively as scanners
/// contribute data. Access goes through getters that deep-copy mutable
/// containers; writers take the exclusive lock. Use it behind an `Arc`.
#[derive(Debug)]
pub struct Device {
    ip: IpAddr,
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    mac: Option<String>,
    display_name: Option<String>,
    manufacturer: Option<String>,
    sources: HashSet<String>,
    first_seen: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    extra_data: HashMap<String, String>,
    open_ports: HashMap<String, Vec<u16>>,
    last_port_scan: Option<DateTime<Utc>>,
}

/// Plain serializable view of a [`Device`], taken under the read lock.
///
/// This is the JSON shape exposed to embedders; port-scan state is
/// deliberately not part of it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub ip: IpAddr,
    pub mac: Option<String>,
    pub display_name: Option<String>,
    pub manufacturer: Option<String>,
    pub sources: Vec<String>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub extra_data: HashMap<String, String>,
}

impl Device {
    /// Create a device for the given IP. First/last seen start at "now".
    pub fn new(ip: IpAddr) -> Self {
        let now = Utc::now();
        Self {
            ip,
            inner: RwLock::new(Inner {
                first_seen: Some(now),
                last_seen: Some(now),
                ..Inner::default()
            }),
        }
    }

    /// The device's IP address, its identity key. Immutable.
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn mac(&self) -> Option<String> {
        self.inner.read().unwrap().mac.clone()
    }

    pub fn display_name(&self) -> Option<String> {
        self.inner.read().unwrap().display_name.clone()
    }

    pub fn manufacturer(&self) -> Option<String> {
        self.inner.read().unwrap().manufacturer.clone()
    }

    /// Names of the scanners that contributed to this device.
    pub fn sources(&self) -> HashSet<String> {
        self.inner.read().unwrap().sources.clone()
    }

    pub fn first_seen(&self) -> Option<DateTime<Utc>> {
        self.inner.read().unwrap().first_seen
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.inner.read().unwrap().last_seen
    }

    /// Protocol-specific metadata (SSDP location/server, mDNS TXT keys).
    pub fn extra_data(&self) -> HashMap<String, String> {
        self.inner.read().unwrap().extra_data.clone()
    }

    /// Open ports per protocol name (currently only `"tcp"`), in the order
    /// they were first observed.
    pub fn open_ports(&self) -> HashMap<String, Vec<u16>> {
        self.inner.read().unwrap().open_ports.clone()
    }

    pub fn last_port_scan(&self) -> Option<DateTime<Utc>> {
        self.inner.read().unwrap().last_port_scan
    }

    pub fn set_mac(&self, mac: impl Into<String>) {
        self.inner.write().unwrap().mac = Some(mac.into());
    }

    pub fn set_display_name(&self, name: impl Into<String>) {
        self.inner.write().unwrap().display_name = Some(name.into());
    }

    pub fn set_manufacturer(&self, manufacturer: impl Into<String>) {
        self.inner.write().unwrap().manufacturer = Some(manufacturer.into());
    }

    pub fn set_first_seen(&self, t: DateTime<Utc>) {
        self.inner.write().unwrap().first_seen = Some(t);
    }

    pub fn set_last_seen(&self, t: DateTime<Utc>) {
        self.inner.write().unwrap().last_seen = Some(t);
    }

    pub fn set_last_port_scan(&self, t: DateTime<Utc>) {
        self.inner.write().unwrap().last_port_scan = Some(t);
    }

    /// Record a scanner name as having observed this device.
    pub fn add_source(&self, name: impl Into<String>) {
        self.inner.write().unwrap().sources.insert(name.into());
    }

    pub fn add_extra_data(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner
            .write()
            .unwrap()
            .extra_data
            .insert(key.into(), value.into());
    }

    /// Append ports for a protocol, deduplicating while preserving the
    /// order of first appearance.
    pub fn add_open_ports(&self, protocol: impl Into<String>, ports: &[u16]) {
        let mut inner = self.inner.write().unwrap();
        let list = inner.open_ports.entry(protocol.into()).or_default();
        for &p in ports {
            if !list.contains(&p) {
                list.push(p);
            }
        }
    }

    /// Combine information from another observation of the same IP.
    ///
    /// Field rules: `mac`, `display_name`, and `manufacturer` fill only if
    /// empty (first observation wins); `sources` and per-protocol open
    /// ports are set unions; `extra_data` merges key-by-key without
    /// overwriting; `first_seen` takes the earliest non-empty value,
    /// `last_seen` and `last_port_scan` the latest.
    ///
    /// Locks are taken in a consistent order: the caller's write lock
    /// first, then the operand's read lock. Merging a device into itself
    /// is a no-op.
    pub fn merge(&self, other: &Device) {
        if std::ptr::eq(self, other) {
            return;
        }

        let mut inner = self.inner.write().unwrap();
        let theirs = other.inner.read().unwrap();

        if inner.mac.is_none() {
            inner.mac.clone_from(&theirs.mac);
        }
        if inner.display_name.is_none() {
            inner.display_name.clone_from(&theirs.display_name);
        }
        if inner.manufacturer.is_none() {
            inner.manufacturer.clone_from(&theirs.manufacturer);
        }
        for src in &theirs.sources {
            if !inner.sources.contains(src) {
                inner.sources.insert(src.clone());
            }
        }
        for (k, v) in &theirs.extra_data {
            if !inner.extra_data.contains_key(k) {
                inner.extra_data.insert(k.clone(), v.clone());
            }
        }
        inner.first_seen = match (inner.first_seen, theirs.first_seen) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        inner.last_seen = match (inner.last_seen, theirs.last_seen) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        for (protocol, ports) in &theirs.open_ports {
            let list = inner.open_ports.entry(protocol.clone()).or_default();
            for &p in ports {
                if !list.contains(&p) {
                    list.push(p);
                }
            }
        }
        if theirs.last_port_scan > inner.last_port_scan {
            inner.last_port_scan = theirs.last_port_scan;
        }
    }

    /// Independent deep clone: the result shares no containers with `self`.
    pub fn deep_clone(&self) -> Device {
        let inner = self.inner.read().unwrap();
        Device {
            ip: self.ip,
            inner: RwLock::new(Inner {
                mac: inner.mac.clone(),
                display_name: inner.display_name.clone(),
                manufacturer: inner.manufacturer.clone(),
                sources: inner.sources.clone(),
                first_seen: inner.first_seen,
                last_seen: inner.last_seen,
                extra_data: inner.extra_data.clone(),
                open_ports: inner.open_ports.clone(),
                last_port_scan: inner.last_port_scan,
            }),
        }
    }

    /// Consistent point-in-time view for serialization and display.
    /// Sources are sorted so output is deterministic.
    pub fn snapshot(&self) -> DeviceSnapshot {
        let inner = self.inner.read().unwrap();
        let mut sources: Vec<String> = inner.sources.iter().cloned().collect();
        sources.sort();
        DeviceSnapshot {
            ip: self.ip,
            mac: inner.mac.clone(),
            display_name: inner.display_name.clone(),
            manufacturer: inner.manufacturer.clone(),
            sources,
            first_seen: inner.first_seen,
            last_seen: inner.last_seen,
            extra_data: inner.extra_data.clone(),
        }
    }
}

impl Serialize for Device {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}
