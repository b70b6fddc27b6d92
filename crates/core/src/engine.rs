//! The discovery engine: scan scheduling, fan-in, and device fusion.

use crate::device::Device;
use crate::error::{Error, Result};
use crate::events::{Event, ScanStats};
use crate::iface::InterfaceInfo;
use crate::oui::OuiRegistry;
use crate::scanner::{ScanContext, Scanner};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Buffer of the per-scan fan-in channel; sized to smooth out bursts from
/// scanners that emit non-blocking.
const FANIN_BUFFER: usize = 256;

/// Something that primes the ARP cache by touching hosts in the subnet.
///
/// Runs for as long as its context lives: continuously (at its own
/// interval) under [`Engine::start`], or for the duration of a single
/// [`Engine::scan`].
#[async_trait]
pub trait Sweeper: Send + Sync {
    async fn run(&self, ctx: ScanContext);
}

/// Coordinates scanners, merges their observations per scan cycle, and
/// exposes progress through an event stream.
///
/// Construct with [`Engine::builder`]. Clone-cheap handles are not
/// provided; share the engine behind an [`Arc`].
pub struct Engine {
    iface: InterfaceInfo,
    scanners: Vec<Arc<dyn Scanner>>,
    sweeper: Option<Arc<dyn Sweeper>>,
    oui: Option<Arc<OuiRegistry>>,
    scan_interval: Duration,
    scan_timeout: Duration,
    events_tx: Mutex<Option<mpsc::Sender<Event>>>,
    state: Mutex<State>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("iface", &self.iface)
            .field("scan_interval", &self.scan_interval)
            .field("scan_timeout", &self.scan_timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct State {
    running: bool,
    root: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
    receiver: Option<mpsc::Receiver<Event>>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// The interface this engine scans on.
    pub fn interface(&self) -> &InterfaceInfo {
        &self.iface
    }

    /// Begin continuous background discovery.
    ///
    /// The first scan starts immediately; subsequent scans start on a
    /// fixed-rate schedule measured from each scan's start. With a zero
    /// interval exactly one scan runs and the loop exits (the engine stays
    /// startable-stoppable either way).
    ///
    /// Returns the event stream on the first call. Calling again while
    /// running starts no additional work and returns `None`, since the
    /// single receiver was already handed out.
    pub fn start(self: &Arc<Self>) -> Option<mpsc::Receiver<Event>> {
        let mut state = self.state.lock().unwrap();
        if state.running {
            return None;
        }
        state.running = true;

        let root = CancellationToken::new();
        state.root = Some(root.clone());

        self.emit(Event::EngineStarted);

        if let Some(sweeper) = &self.sweeper {
            let sweeper = Arc::clone(sweeper);
            let ctx = ScanContext::new(root.child_token());
            state.tasks.push(tokio::spawn(async move {
                sweeper.run(ctx).await;
            }));
        }

        let engine = Arc::clone(self);
        let loop_root = root;
        state.tasks.push(tokio::spawn(async move {
            engine.scan_loop(loop_root).await;
        }));

        state.receiver.take()
    }

    /// Shut down background discovery: cancel everything, wait for the
    /// workers, emit [`Event::EngineStopped`], and close the stream.
    /// Safe to call repeatedly or on an engine that never started.
    pub async fn stop(&self) {
        let (root, tasks) = {
            let mut state = self.state.lock().unwrap();
            if !state.running {
                return;
            }
            state.running = false;
            (state.root.take(), std::mem::take(&mut state.tasks))
        };

        if let Some(root) = root {
            root.cancel();
        }
        for task in tasks {
            let _ = task.await;
        }

        self.emit(Event::EngineStopped);
        // Dropping the sender closes the stream once buffered events drain.
        self.events_tx.lock().unwrap().take();
    }

    /// Perform exactly one scan synchronously and return the devices found.
    ///
    /// The engine's scan timeout applies. When a sweeper is configured it
    /// runs concurrently for the duration of this scan only. An empty
    /// result is not an error.
    pub async fn scan(&self) -> Result<Vec<Arc<Device>>> {
        let root = CancellationToken::new();

        let sweep_task = self.sweeper.as_ref().map(|sweeper| {
            let sweeper = Arc::clone(sweeper);
            let ctx = ScanContext::new(root.child_token());
            tokio::spawn(async move {
                sweeper.run(ctx).await;
            })
        });

        let result = self.perform_scan(&root).await;

        root.cancel();
        if let Some(task) = sweep_task {
            let _ = task.await;
        }

        result
    }

    /// Fixed-rate scheduler.
    ///
    /// Contract: the first scan starts immediately; scan N+1 is due at
    /// `start(N) + interval`; a scan running past its due time makes the
    /// next one start back-to-back (no catch-up queue). Scans never
    /// overlap.
    async fn scan_loop(self: Arc<Self>, root: CancellationToken) {
        if self.scan_interval.is_zero() {
            if let Err(err) = self.perform_scan(&root).await {
                if !root.is_cancelled() {
                    self.emit(Event::Error(Arc::new(err)));
                }
            }
            return;
        }

        let mut next_due = Instant::now();
        loop {
            tokio::select! {
                _ = root.cancelled() => return,
                _ = tokio::time::sleep_until(next_due) => {}
            }
            if root.is_cancelled() {
                return;
            }

            let scan_start = Instant::now();
            if let Err(err) = self.perform_scan(&root).await {
                if !root.is_cancelled() {
                    self.emit(Event::Error(Arc::new(err)));
                }
            }
            // Measured from scan start; sleeping until a past instant
            // returns immediately, which is the back-to-back case.
            next_due = scan_start + self.scan_interval;
        }
    }

    /// One scan cycle: fan in every scanner, merge observations by IP,
    /// enrich with OUI data, and bracket the whole thing with
    /// `ScanStarted`/`ScanCompleted`.
    async fn perform_scan(&self, root: &CancellationToken) -> Result<Vec<Arc<Device>>> {
        self.emit(Event::ScanStarted);
        let start = Instant::now();

        let ctx = ScanContext::with_timeout(root.child_token(), self.scan_timeout);
        let (fanin_tx, mut fanin_rx) = mpsc::channel::<Arc<Device>>(FANIN_BUFFER);
        let events = self.events_tx.lock().unwrap().clone();

        for scanner in &self.scanners {
            let scanner = Arc::clone(scanner);
            let ctx = ctx.clone();
            let tx = fanin_tx.clone();
            let events = events.clone();
            tokio::spawn(async move {
                // Keep `tx` alive until after any error is emitted so the
                // fan-in drain below observes scanner errors in-order.
                let result = scanner.scan(ctx.clone(), tx.clone()).await;
                if let Err(err) = result {
                    if !ctx.is_cancelled() {
                        let err = Error::scanner(scanner.name(), err);
                        warn!(%err, "scanner failed");
                        emit_to(&events, Event::Error(Arc::new(err)));
                    }
                }
                drop(tx);
            });
        }
        drop(fanin_tx);

        // The channel closes when the last scanner task drops its sender.
        let mut devices: HashMap<IpAddr, Arc<Device>> = HashMap::new();
        while let Some(observation) = fanin_rx.recv().await {
            let canonical = self.fold_observation(observation, &mut devices);
            self.emit(Event::DeviceDiscovered(canonical));
        }

        let stats = ScanStats {
            device_count: devices.len(),
            duration: start.elapsed(),
        };
        debug!(devices = stats.device_count, duration = ?stats.duration, "scan completed");
        self.emit(Event::ScanCompleted(stats));

        Ok(devices.into_values().collect())
    }

    /// Merge one observation into the per-scan map and return the
    /// canonical device pointer for its IP.
    fn fold_observation(
        &self,
        observation: Arc<Device>,
        devices: &mut HashMap<IpAddr, Arc<Device>>,
    ) -> Arc<Device> {
        match devices.entry(observation.ip()) {
            std::collections::hash_map::Entry::Occupied(existing) => {
                let canonical = existing.get();
                canonical.merge(&observation);
                self.fill_manufacturer(canonical);
                Arc::clone(canonical)
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                if observation.first_seen().is_none() {
                    observation.set_first_seen(chrono::Utc::now());
                }
                self.fill_manufacturer(&observation);
                slot.insert(Arc::clone(&observation));
                observation
            }
        }
    }

    fn fill_manufacturer(&self, device: &Device) {
        let Some(registry) = &self.oui else {
            return;
        };
        if device.manufacturer().is_some() {
            return;
        }
        let Some(mac) = device.mac() else {
            return;
        };
        if let Some(organisation) = registry.lookup(&mac) {
            device.set_manufacturer(organisation);
        }
    }

    /// Non-blocking event emission: a full buffer drops the event. Dropped
    /// errors are at least logged.
    fn emit(&self, event: Event) {
        let events = self.events_tx.lock().unwrap().clone();
        emit_to(&events, event);
    }
}

fn emit_to(events: &Option<mpsc::Sender<Event>>, event: Event) {
    let Some(tx) = events else {
        return;
    };
    if let Err(mpsc::error::TrySendError::Full(event)) = tx.try_send(event) {
        if let Event::Error(err) = event {
            warn!(%err, "event channel full, dropping error event");
        }
    }
}

/// Builder for [`Engine`].
///
/// Requires an interface and at least one scanner or a sweeper; everything
/// else has defaults (20 s interval, 10 s timeout, no OUI registry).
#[derive(Default)]
pub struct EngineBuilder {
    iface: Option<InterfaceInfo>,
    scanners: Vec<Arc<dyn Scanner>>,
    sweeper: Option<Arc<dyn Sweeper>>,
    oui: Option<Arc<OuiRegistry>>,
    scan_interval: Option<Duration>,
    scan_timeout: Option<Duration>,
}

impl EngineBuilder {
    /// The network interface to discover on. Required.
    pub fn interface(mut self, iface: InterfaceInfo) -> Self {
        self.iface = Some(iface);
        self
    }

    /// Add a discovery scanner. Order is preserved.
    pub fn scanner(mut self, scanner: Arc<dyn Scanner>) -> Self {
        self.scanners.push(scanner);
        self
    }

    /// Use an ARP cache sweeper. Strongly recommended alongside the ARP
    /// scanner.
    pub fn sweeper(mut self, sweeper: Arc<dyn Sweeper>) -> Self {
        self.sweeper = Some(sweeper);
        self
    }

    /// Enable manufacturer enrichment from MAC OUI prefixes.
    pub fn oui_registry(mut self, registry: Arc<OuiRegistry>) -> Self {
        self.oui = Some(registry);
        self
    }

    /// Interval between scan starts under [`Engine::start`]. Zero means a
    /// single scan. Default 20 s.
    pub fn scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = Some(interval);
        self
    }

    /// Deadline applied to every scan cycle. Must be positive. Default 10 s.
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let iface = self.iface.ok_or(Error::NoInterface)?;
        if self.scanners.is_empty() && self.sweeper.is_none() {
            return Err(Error::NoScannersOrSweeper);
        }
        let scan_timeout = self.scan_timeout.unwrap_or(crate::DEFAULT_SCAN_TIMEOUT);
        if scan_timeout.is_zero() {
            return Err(Error::InvalidTimeout);
        }

        let (events_tx, events_rx) = mpsc::channel(crate::EVENT_BUFFER);
        Ok(Engine {
            iface,
            scanners: self.scanners,
            sweeper: self.sweeper,
            oui: self.oui,
            scan_interval: self.scan_interval.unwrap_or(crate::DEFAULT_SCAN_INTERVAL),
            scan_timeout,
            events_tx: Mutex::new(Some(events_tx)),
            state: Mutex::new(State {
                receiver: Some(events_rx),
                ..State::default()
            }),
        })
    }
}
