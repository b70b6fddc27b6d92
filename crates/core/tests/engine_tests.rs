//! Engine integration tests: lifecycle, event ordering, merging, and the
//! fixed-rate scheduling contract, driven by scripted in-memory scanners.

use async_trait::async_trait;
use lanscout_core::{
    Device, Engine, Error, Event, InterfaceInfo, OuiRegistry, Result, ScanContext, Scanner,
    SubnetV4,
};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn test_iface() -> InterfaceInfo {
    InterfaceInfo {
        name: "lo".to_string(),
        index: 1,
        ipv4: Ipv4Addr::LOCALHOST,
        subnet: SubnetV4::new(Ipv4Addr::new(127, 0, 0, 0), 8),
    }
}

/// Blueprint for one observation a scripted scanner emits per scan.
#[derive(Clone)]
struct DeviceSpec {
    ip: IpAddr,
    mac: Option<&'static str>,
    display_name: Option<&'static str>,
}

impl DeviceSpec {
    fn ip(ip: &str) -> Self {
        Self {
            ip: ip.parse().unwrap(),
            mac: None,
            display_name: None,
        }
    }

    fn mac(mut self, mac: &'static str) -> Self {
        self.mac = Some(mac);
        self
    }

    fn named(mut self, name: &'static str) -> Self {
        self.display_name = Some(name);
        self
    }
}

/// Emits a fixed set of observations each scan, optionally after a delay.
struct ScriptedScanner {
    name: &'static str,
    delay: Duration,
    devices: Vec<DeviceSpec>,
}

impl ScriptedScanner {
    fn new(name: &'static str, devices: Vec<DeviceSpec>) -> Self {
        Self {
            name,
            delay: Duration::ZERO,
            devices,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Scanner for ScriptedScanner {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn scan(&self, ctx: ScanContext, out: mpsc::Sender<Arc<Device>>) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
        for spec in &self.devices {
            let device = Arc::new(Device::new(spec.ip));
            if let Some(mac) = spec.mac {
                device.set_mac(mac);
            }
            if let Some(name) = spec.display_name {
                device.set_display_name(name);
            }
            device.add_source(self.name);
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

/// Always fails after emitting nothing.
struct BrokenScanner;

#[async_trait]
impl Scanner for BrokenScanner {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn scan(&self, _ctx: ScanContext, _out: mpsc::Sender<Arc<Device>>) -> Result<()> {
        Err(Error::MalformedPacket {
            protocol: "test",
            reason: "scripted failure".to_string(),
        })
    }
}

async fn next_event(events: &mut mpsc::Receiver<Event>) -> Option<Event> {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
}

/// Drain events until (and including) the first `ScanCompleted`.
async fn collect_one_scan(events: &mut mpsc::Receiver<Event>) -> Vec<Event> {
    let mut collected = Vec::new();
    loop {
        let event = next_event(events).await.expect("stream closed mid-scan");
        let done = matches!(event, Event::ScanCompleted(_));
        collected.push(event);
        if done {
            return collected;
        }
    }
}

#[tokio::test]
async fn lifecycle_events_bracket_the_stream() {
    let engine = Arc::new(
        Engine::builder()
            .interface(test_iface())
            .scanner(Arc::new(ScriptedScanner::new("a", vec![])))
            .scan_interval(Duration::ZERO)
            .build()
            .unwrap(),
    );

    let mut events = engine.start().unwrap();
    assert!(matches!(next_event(&mut events).await, Some(Event::EngineStarted)));

    let scan = collect_one_scan(&mut events).await;
    assert!(matches!(scan.first(), Some(Event::ScanStarted)));
    assert!(matches!(scan.last(), Some(Event::ScanCompleted(_))));

    engine.stop().await;

    let mut tail = Vec::new();
    while let Some(event) = events.recv().await {
        tail.push(event);
    }
    assert!(
        matches!(tail.last(), Some(Event::EngineStopped)),
        "EngineStopped must be the final event, got {:?}",
        tail.last().map(Event::kind)
    );
    // The stream is closed: recv keeps returning None.
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn observations_of_the_same_ip_merge_into_one_device() {
    let engine = Arc::new(
        Engine::builder()
            .interface(test_iface())
            .scanner(Arc::new(ScriptedScanner::new(
                "a",
                vec![
                    DeviceSpec::ip("10.0.0.2").mac("aa:bb:cc:dd:ee:ff"),
                    DeviceSpec::ip("10.0.0.9"),
                ],
            )))
            .scanner(Arc::new(ScriptedScanner::new(
                "b",
                vec![DeviceSpec::ip("10.0.0.2").named("host")],
            )))
            .scan_interval(Duration::ZERO)
            .build()
            .unwrap(),
    );

    let mut events = engine.start().unwrap();
    assert!(matches!(next_event(&mut events).await, Some(Event::EngineStarted)));
    let scan = collect_one_scan(&mut events).await;

    let discovered: Vec<Arc<Device>> = scan
        .iter()
        .filter_map(|e| match e {
            Event::DeviceDiscovered(d) => Some(Arc::clone(d)),
            _ => None,
        })
        .collect();
    assert_eq!(discovered.len(), 3, "one event per observation");

    let Some(Event::ScanCompleted(stats)) = scan.last() else {
        panic!("expected ScanCompleted last");
    };
    assert_eq!(stats.device_count, 2, "two distinct IPs");

    let merged = discovered
        .iter()
        .find(|d| d.ip() == "10.0.0.2".parse::<IpAddr>().unwrap())
        .unwrap();
    assert_eq!(merged.mac().as_deref(), Some("aa:bb:cc:dd:ee:ff"));
    assert_eq!(merged.display_name().as_deref(), Some("host"));
    let sources = merged.sources();
    assert!(sources.contains("a") && sources.contains("b"));

    // Every event for the same IP carries the same canonical pointer.
    let same_ip: Vec<&Arc<Device>> = discovered
        .iter()
        .filter(|d| d.ip() == "10.0.0.2".parse::<IpAddr>().unwrap())
        .collect();
    assert!(Arc::ptr_eq(same_ip[0], same_ip[1]));

    engine.stop().await;
}

#[tokio::test]
async fn scanner_failure_is_an_event_not_an_abort() {
    let engine = Arc::new(
        Engine::builder()
            .interface(test_iface())
            .scanner(Arc::new(BrokenScanner))
            .scanner(Arc::new(ScriptedScanner::new(
                "ok",
                vec![DeviceSpec::ip("10.0.0.5")],
            )))
            .scan_interval(Duration::ZERO)
            .build()
            .unwrap(),
    );

    let mut events = engine.start().unwrap();
    assert!(matches!(next_event(&mut events).await, Some(Event::EngineStarted)));
    let scan = collect_one_scan(&mut events).await;

    let errors: Vec<&Event> = scan.iter().filter(|e| matches!(e, Event::Error(_))).collect();
    assert_eq!(errors.len(), 1);
    if let Event::Error(err) = errors[0] {
        assert!(err.to_string().contains("broken"));
    }

    assert!(scan
        .iter()
        .any(|e| matches!(e, Event::DeviceDiscovered(d) if d.ip() == "10.0.0.5".parse::<IpAddr>().unwrap())));

    engine.stop().await;
}

#[tokio::test]
async fn manufacturer_is_enriched_from_the_oui_registry() {
    let registry = OuiRegistry::from_bytes(
        b"Registry,Assignment,Organization Name,Organization Address\nMA-L,AABBCC,Acme,\n",
    )
    .unwrap();

    let engine = Arc::new(
        Engine::builder()
            .interface(test_iface())
            .scanner(Arc::new(ScriptedScanner::new(
                "arp",
                vec![DeviceSpec::ip("10.0.0.2").mac("aa:bb:cc:dd:ee:ff")],
            )))
            .oui_registry(registry)
            .scan_interval(Duration::ZERO)
            .build()
            .unwrap(),
    );

    let mut events = engine.start().unwrap();
    assert!(matches!(next_event(&mut events).await, Some(Event::EngineStarted)));
    let scan = collect_one_scan(&mut events).await;

    let device = scan
        .iter()
        .find_map(|e| match e {
            Event::DeviceDiscovered(d) => Some(d),
            _ => None,
        })
        .unwrap();
    assert_eq!(device.manufacturer().as_deref(), Some("Acme"));

    engine.stop().await;
}

#[tokio::test]
async fn zero_interval_runs_exactly_one_scan() {
    let engine = Arc::new(
        Engine::builder()
            .interface(test_iface())
            .scanner(Arc::new(ScriptedScanner::new("a", vec![])))
            .scan_interval(Duration::ZERO)
            .build()
            .unwrap(),
    );

    let mut events = engine.start().unwrap();
    assert!(matches!(next_event(&mut events).await, Some(Event::EngineStarted)));
    collect_one_scan(&mut events).await;

    // No second scan starts even after generous waiting.
    let extra = timeout(Duration::from_millis(200), events.recv()).await;
    assert!(extra.is_err(), "unexpected event after single scan: {:?}",
        extra.ok().flatten().map(|e| e.kind().to_string()));

    engine.stop().await;
}

#[tokio::test]
async fn short_scans_keep_a_fixed_rate() {
    let interval = Duration::from_millis(80);
    let engine = Arc::new(
        Engine::builder()
            .interface(test_iface())
            .scanner(Arc::new(ScriptedScanner::new("fast", vec![])))
            .scan_interval(interval)
            .scan_timeout(Duration::from_secs(5))
            .build()
            .unwrap(),
    );

    let mut events = engine.start().unwrap();
    let mut starts = Vec::new();
    while starts.len() < 3 {
        match next_event(&mut events).await {
            Some(Event::ScanStarted) => starts.push(Instant::now()),
            Some(_) => {}
            None => panic!("stream closed early"),
        }
    }
    engine.stop().await;

    for pair in starts.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(
            gap >= Duration::from_millis(50) && gap <= Duration::from_millis(250),
            "scan-start gap {gap:?} strayed from the {interval:?} schedule"
        );
    }
}

#[tokio::test]
async fn long_scans_run_back_to_back_without_overlap() {
    let scan_duration = Duration::from_millis(120);
    let engine = Arc::new(
        Engine::builder()
            .interface(test_iface())
            .scanner(Arc::new(
                ScriptedScanner::new("slow", vec![]).with_delay(scan_duration),
            ))
            .scan_interval(Duration::from_millis(30))
            .scan_timeout(Duration::from_secs(5))
            .build()
            .unwrap(),
    );

    let mut events = engine.start().unwrap();
    let mut sequence = Vec::new();
    let mut completed = 0;
    while completed < 3 {
        match next_event(&mut events).await {
            Some(event) => {
                if matches!(event, Event::ScanCompleted(_)) {
                    completed += 1;
                }
                sequence.push((event, Instant::now()));
            }
            None => panic!("stream closed early"),
        }
    }
    engine.stop().await;

    // Scans never overlap: Started and Completed strictly alternate.
    let mut in_scan = false;
    for (event, _) in &sequence {
        match event {
            Event::ScanStarted => {
                assert!(!in_scan, "ScanStarted while a scan was in flight");
                in_scan = true;
            }
            Event::ScanCompleted(_) => {
                assert!(in_scan, "ScanCompleted without a matching ScanStarted");
                in_scan = false;
            }
            _ => {}
        }
    }

    // Gaps track the scan duration, not the (shorter) interval.
    let starts: Vec<Instant> = sequence
        .iter()
        .filter_map(|(e, t)| matches!(e, Event::ScanStarted).then_some(*t))
        .collect();
    for pair in starts.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(
            gap >= Duration::from_millis(100),
            "back-to-back gap {gap:?} shorter than the scan duration"
        );
    }
}

#[tokio::test]
async fn many_observations_fan_in_without_loss() {
    let specs_a: Vec<DeviceSpec> = (1..=250)
        .map(|i| DeviceSpec::ip(&format!("10.1.{}.{}", i / 256, i % 256)))
        .collect();
    let specs_b: Vec<DeviceSpec> = (1..=250)
        .map(|i| DeviceSpec::ip(&format!("10.2.{}.{}", i / 256, i % 256)))
        .collect();

    let engine = Arc::new(
        Engine::builder()
            .interface(test_iface())
            .scanner(Arc::new(ScriptedScanner::new("a", specs_a)))
            .scanner(Arc::new(ScriptedScanner::new("b", specs_b)))
            .scan_interval(Duration::ZERO)
            .scan_timeout(Duration::from_secs(10))
            .build()
            .unwrap(),
    );

    // Use the synchronous entry point: the event buffer is smaller than the
    // observation count, but Scan returns the full merged inventory.
    let devices = engine.scan().await.unwrap();
    assert_eq!(devices.len(), 500);
}

#[tokio::test]
async fn synchronous_scan_returns_devices_without_start() {
    let engine = Engine::builder()
        .interface(test_iface())
        .scanner(Arc::new(ScriptedScanner::new(
            "a",
            vec![DeviceSpec::ip("10.0.0.2"), DeviceSpec::ip("10.0.0.3")],
        )))
        .build()
        .unwrap();

    let devices = engine.scan().await.unwrap();
    assert_eq!(devices.len(), 2);
    for device in devices {
        assert!(device.first_seen().is_some());
        assert!(device.first_seen() <= device.last_seen());
    }
}
