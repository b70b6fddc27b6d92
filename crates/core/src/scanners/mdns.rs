//! mDNS / DNS-SD scanner.
//!
//! Performs multicast DNS service discovery on the local segment: queries
//! the meta service `_services._dns-sd._udp.local.`, then fans out PTR
//! queries for every service type it learns about. PTR answers become
//! devices named after the advertised instance; SRV and TXT additionals
//! refine the name and carry metadata (manufacturer, MAC, free-form keys).
//!
//! mDNS is lossy by design, so queries are repeated: the meta query three
//! times at startup, then everything again on a short ticker while the
//! scan runs.

use crate::device::Device;
use crate::error::Result;
use crate::iface::InterfaceInfo;
use crate::scanner::{ScanContext, Scanner};
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use trust_dns_proto::op::{Message, MessageType, OpCode, Query};
use trust_dns_proto::rr::{DNSClass, Name, RData, RecordType};

const META_QUERY: &str = "_services._dns-sd._udp.local.";
const MDNS_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
const MDNS_PORT: u16 = 5353;
const MAX_PACKET: usize = 16384;

/// Read timeout doubling as the cancellation checkpoint.
const READ_TIMEOUT: Duration = Duration::from_millis(100);
const REQUERY_INTERVAL: Duration = Duration::from_millis(300);

/// Scanner performing multicast DNS service discovery.
pub struct MdnsScanner {
    iface: InterfaceInfo,
}

impl MdnsScanner {
    pub fn new(iface: InterfaceInfo) -> Self {
        Self { iface }
    }
}

#[async_trait]
impl Scanner for MdnsScanner {
    fn name(&self) -> &'static str {
        "mdns"
    }

    async fn scan(&self, ctx: ScanContext, out: mpsc::Sender<Arc<Device>>) -> Result<()> {
        let socket = Arc::new(UdpSocket::from_std(open_multicast_socket(&self.iface)?)?);
        let target = SocketAddr::from((MDNS_GROUP, MDNS_PORT));
        let state = Arc::new(Mutex::new(SessionState::default()));

        // Initial burst: mDNS packets get dropped, three spaced queries
        // survive typical loss.
        let meta = build_ptr_query(META_QUERY)?;
        for i in 0..3 {
            socket.send_to(&meta, target).await?;
            if i < 2 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }

        spawn_requery_ticker(
            Arc::clone(&socket),
            Arc::clone(&state),
            ctx.clone(),
            target,
        );

        let mut buf = vec![0u8; MAX_PACKET];
        loop {
            if ctx.is_cancelled() {
                return Ok(());
            }
            match tokio::time::timeout(READ_TIMEOUT, socket.recv_from(&mut buf)).await {
                // Timeouts are normal; they are the point where we notice
                // cancellation.
                Err(_elapsed) => continue,
                Ok(Err(err)) => {
                    if ctx.is_cancelled() {
                        return Ok(());
                    }
                    return Err(err.into());
                }
                Ok(Ok((len, sender))) => {
                    let Ok(msg) = Message::from_vec(&buf[..len]) else {
                        continue;
                    };
                    let new_types = {
                        let mut state = state.lock().unwrap();
                        state.handle_message(&msg, sender.ip(), &out)
                    };
                    for service in new_types {
                        debug!(%service, "discovered mDNS service type");
                        if let Ok(packet) = build_ptr_query(&service) {
                            for i in 0..3 {
                                let _ = socket.send_to(&packet, target).await;
                                if i < 2 {
                                    tokio::time::sleep(Duration::from_millis(20)).await;
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Re-sends the meta query and all known service-type queries on a short
/// cadence while the scan is active.
fn spawn_requery_ticker(
    socket: Arc<UdpSocket>,
    state: Arc<Mutex<SessionState>>,
    ctx: ScanContext,
    target: SocketAddr,
) {
    tokio::spawn(async move {
        let Ok(meta) = build_ptr_query(META_QUERY) else {
            return;
        };
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return,
                _ = tokio::time::sleep(REQUERY_INTERVAL) => {}
            }

            // Twice per tick, slightly spaced, for loss resilience.
            let _ = socket.send_to(&meta, target).await;
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = socket.send_to(&meta, target).await;

            let services: Vec<String> = {
                let state = state.lock().unwrap();
                state.service_types.iter().cloned().collect()
            };
            for service in services {
                if let Ok(packet) = build_ptr_query(&service) {
                    let _ = socket.send_to(&packet, target).await;
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    let _ = socket.send_to(&packet, target).await;
                }
            }
        }
    });
}

/// Per-scan bookkeeping: service types already queried and announcements
/// already reported.
#[derive(Default)]
struct SessionState {
    service_types: HashSet<String>,
    reported: HashSet<String>,
}

impl SessionState {
    /// Process one DNS message. Emits devices on `out` (non-blocking) and
    /// returns service types seen for the first time, which the caller
    /// should query.
    fn handle_message(
        &mut self,
        msg: &Message,
        sender: IpAddr,
        out: &mpsc::Sender<Arc<Device>>,
    ) -> Vec<String> {
        if msg.message_type() != MessageType::Response {
            return Vec::new();
        }

        let mut new_types = Vec::new();
        for answer in msg.answers() {
            let Some(RData::PTR(ptr)) = answer.data() else {
                continue;
            };
            let service_name = answer.name().to_utf8();
            let ptr_value = ptr.0.to_utf8();

            if service_name == META_QUERY {
                // A service type announcement, e.g. "_http._tcp.local."
                if self.service_types.insert(ptr_value.clone()) {
                    new_types.push(ptr_value);
                }
            } else {
                // An instance announcement, e.g. "Speaker._http._tcp.local."
                self.report_instance(sender, &ptr_value, out);
            }
        }

        self.extract_details(msg.additionals(), sender, out);
        new_types
    }

    fn report_instance(&mut self, sender: IpAddr, ptr_value: &str, out: &mpsc::Sender<Arc<Device>>) {
        let key = format!("{sender}-{ptr_value}");
        if self.reported.contains(&key) {
            return;
        }

        let device = Arc::new(Device::new(sender));
        device.set_display_name(clean_name(ptr_value));
        device.add_source("mdns");

        if out.try_send(device).is_ok() {
            self.reported.insert(key);
        }
    }

    /// SRV records carry a better display name (the target host); TXT
    /// records carry key=value metadata.
    fn extract_details(
        &mut self,
        records: &[trust_dns_proto::rr::Record],
        sender: IpAddr,
        out: &mpsc::Sender<Arc<Device>>,
    ) {
        if records.is_empty() {
            return;
        }

        let device = Arc::new(Device::new(sender));
        device.add_source("mdns");

        for record in records {
            match record.data() {
                Some(RData::SRV(srv)) => {
                    device.set_display_name(clean_name(&srv.target().to_utf8()));
                }
                Some(RData::TXT(txt)) => {
                    parse_txt_records(txt.txt_data(), &device);
                }
                _ => {}
            }
        }

        if device.display_name().is_some() {
            let _ = out.try_send(device);
        } else {
            trace!(%sender, "mDNS additionals carried no display name, skipping");
        }
    }
}

/// Extract device details from TXT key=value pairs (RFC 6763 §6.3).
/// Recognised keys map onto device fields; everything else lands in
/// extra data, with bare tokens recorded as `"true"`.
fn parse_txt_records(texts: &[Box<[u8]>], device: &Device) {
    for text in texts {
        let text = String::from_utf8_lossy(text);
        match text.find('=') {
            Some(idx) if idx > 0 => {
                let key = text[..idx].to_lowercase();
                let value = &text[idx + 1..];
                match key.as_str() {
                    "manufacturer" => device.set_manufacturer(value),
                    "mac" => device.set_mac(value),
                    "md" => device.set_display_name(value),
                    _ => device.add_extra_data(key, value),
                }
            }
            _ => device.add_extra_data(text.to_string(), "true"),
        }
    }
}

fn build_ptr_query(service: &str) -> Result<Vec<u8>> {
    let mut msg = Message::new();
    msg.set_id(0)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(false);
    let mut query = Query::query(Name::from_ascii(service)?, RecordType::PTR);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    Ok(msg.to_vec()?)
}

/// Bind to the interface's IPv4 address on an ephemeral port and join the
/// mDNS group on that interface. Reuse flags let us coexist with a local
/// mDNS responder.
fn open_multicast_socket(iface: &InterfaceInfo) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddr::from((iface.ipv4, 0)).into())?;
    socket.join_multicast_v4(&MDNS_GROUP, &iface.ipv4)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Strip the `.local.` suffix and any trailing dot from an mDNS name.
fn clean_name(name: &str) -> String {
    let name = name.strip_suffix(".local.").unwrap_or(name);
    name.strip_suffix('.').unwrap_or(name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use trust_dns_proto::rr::rdata::{PTR, SRV, TXT};
    use trust_dns_proto::rr::Record;

    fn name(s: &str) -> Name {
        // `Name::from_ascii` enforces hostname-safe characters, but real mDNS
        // instance names (e.g. "Living Room Speaker._http._tcp.local.") can
        // contain spaces; build labels from raw bytes to allow that.
        let trimmed = s.strip_suffix('.').unwrap_or(s);
        Name::from_labels(trimmed.split('.').map(|label| label.as_bytes())).unwrap()
    }

    fn response_with_ptr(owner: &str, value: &str) -> Message {
        let mut msg = Message::new();
        msg.set_message_type(MessageType::Response);
        msg.add_answer(Record::from_rdata(
            name(owner),
            120,
            RData::PTR(PTR(name(value))),
        ));
        msg
    }

    fn channel() -> (mpsc::Sender<Arc<Device>>, mpsc::Receiver<Arc<Device>>) {
        mpsc::channel(16)
    }

    #[test]
    fn clean_name_strips_local_suffix_and_trailing_dot() {
        assert_eq!(clean_name("My Printer._ipp._tcp.local."), "My Printer._ipp._tcp");
        assert_eq!(clean_name("host.local."), "host");
        assert_eq!(clean_name("plain."), "plain");
        assert_eq!(clean_name("plain"), "plain");
        for s in ["speaker", "a.b", "x._http._tcp"] {
            let suffixed = format!("{s}.local.");
            assert_eq!(clean_name(&suffixed), clean_name(s));
            assert!(!clean_name(&suffixed).ends_with('.'));
        }
    }

    #[test]
    fn meta_answer_records_new_service_type_once() {
        let mut state = SessionState::default();
        let (tx, _rx) = channel();
        let msg = response_with_ptr(META_QUERY, "_http._tcp.local.");

        let first = state.handle_message(&msg, "10.0.0.5".parse().unwrap(), &tx);
        assert_eq!(first, vec!["_http._tcp.local.".to_string()]);

        let second = state.handle_message(&msg, "10.0.0.5".parse().unwrap(), &tx);
        assert!(second.is_empty());
    }

    #[test]
    fn instance_answer_emits_device_once_per_scan() {
        let mut state = SessionState::default();
        let (tx, mut rx) = channel();
        let sender: IpAddr = "10.0.0.7".parse().unwrap();
        let msg = response_with_ptr("_http._tcp.local.", "Living Room Speaker._http._tcp.local.");

        state.handle_message(&msg, sender, &tx);
        state.handle_message(&msg, sender, &tx);
        drop(tx);

        let device = rx.try_recv().unwrap();
        assert_eq!(device.ip(), sender);
        assert_eq!(
            device.display_name().as_deref(),
            Some("Living Room Speaker._http._tcp")
        );
        assert!(device.sources().contains("mdns"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn queries_are_ignored() {
        let mut state = SessionState::default();
        let (tx, mut rx) = channel();
        let mut msg = response_with_ptr("_http._tcp.local.", "Thing._http._tcp.local.");
        msg.set_message_type(MessageType::Query);
        let new = state.handle_message(&msg, "10.0.0.7".parse().unwrap(), &tx);
        assert!(new.is_empty());
        drop(tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn additionals_yield_srv_name_and_txt_metadata() {
        let mut state = SessionState::default();
        let (tx, mut rx) = channel();
        let sender: IpAddr = "10.0.0.9".parse().unwrap();

        let mut msg = Message::new();
        msg.set_message_type(MessageType::Response);
        msg.add_additional(Record::from_rdata(
            name("Printer._ipp._tcp.local."),
            120,
            RData::SRV(SRV::new(0, 0, 631, name("printer.local."))),
        ));
        msg.add_additional(Record::from_rdata(
            name("Printer._ipp._tcp.local."),
            120,
            RData::TXT(TXT::new(vec![
                "manufacturer=Acme".to_string(),
                "mac=aa:bb:cc:dd:ee:ff".to_string(),
                "ty=LaserPro 3000".to_string(),
                "paused".to_string(),
            ])),
        ));

        state.handle_message(&msg, sender, &tx);
        drop(tx);

        let device = rx.try_recv().unwrap();
        assert_eq!(device.display_name().as_deref(), Some("printer"));
        assert_eq!(device.manufacturer().as_deref(), Some("Acme"));
        assert_eq!(device.mac().as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        let extra = device.extra_data();
        assert_eq!(extra.get("ty").map(String::as_str), Some("LaserPro 3000"));
        assert_eq!(extra.get("paused").map(String::as_str), Some("true"));
    }

    #[test]
    fn txt_md_key_overrides_srv_display_name() {
        let mut state = SessionState::default();
        let (tx, mut rx) = channel();

        let mut msg = Message::new();
        msg.set_message_type(MessageType::Response);
        msg.add_additional(Record::from_rdata(
            name("x._airplay._tcp.local."),
            120,
            RData::SRV(SRV::new(0, 0, 7000, name("cryptic-host-1234.local."))),
        ));
        msg.add_additional(Record::from_rdata(
            name("x._airplay._tcp.local."),
            120,
            RData::TXT(TXT::new(vec!["md=Living Room TV".to_string()])),
        ));

        state.handle_message(&msg, "10.0.0.3".parse().unwrap(), &tx);
        drop(tx);

        let device = rx.try_recv().unwrap();
        assert_eq!(device.display_name().as_deref(), Some("Living Room TV"));
    }

    #[test]
    fn additionals_without_name_are_not_emitted() {
        let mut state = SessionState::default();
        let (tx, mut rx) = channel();

        let mut msg = Message::new();
        msg.set_message_type(MessageType::Response);
        msg.add_additional(Record::from_rdata(
            name("x._http._tcp.local."),
            120,
            RData::TXT(TXT::new(vec!["path=/".to_string()])),
        ));

        state.handle_message(&msg, "10.0.0.4".parse().unwrap(), &tx);
        drop(tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn ptr_query_round_trips_through_the_wire_format() {
        let packet = build_ptr_query(META_QUERY).unwrap();
        let msg = Message::from_vec(&packet).unwrap();
        assert_eq!(msg.id(), 0);
        assert!(!msg.recursion_desired());
        assert_eq!(msg.queries().len(), 1);
        assert_eq!(msg.queries()[0].query_type(), RecordType::PTR);
        assert_eq!(msg.queries()[0].name().to_utf8(), META_QUERY);
    }
}
