//! SSDP / UPnP scanner.
//!
//! Sends a single `M-SEARCH` multicast (HTTP over UDP, part of the UPnP
//! standard) and collects responses until the scan deadline. Smart TVs,
//! media servers, printers, and assorted IoT gear answer with HTTP-like
//! headers carrying a descriptor `LOCATION` and a `SERVER` string.

use crate::device::Device;
use crate::error::{Error, Result};
use crate::iface::InterfaceInfo;
use crate::scanner::{ScanContext, Scanner};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

const SSDP_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
const SSDP_PORT: u16 = 1900;

/// Seconds responders may spread their replies over (the MX header).
const SEARCH_MX: u8 = 2;
const MAX_DATAGRAM: usize = 8192;

/// Scanner sending an SSDP M-SEARCH and parsing the responses.
pub struct SsdpScanner {
    iface: InterfaceInfo,
}

impl SsdpScanner {
    pub fn new(iface: InterfaceInfo) -> Self {
        Self { iface }
    }
}

#[async_trait]
impl Scanner for SsdpScanner {
    fn name(&self) -> &'static str {
        "ssdp"
    }

    /// Send one M-SEARCH and read responses until the deadline. The scan
    /// context must carry a deadline: it bounds the response window (which
    /// should exceed MX + 1 second for full coverage).
    async fn scan(&self, ctx: ScanContext, out: mpsc::Sender<Arc<Device>>) -> Result<()> {
        if ctx.deadline().is_none() {
            return Err(Error::DeadlineRequired);
        }

        let socket = UdpSocket::bind(SocketAddr::from((self.iface.ipv4, 0))).await?;
        let target = SocketAddr::from((SSDP_GROUP, SSDP_PORT));

        debug!(to = %target, from = %socket.local_addr()?, "sending SSDP M-SEARCH");
        socket.send_to(build_search_request().as_bytes(), target).await?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                received = socket.recv_from(&mut buf) => {
                    let (len, src) = match received {
                        Ok(r) => r,
                        Err(err) => {
                            if ctx.is_cancelled() {
                                return Ok(());
                            }
                            return Err(err.into());
                        }
                    };
                    if let Some(device) = parse_response(Some(src.ip()), &buf[..len]) {
                        // Non-blocking: the engine sizes its fan-in channel
                        // to absorb bursts; a full channel drops the packet.
                        let _ = out.try_send(device);
                    }
                }
            }
        }
    }
}

fn build_search_request() -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {SSDP_GROUP}:{SSDP_PORT}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {SEARCH_MX}\r\n\
         ST: ssdp:all\r\n\
         USER-AGENT: {}\r\n\r\n",
        crate::USER_AGENT
    )
}

/// Parse one response datagram into a device.
///
/// The device IP comes from the datagram source when known, otherwise
/// from an IP literal in the `LOCATION` URL; with neither, the response
/// is dropped.
fn parse_response(src: Option<IpAddr>, payload: &[u8]) -> Option<Arc<Device>> {
    let (location, server) = parse_headers(payload);

    let ip = src.or_else(|| location.as_deref().and_then(ip_from_location))?;

    let device = Arc::new(Device::new(ip));
    device.add_source("ssdp");
    if let Some(server) = &server {
        device.set_display_name(server.clone());
        device.add_extra_data("server", server.clone());
    }
    if let Some(location) = &location {
        device.add_extra_data("location", location.clone());
    }
    Some(device)
}

/// Extract `Location` and `Server` from HTTP-like headers, case-insensitive
/// in the header names. The status line is skipped; parsing stops at the
/// first blank line (one is implied at end-of-payload if missing).
fn parse_headers(payload: &[u8]) -> (Option<String>, Option<String>) {
    let text = String::from_utf8_lossy(payload);
    let mut location = None;
    let mut server = None;

    for line in text.lines().skip(1) {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        if name.trim().eq_ignore_ascii_case("location") {
            location.get_or_insert_with(|| value.to_string());
        } else if name.trim().eq_ignore_ascii_case("server") {
            server.get_or_insert_with(|| value.to_string());
        }
    }

    (location, server)
}

/// IP literal from a Location URL's host, if it has one.
fn ip_from_location(location: &str) -> Option<IpAddr> {
    let url = Url::parse(location).ok()?;
    url.host_str()?.trim_matches(['[', ']']).parse().ok()
}
