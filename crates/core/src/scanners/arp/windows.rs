//! Windows ARP cache reader: `iphlpapi.dll!GetIpNetTable`.

use super::ArpEntry;
use crate::error::{Error, Result};
use crate::iface::InterfaceInfo;
use std::net::{IpAddr, Ipv4Addr};
use winapi::shared::winerror::{ERROR_INSUFFICIENT_BUFFER, NO_ERROR};
use winapi::um::iphlpapi::GetIpNetTable;

/// MIB_IPNETROW is exactly 24 bytes with no internal padding:
/// dwIndex(4) + dwPhysAddrLen(4) + bPhysAddr[8] + dwAddr(4) + dwType(4).
/// dwAddr holds the IPv4 address in network byte order.
const ROW_SIZE: usize = 24;

/// dwType values per the IP Helper documentation.
const TYPE_INVALID: u32 = 2;

pub(super) fn read_cache(iface: &InterfaceInfo) -> Result<Vec<ArpEntry>> {
    let buf = fetch_table()?;
    Ok(parse_table(&buf, iface))
}

/// Sized-call pattern: ask for the required size with a null buffer,
/// allocate, call again, and retry once if the table grew in between.
fn fetch_table() -> Result<Vec<u8>> {
    let mut size: u32 = 0;
    unsafe {
        GetIpNetTable(std::ptr::null_mut(), &mut size, 0);
    }
    if size == 0 {
        size = 15_000;
    }

    let mut buf = vec![0u8; size as usize];
    let mut ret = unsafe { GetIpNetTable(buf.as_mut_ptr().cast(), &mut size, 0) };
    if ret == ERROR_INSUFFICIENT_BUFFER {
        buf = vec![0u8; size as usize];
        ret = unsafe { GetIpNetTable(buf.as_mut_ptr().cast(), &mut size, 0) };
    }
    if ret != NO_ERROR {
        return Err(Error::Io(std::io::Error::other(format!(
            "GetIpNetTable failed with error code {ret}"
        ))));
    }
    Ok(buf)
}

fn parse_table(buf: &[u8], iface: &InterfaceInfo) -> Vec<ArpEntry> {
    if buf.len() < 4 {
        return Vec::new();
    }
    let num_entries = u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    let mut entries = Vec::new();
    for i in 0..num_entries {
        let offset = 4 + i * ROW_SIZE;
        let Some(row) = buf.get(offset..offset + ROW_SIZE) else {
            break;
        };

        let index = u32::from_ne_bytes([row[0], row[1], row[2], row[3]]);
        if index != iface.index {
            continue;
        }

        let phys_len = u32::from_ne_bytes([row[4], row[5], row[6], row[7]]) as usize;
        if phys_len != 6 {
            continue;
        }
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&row[8..14]);

        // The dword's in-memory bytes are the address octets in order.
        let ip = Ipv4Addr::new(row[16], row[17], row[18], row[19]);

        let row_type = u32::from_ne_bytes([row[20], row[21], row[22], row[23]]);
        if row_type == TYPE_INVALID {
            continue;
        }

        entries.push(ArpEntry {
            ip: IpAddr::V4(ip),
            mac,
            age: None,
            interface: iface.name.clone(),
        });
    }
    entries
}
