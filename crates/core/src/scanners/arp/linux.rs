//! Linux ARP cache reader: `/proc/net/arp`.

use super::{parse_mac, ArpEntry};
use crate::error::Result;
use std::net::IpAddr;

const PROC_NET_ARP: &str = "/proc/net/arp";

/// Flag value of entries the kernel is still resolving.
const ATF_INCOMPLETE: &str = "0x0";

#[allow(dead_code)]
pub(super) async fn read_cache() -> Result<Vec<ArpEntry>> {
    let table = tokio::fs::read_to_string(PROC_NET_ARP).await?;
    Ok(parse_table(&table))
}

/// Parse the kernel's fixed-column table:
///
/// ```text
/// IP address       HW type     Flags       HW address            Mask     Device
/// 192.168.1.1      0x1         0x2         aa:bb:cc:dd:ee:ff     *        eth0
/// ```
fn parse_table(table: &str) -> Vec<ArpEntry> {
    let mut entries = Vec::new();
    for line in table.lines().skip(1) {
        let columns: Vec<&str> = line.split_whitespace().collect();
        if columns.len() < 6 {
            continue;
        }
        if columns[2] == ATF_INCOMPLETE {
            continue;
        }
        let Ok(ip) = columns[0].parse::<IpAddr>() else {
            continue;
        };
        let Some(mac) = parse_mac(columns[3]) else {
            continue;
        };
        entries.push(ArpEntry {
            ip,
            mac,
            age: None,
            interface: columns[5].to_string(),
        });
    }
    entries
}
