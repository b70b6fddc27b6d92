//! macOS / BSD ARP cache reader: parses `arp -an` output.

use super::{parse_mac, ArpEntry};
use crate::error::Result;
use std::net::IpAddr;

#[allow(dead_code)]
pub(super) async fn read_cache() -> Result<Vec<ArpEntry>> {
    let output = tokio::process::Command::new("arp")
        .arg("-an")
        .output()
        .await?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_output(&stdout))
}

/// Parse lines of the form
///
/// ```text
/// ? (192.168.1.1) at a4:2b:b0:c9:0:1 on en0 ifscope [ethernet]
/// ? (192.168.1.99) at (incomplete) on en0 ifscope [ethernet]
/// ```
///
/// Incomplete entries and anything without a parsable MAC are skipped.
/// `arp -an` prints no entry age.
fn parse_output(output: &str) -> Vec<ArpEntry> {
    let mut entries = Vec::new();
    for line in output.lines() {
        let Some(ip) = extract_between(line, '(', ')') else {
            continue;
        };
        let Ok(ip) = ip.parse::<IpAddr>() else {
            continue;
        };

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let mac = tokens
            .iter()
            .position(|&t| t == "at")
            .and_then(|i| tokens.get(i + 1))
            .and_then(|m| parse_mac(m));
        let Some(mac) = mac else {
            continue;
        };
        let Some(interface) = tokens
            .iter()
            .position(|&t| t == "on")
            .and_then(|i| tokens.get(i + 1))
        else {
            continue;
        };

        entries.push(ArpEntry {
            ip,
            mac,
            age: None,
            interface: interface.to_string(),
        });
    }
    entries
}

fn extract_between(line: &str, open: char, close: char) -> Option<&str> {
    let start = line.find(open)? + open.len_utf8();
    let end = line[start..].find(close)? + start;
    Some(&line[start..end])
}
