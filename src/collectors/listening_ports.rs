//! Listening-ports snapshot collector.
//! Reads the kernel socket tables under `/proc/net` for each supported
//! protocol and emits one periodic event whose payload lists every socket.
//! Addresses in those tables are little-endian hex, ports big-endian hex.

use std::fs;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;

use log::debug;
use serde_json::{json, Value};

use crate::consts::PROTOCOL_TYPES;
use crate::events::{build_event, EventCategory};

use super::{CollectorError, EventCollector};

pub const LISTENING_PORTS_EVENT_NAME: &str = "ListeningPorts";

pub struct ListeningPortsCollector {
    proc_net_root: PathBuf,
}

impl ListeningPortsCollector {
    pub fn new() -> Self {
        Self {
            proc_net_root: PathBuf::from("/proc/net"),
        }
    }

    #[cfg(test)]
    fn with_root(root: PathBuf) -> Self {
        Self {
            proc_net_root: root,
        }
    }
}

impl Default for ListeningPortsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl EventCollector for ListeningPortsCollector {
    fn event_name(&self) -> &'static str {
        LISTENING_PORTS_EVENT_NAME
    }

    fn category(&self) -> EventCategory {
        EventCategory::Periodic
    }

    fn collect(&mut self) -> Result<Vec<Vec<u8>>, CollectorError> {
        let mut rows = Vec::new();
        for protocol in PROTOCOL_TYPES {
            let path = self.proc_net_root.join(protocol);
            let table = match fs::read_to_string(&path) {
                Ok(table) => table,
                Err(err) => {
                    // Not every kernel exposes every table (raw6 is optional).
                    debug!("cannot read {}: {err}", path.display());
                    continue;
                }
            };
            rows.extend(parse_socket_table(&table, protocol));
        }

        let event = build_event(
            LISTENING_PORTS_EVENT_NAME,
            EventCategory::Periodic,
            false,
            rows,
        )?;
        Ok(vec![event])
    }
}

/// Parses one `/proc/net/<protocol>` table into payload rows.
fn parse_socket_table(table: &str, protocol: &str) -> Vec<Value> {
    table
        .lines()
        .skip(1) // header
        .filter_map(|line| parse_socket_line(line, protocol))
        .collect()
}

fn parse_socket_line(line: &str, protocol: &str) -> Option<Value> {
    let mut fields = line.split_whitespace();
    let _slot = fields.next()?;
    let local = fields.next()?;
    let remote = fields.next()?;

    let (local_address, local_port) = parse_endpoint(local)?;
    let (remote_address, remote_port) = parse_endpoint(remote)?;

    Some(json!({
        "Protocol": protocol,
        "LocalAddress": local_address,
        "LocalPort": local_port.to_string(),
        "RemoteAddress": remote_address,
        // A zero remote port means nothing is connected yet.
        "RemotePort": if remote_port == 0 { "*".to_string() } else { remote_port.to_string() },
    }))
}

/// Splits a `ADDRESS:PORT` hex endpoint.
fn parse_endpoint(text: &str) -> Option<(String, u16)> {
    let (address_hex, port_hex) = text.rsplit_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;
    let address = match address_hex.len() {
        8 => {
            let raw = u32::from_str_radix(address_hex, 16).ok()?;
            // Stored little-endian.
            Ipv4Addr::from(raw.swap_bytes()).to_string()
        }
        32 => {
            let mut octets = [0u8; 16];
            // Four little-endian 32-bit groups.
            for (group, chunk) in octets.chunks_exact_mut(4).enumerate() {
                let start = group * 8;
                let raw = u32::from_str_radix(&address_hex[start..start + 8], 16).ok()?;
                chunk.copy_from_slice(&raw.swap_bytes().to_be_bytes());
            }
            Ipv6Addr::from(octets).to_string()
        }
        _ => return None,
    };
    Some((address, port))
}
