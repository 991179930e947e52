//! Per-window flow and port bookkeeping.
//!
//! Flows are directional: the 5-tuple is taken exactly as it appears on the
//! wire, so each half of a conversation is its own flow. Port aggregation
//! keys on the destination port only, which carries the service identity.

use crate::protocol::{Decoded, L4Proto};
use ahash::AHashMap;
use serde::Serialize;
use std::net::{IpAddr, Ipv6Addr};

/// Directional flow identity. Ordering is lexicographic over the tuple and
/// only used as the final top-K tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey {
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
    pub protocol: L4Proto,
}

impl FlowKey {
    /// Key a decoded packet. Packets without addresses (non-IP frames) fall
    /// into a single unspecified-address flow; non-port protocols use 0.
    pub fn from_decoded(decoded: &Decoded) -> Self {
        let unspecified = IpAddr::V6(Ipv6Addr::UNSPECIFIED);
        let (src_port, dst_port) = match decoded.l4 {
            L4Proto::Tcp | L4Proto::Udp => (
                decoded.src_port.unwrap_or(0),
                decoded.dst_port.unwrap_or(0),
            ),
            _ => (0, 0),
        };
        FlowKey {
            src_ip: decoded.src_ip.unwrap_or(unspecified),
            src_port,
            dst_ip: decoded.dst_ip.unwrap_or(unspecified),
            dst_port,
            protocol: decoded.l4,
        }
    }
}

/// Running totals for one flow within one window.
#[derive(Debug, Clone, Copy)]
pub struct FlowAgg {
    pub pkts: u64,
    pub bytes: u64,
    pub first_ts: f64,
    pub last_ts: f64,
}

impl FlowAgg {
    pub fn open(ts: f64, bytes: u64) -> Self {
        FlowAgg {
            pkts: 1,
            bytes,
            first_ts: ts,
            last_ts: ts,
        }
    }

    pub fn update(&mut self, ts: f64, bytes: u64) {
        self.pkts += 1;
        self.bytes += bytes;
        self.last_ts = ts;
    }
}

/// Destination-port identity, TCP/UDP only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortKey {
    pub port: u16,
    pub protocol: L4Proto,
}

/// Running totals for one destination port within one window.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortAgg {
    pub pkts: u64,
    pub bytes: u64,
}

/// One of the window's largest flows, as emitted in `WindowRecord`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopFlow {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: String,
    pub packet_count: u64,
    pub total_bytes: u64,
    pub duration_seconds: f64,
    pub start_timestamp: f64,
    pub end_timestamp: f64,
}

/// One of the window's busiest destination ports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopPort {
    pub port: u16,
    pub protocol: String,
    pub packet_count: u64,
    pub total_bytes: u64,
}

/// Deterministic top-K flows: bytes desc, then pkts desc, then the 5-tuple
/// lexicographically. The tie-break chain makes the ordering total.
pub fn select_top_flows(flows: &AHashMap<FlowKey, FlowAgg>, k: usize) -> Vec<TopFlow> {
    if k == 0 {
        return Vec::new();
    }
    let mut entries: Vec<(&FlowKey, &FlowAgg)> = flows.iter().collect();
    entries.sort_unstable_by(|a, b| {
        b.1.bytes
            .cmp(&a.1.bytes)
            .then_with(|| b.1.pkts.cmp(&a.1.pkts))
            .then_with(|| a.0.cmp(b.0))
    });
    entries
        .into_iter()
        .take(k)
        .map(|(key, agg)| TopFlow {
            src_ip: key.src_ip,
            dst_ip: key.dst_ip,
            src_port: key.src_port,
            dst_port: key.dst_port,
            protocol: key.protocol.to_string(),
            packet_count: agg.pkts,
            total_bytes: agg.bytes,
            duration_seconds: (agg.last_ts - agg.first_ts).max(0.0),
            start_timestamp: agg.first_ts,
            end_timestamp: agg.last_ts,
        })
        .collect()
}

/// Deterministic top-K ports: bytes desc, pkts desc, then (port, protocol).
pub fn select_top_ports(ports: &AHashMap<PortKey, PortAgg>, k: usize) -> Vec<TopPort> {
    if k == 0 {
        return Vec::new();
    }
    let mut entries: Vec<(&PortKey, &PortAgg)> = ports.iter().collect();
    entries.sort_unstable_by(|a, b| {
        b.1.bytes
            .cmp(&a.1.bytes)
            .then_with(|| b.1.pkts.cmp(&a.1.pkts))
            .then_with(|| a.0.cmp(b.0))
    });
    entries
        .into_iter()
        .take(k)
        .map(|(key, agg)| TopPort {
            port: key.port,
            protocol: key.protocol.to_string(),
            packet_count: agg.pkts,
            total_bytes: agg.bytes,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn key(last_octet: u8, src_port: u16) -> FlowKey {
        FlowKey {
            src_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)),
            src_port,
            dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 200)),
            dst_port: 443,
            protocol: L4Proto::Tcp,
        }
    }

    fn agg(pkts: u64, bytes: u64) -> FlowAgg {
        FlowAgg {
            pkts,
            bytes,
            first_ts: 1.0,
            last_ts: 2.5,
        }
    }

    #[test]
    fn top_flows_order_by_bytes_then_pkts_then_key() {
        let mut flows = AHashMap::new();
        flows.insert(key(3, 1000), agg(5, 1000));
        flows.insert(key(1, 1000), agg(5, 1000));
        flows.insert(key(2, 1000), agg(9, 1000));
        flows.insert(key(4, 1000), agg(50, 500));

        let top = select_top_flows(&flows, 3);
        assert_eq!(top.len(), 3);
        // 1000-byte flows first; among them the 9-pkt one, then key order.
        assert_eq!(top[0].packet_count, 9);
        assert_eq!(top[1].src_ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(top[2].src_ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3)));
    }

    #[test]
    fn top_ports_tie_break_on_port_number() {
        let mut ports = AHashMap::new();
        for port in [8080u16, 80, 443] {
            ports.insert(
                PortKey {
                    port,
                    protocol: L4Proto::Tcp,
                },
                PortAgg { pkts: 10, bytes: 900 },
            );
        }
        let top = select_top_ports(&ports, 2);
        assert_eq!(top[0].port, 80);
        assert_eq!(top[1].port, 443);
    }

    #[test]
    fn zero_k_selects_nothing() {
        let flows: AHashMap<FlowKey, FlowAgg> = AHashMap::new();
        assert!(select_top_flows(&flows, 0).is_empty());
    }

    #[test]
    fn icmp_key_has_zero_ports() {
        let decoded = Decoded {
            ts_seconds: 0.0,
            size: 64,
            l3: crate::protocol::L3Proto::V4,
            src_ip: Some(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1))),
            dst_ip: Some(IpAddr::V4(Ipv4Addr::new(2, 2, 2, 2))),
            l4: L4Proto::Icmp,
            src_port: None,
            dst_port: None,
            tcp_flags: None,
            tcp_seq: None,
            payload_len: 0,
            malformed: false,
        };
        let key = FlowKey::from_decoded(&decoded);
        assert_eq!(key.src_port, 0);
        assert_eq!(key.dst_port, 0);
        assert_eq!(key.protocol, L4Proto::Icmp);
    }
}
