//! Link/network/transport decoding: one `Packet` in, one flat `Decoded`
//! record out. Decoding never fails outward; frames that cannot be parsed
//! degrade to length-only records so the window engine still accounts for
//! every packet.

pub mod ethernet;
pub mod ipv4;
pub mod ipv6;
pub mod tcp;
pub mod udp;

use crate::source::{Packet, LINKTYPE_ETHERNET};
use ethernet::{ether_type, EthernetFrame};
use std::fmt;
use std::net::IpAddr;

/// IP protocol numbers the engine buckets by name.
const PROTO_ICMP: u8 = 1;
const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;
const PROTO_ICMPV6: u8 = 58;

/// Errors from header parsing. These stay inside the decoder; callers see a
/// degraded `Decoded`, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Not enough bytes for the header.
    TooShort { expected: usize, actual: usize },
    /// Header fields are structurally invalid.
    InvalidHeader(&'static str),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::TooShort { expected, actual } => {
                write!(f, "header too short: need {} bytes, got {}", expected, actual)
            }
            ParseError::InvalidHeader(reason) => write!(f, "invalid header: {}", reason),
        }
    }
}

impl std::error::Error for ParseError {}

/// Network-layer classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L3Proto {
    V4,
    V6,
    Other,
}

/// Transport-layer classification. `Other` carries the raw protocol number
/// (0 when there was no IP layer at all).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum L4Proto {
    Tcp,
    Udp,
    Icmp,
    Other(u8),
}

impl fmt::Display for L4Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            L4Proto::Tcp => write!(f, "TCP"),
            L4Proto::Udp => write!(f, "UDP"),
            L4Proto::Icmp => write!(f, "ICMP"),
            L4Proto::Other(n) => write!(f, "PROTO({})", n),
        }
    }
}

/// One decoded packet: everything the window engine reads, nothing it
/// doesn't. Fields absent from the frame stay `None`.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub ts_seconds: f64,
    /// Original length on the wire.
    pub size: u32,
    pub l3: L3Proto,
    pub src_ip: Option<IpAddr>,
    pub dst_ip: Option<IpAddr>,
    pub l4: L4Proto,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    /// Raw TCP flag byte, TCP only.
    pub tcp_flags: Option<u8>,
    /// TCP sequence number, used by the duplicate-segment heuristic.
    pub tcp_seq: Option<u32>,
    /// Transport payload length in bytes.
    pub payload_len: u32,
    /// Set when the frame was truncated or structurally unparseable; such
    /// packets count as `other` and bump the engine's decode-error counter.
    pub malformed: bool,
}

impl Decoded {
    /// Length-only record for frames the decoder cannot see into.
    fn opaque(ts_seconds: f64, size: u32, malformed: bool) -> Self {
        Decoded {
            ts_seconds,
            size,
            l3: L3Proto::Other,
            src_ip: None,
            dst_ip: None,
            l4: L4Proto::Other(0),
            src_port: None,
            dst_port: None,
            tcp_flags: None,
            tcp_seq: None,
            payload_len: 0,
            malformed,
        }
    }
}

/// Decode one captured packet. Non-Ethernet link types and non-IP frames
/// come back as length-only records; truncated frames are additionally
/// flagged `malformed`.
pub fn decode(packet: &Packet, link_type: u32) -> Decoded {
    if link_type != LINKTYPE_ETHERNET {
        return Decoded::opaque(packet.ts_seconds, packet.wire_len, false);
    }
    match decode_frame(&packet.link_frame, packet.ts_seconds, packet.wire_len) {
        Ok(decoded) => decoded,
        Err(_) => Decoded::opaque(packet.ts_seconds, packet.wire_len, true),
    }
}

fn decode_frame(data: &[u8], ts_seconds: f64, size: u32) -> Result<Decoded, ParseError> {
    let eth = EthernetFrame::parse(data)?;
    let mut remaining = eth.payload();
    let mut ethertype = eth.ether_type();

    // 802.1Q / 802.1ad tags; bounded at two so a garbage frame cannot loop.
    let mut vlan_depth = 0;
    while (ethertype == ether_type::VLAN || ethertype == ether_type::QINQ) && vlan_depth < 2 {
        if remaining.len() < 4 {
            return Err(ParseError::TooShort {
                expected: 4,
                actual: remaining.len(),
            });
        }
        ethertype = u16::from_be_bytes([remaining[2], remaining[3]]);
        remaining = &remaining[4..];
        vlan_depth += 1;
    }

    match ethertype {
        ether_type::IPV4 => {
            let ip = ipv4::Ipv4Header::parse(remaining)?;
            let mut decoded = Decoded::opaque(ts_seconds, size, false);
            decoded.l3 = L3Proto::V4;
            decoded.src_ip = Some(IpAddr::V4(ip.src_addr()));
            decoded.dst_ip = Some(IpAddr::V4(ip.dst_addr()));
            let proto = ip.protocol();
            if ip.fragment_offset() != 0 {
                // Non-first fragment: no transport header to read.
                decoded.l4 = L4Proto::Other(proto);
                decoded.payload_len = ip.payload().len() as u32;
                return Ok(decoded);
            }
            fill_transport(&mut decoded, proto, ip.payload())?;
            Ok(decoded)
        }
        ether_type::IPV6 => {
            let ip = ipv6::Ipv6Header::parse(remaining)?;
            let mut decoded = Decoded::opaque(ts_seconds, size, false);
            decoded.l3 = L3Proto::V6;
            decoded.src_ip = Some(IpAddr::V6(ip.src_addr()));
            decoded.dst_ip = Some(IpAddr::V6(ip.dst_addr()));
            fill_transport(&mut decoded, ip.next_header(), ip.payload())?;
            Ok(decoded)
        }
        // ARP, MPLS, LLDP, anything else: length-only, not an error.
        _ => Ok(Decoded::opaque(ts_seconds, size, false)),
    }
}

fn fill_transport(decoded: &mut Decoded, proto: u8, l4_data: &[u8]) -> Result<(), ParseError> {
    match proto {
        PROTO_TCP => {
            let hdr = tcp::TcpHeader::parse(l4_data)?;
            decoded.l4 = L4Proto::Tcp;
            decoded.src_port = Some(hdr.src_port());
            decoded.dst_port = Some(hdr.dst_port());
            decoded.tcp_flags = Some(hdr.flags_raw());
            decoded.tcp_seq = Some(hdr.sequence_number());
            decoded.payload_len = hdr.payload().len() as u32;
        }
        PROTO_UDP => {
            let hdr = udp::UdpHeader::parse(l4_data)?;
            decoded.l4 = L4Proto::Udp;
            decoded.src_port = Some(hdr.src_port());
            decoded.dst_port = Some(hdr.dst_port());
            decoded.payload_len = hdr.payload().len() as u32;
        }
        PROTO_ICMP | PROTO_ICMPV6 => {
            decoded.l4 = L4Proto::Icmp;
            decoded.payload_len = l4_data.len() as u32;
        }
        other => {
            decoded.l4 = L4Proto::Other(other);
            decoded.payload_len = l4_data.len() as u32;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Packet;
    use std::net::Ipv4Addr;

    fn build_tcp_frame(
        src_ip: [u8; 4],
        dst_ip: [u8; 4],
        src_port: u16,
        dst_port: u16,
        seq: u32,
        flag_bits: u8,
        payload_len: usize,
    ) -> Vec<u8> {
        let mut pkt = vec![0u8; 14 + 20 + 20 + payload_len];
        pkt[12] = 0x08; // IPv4

        let ip_total = (20 + 20 + payload_len) as u16;
        let ip = &mut pkt[14..34];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&ip_total.to_be_bytes());
        ip[8] = 64;
        ip[9] = 6;
        ip[12..16].copy_from_slice(&src_ip);
        ip[16..20].copy_from_slice(&dst_ip);

        let tcp = &mut pkt[34..54];
        tcp[0..2].copy_from_slice(&src_port.to_be_bytes());
        tcp[2..4].copy_from_slice(&dst_port.to_be_bytes());
        tcp[4..8].copy_from_slice(&seq.to_be_bytes());
        tcp[12] = 0x50;
        tcp[13] = flag_bits;
        pkt
    }

    fn as_packet(frame: Vec<u8>) -> Packet {
        Packet {
            ts_seconds: 1.0,
            wire_len: frame.len() as u32,
            link_frame: frame,
        }
    }

    #[test]
    fn decode_tcp_over_ipv4() {
        let frame = build_tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 40000, 80, 7777, 0x18, 100);
        let d = decode(&as_packet(frame), LINKTYPE_ETHERNET);
        assert_eq!(d.l3, L3Proto::V4);
        assert_eq!(d.l4, L4Proto::Tcp);
        assert_eq!(d.src_ip, Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
        assert_eq!(d.src_port, Some(40000));
        assert_eq!(d.dst_port, Some(80));
        assert_eq!(d.tcp_seq, Some(7777));
        assert_eq!(d.tcp_flags, Some(0x18));
        assert_eq!(d.payload_len, 100);
        assert!(!d.malformed);
    }

    #[test]
    fn decode_vlan_tagged_tcp() {
        let inner = build_tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 1, 2, 0, 0x02, 0);
        let mut frame = inner[..12].to_vec();
        frame.extend_from_slice(&ether_type::VLAN.to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x64]); // TCI, VLAN 100
        frame.extend_from_slice(&ether_type::IPV4.to_be_bytes());
        frame.extend_from_slice(&inner[14..]);
        let d = decode(&as_packet(frame), LINKTYPE_ETHERNET);
        assert_eq!(d.l4, L4Proto::Tcp);
        assert!(!d.malformed);
    }

    #[test]
    fn arp_frame_is_opaque_but_clean() {
        let mut frame = vec![0u8; 42];
        frame[12] = 0x08;
        frame[13] = 0x06; // ARP
        let d = decode(&as_packet(frame), LINKTYPE_ETHERNET);
        assert_eq!(d.l3, L3Proto::Other);
        assert_eq!(d.l4, L4Proto::Other(0));
        assert!(d.src_ip.is_none());
        assert!(!d.malformed);
    }

    #[test]
    fn truncated_ip_is_malformed() {
        let mut frame = vec![0u8; 20]; // ethernet + 6 bytes of "IPv4"
        frame[12] = 0x08;
        frame[14] = 0x45;
        let d = decode(&as_packet(frame), LINKTYPE_ETHERNET);
        assert!(d.malformed);
        assert_eq!(d.l4, L4Proto::Other(0));
    }

    #[test]
    fn non_first_fragment_has_no_transport() {
        let mut frame = build_tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 1, 2, 0, 0, 0);
        frame[14 + 7] = 0x10; // fragment offset 16 (in 8-byte units)
        let d = decode(&as_packet(frame), LINKTYPE_ETHERNET);
        assert_eq!(d.l4, L4Proto::Other(6));
        assert!(d.src_port.is_none());
        assert!(!d.malformed);
    }

    #[test]
    fn icmpv6_counts_as_icmp() {
        let mut frame = vec![0u8; 14 + 40 + 8];
        frame[12] = 0x86;
        frame[13] = 0xdd;
        frame[14] = 0x60;
        frame[14 + 4..14 + 6].copy_from_slice(&8u16.to_be_bytes());
        frame[14 + 6] = 58;
        let d = decode(&as_packet(frame), LINKTYPE_ETHERNET);
        assert_eq!(d.l3, L3Proto::V6);
        assert_eq!(d.l4, L4Proto::Icmp);
    }

    #[test]
    fn non_ethernet_link_type_is_opaque() {
        let frame = build_tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 1, 2, 0, 0, 0);
        let d = decode(&as_packet(frame), 101); // LINKTYPE_RAW
        assert_eq!(d.l3, L3Proto::Other);
        assert!(!d.malformed);
    }
}
