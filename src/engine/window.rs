//! Window accumulator and the sealed record it produces.
//!
//! An accumulator lives exactly as long as its window is open. Closing
//! consumes it; the emitted `WindowRecord` is immutable and owns nothing
//! that points back into the engine.

use crate::config::EngineConfig;
use crate::engine::cardinality::CappedCardinality;
use crate::engine::flow::{
    select_top_flows, select_top_ports, FlowAgg, FlowKey, PortAgg, PortKey, TopFlow, TopPort,
};
use crate::engine::histogram::{BinSpec, Histogram};
use crate::protocol::{tcp::flags, Decoded, L4Proto};
use ahash::AHashMap;
use serde::Serialize;

/// Duration floor for per-second rates.
const MIN_DURATION: f64 = 1e-6;

/// Running min/max/mean/variance over packet sizes (Welford's algorithm).
#[derive(Debug, Clone, Copy, Default)]
pub struct SizeStats {
    count: u64,
    min: u32,
    max: u32,
    mean: f64,
    m2: f64,
}

impl SizeStats {
    pub fn record(&mut self, size: u32) {
        self.count += 1;
        if self.count == 1 {
            self.min = size;
            self.max = size;
        } else {
            self.min = self.min.min(size);
            self.max = self.max.max(size);
        }
        let x = size as f64;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Population standard deviation.
    pub fn std(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.m2 / self.count as f64).sqrt()
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TcpFlagCounts {
    syn: u64,
    ack: u64,
    fin: u64,
    rst: u64,
    psh: u64,
    urg: u64,
}

impl TcpFlagCounts {
    fn record(&mut self, flag_byte: u8) {
        if flag_byte & flags::SYN != 0 {
            self.syn += 1;
        }
        if flag_byte & flags::ACK != 0 {
            self.ack += 1;
        }
        if flag_byte & flags::FIN != 0 {
            self.fin += 1;
        }
        if flag_byte & flags::RST != 0 {
            self.rst += 1;
        }
        if flag_byte & flags::PSH != 0 {
            self.psh += 1;
        }
        if flag_byte & flags::URG != 0 {
            self.urg += 1;
        }
    }
}

/// Mutable per-window state. Created at window open, sealed by `close`.
#[derive(Debug)]
pub struct WindowAccumulator {
    pub window_start: f64,
    pub window_end: f64,
    packet_count: u64,
    total_bytes: u64,
    tcp_count: u64,
    udp_count: u64,
    icmp_count: u64,
    other_count: u64,
    flag_counts: TcpFlagCounts,
    tcp_retransmissions: u64,
    sizes: SizeStats,
    size_bins: Vec<u64>,
    src_ips: CappedCardinality,
    dst_ips: CappedCardinality,
    flows: AHashMap<FlowKey, FlowAgg>,
    ports: AHashMap<PortKey, PortAgg>,
    /// Last (seq, payload_len) per TCP flow, for the duplicate-segment
    /// retransmission heuristic.
    last_segment: AHashMap<FlowKey, (u32, u32)>,
    last_packet_ts: Option<f64>,
    inter_arrival_sum: f64,
    new_flows: u64,
}

impl WindowAccumulator {
    pub fn open(window_start: f64, config: &EngineConfig, size_spec: &BinSpec) -> Self {
        WindowAccumulator {
            window_start,
            window_end: window_start + config.window_seconds,
            packet_count: 0,
            total_bytes: 0,
            tcp_count: 0,
            udp_count: 0,
            icmp_count: 0,
            other_count: 0,
            flag_counts: TcpFlagCounts::default(),
            tcp_retransmissions: 0,
            sizes: SizeStats::default(),
            size_bins: vec![0u64; size_spec.bin_count()],
            src_ips: CappedCardinality::new(config.unique_ip_cap as usize),
            dst_ips: CappedCardinality::new(config.unique_ip_cap as usize),
            flows: AHashMap::new(),
            ports: AHashMap::new(),
            last_segment: AHashMap::new(),
            last_packet_ts: None,
            inter_arrival_sum: 0.0,
            new_flows: 0,
        }
    }

    /// Fold one packet into the window. `ts` is the packet timestamp after
    /// any non-monotonic clamping. Returns how many diversity sets this
    /// packet froze (0..=2), for the engine's observability counters.
    pub fn update(&mut self, decoded: &Decoded, ts: f64, size_spec: &BinSpec) -> u8 {
        self.packet_count += 1;
        self.total_bytes += decoded.size as u64;
        self.sizes.record(decoded.size);
        self.size_bins[size_spec.bucket(decoded.size as f64)] += 1;

        match decoded.l4 {
            L4Proto::Tcp => self.tcp_count += 1,
            L4Proto::Udp => self.udp_count += 1,
            L4Proto::Icmp => self.icmp_count += 1,
            L4Proto::Other(_) => self.other_count += 1,
        }

        let key = FlowKey::from_decoded(decoded);

        if let Some(flag_byte) = decoded.tcp_flags {
            self.flag_counts.record(flag_byte);
        }
        if decoded.l4 == L4Proto::Tcp {
            if let Some(seq) = decoded.tcp_seq {
                let segment = (seq, decoded.payload_len);
                match self.last_segment.insert(key, segment) {
                    Some(previous) if previous == segment => self.tcp_retransmissions += 1,
                    _ => {}
                }
            }
        }

        let mut froze = 0u8;
        if let Some(src) = decoded.src_ip {
            froze += self.src_ips.insert(src) as u8;
        }
        if let Some(dst) = decoded.dst_ip {
            froze += self.dst_ips.insert(dst) as u8;
        }

        match self.flows.get_mut(&key) {
            Some(agg) => agg.update(ts, decoded.size as u64),
            None => {
                self.flows.insert(key, FlowAgg::open(ts, decoded.size as u64));
                self.new_flows += 1;
            }
        }

        if matches!(decoded.l4, L4Proto::Tcp | L4Proto::Udp) {
            let port_key = PortKey {
                port: decoded.dst_port.unwrap_or(0),
                protocol: decoded.l4,
            };
            let agg = self.ports.entry(port_key).or_default();
            agg.pkts += 1;
            agg.bytes += decoded.size as u64;
        }

        if let Some(last) = self.last_packet_ts {
            // Clamped and reordered packets would contribute negative gaps.
            self.inter_arrival_sum += (ts - last).max(0.0);
        }
        self.last_packet_ts = Some(ts);

        froze
    }

    /// Seal the window into its immutable record. The accumulator's tables
    /// are dropped with `self`, releasing their memory.
    pub fn close(
        self,
        config: &EngineConfig,
        size_spec: &BinSpec,
        duration_spec: &BinSpec,
    ) -> WindowRecord {
        let duration = (self.window_end - self.window_start).max(MIN_DURATION);
        let packets = self.packet_count;
        let ratio = |count: u64| {
            if packets > 0 {
                count as f64 / packets as f64
            } else {
                0.0
            }
        };

        let unique_src_ips = self.src_ips.count();
        let unique_dst_ips = self.dst_ips.count();
        let flow_count = self.flows.len() as u64;

        let mut duration_bins = vec![0u64; duration_spec.bin_count()];
        for agg in self.flows.values() {
            duration_bins[duration_spec.bucket((agg.last_ts - agg.first_ts).max(0.0))] += 1;
        }

        WindowRecord {
            window_start: self.window_start,
            window_end: self.window_end,
            packet_count: packets,
            total_bytes: self.total_bytes,
            avg_packet_size: if packets > 0 {
                self.total_bytes as f64 / packets as f64
            } else {
                0.0
            },
            min_packet_size: self.sizes.min(),
            max_packet_size: self.sizes.max(),
            packet_size_std: self.sizes.std(),
            tcp_count: self.tcp_count,
            udp_count: self.udp_count,
            icmp_count: self.icmp_count,
            other_count: self.other_count,
            tcp_ratio: ratio(self.tcp_count),
            udp_ratio: ratio(self.udp_count),
            icmp_ratio: ratio(self.icmp_count),
            other_ratio: ratio(self.other_count),
            tcp_syn_count: self.flag_counts.syn,
            tcp_ack_count: self.flag_counts.ack,
            tcp_fin_count: self.flag_counts.fin,
            tcp_rst_count: self.flag_counts.rst,
            tcp_psh_count: self.flag_counts.psh,
            tcp_urg_count: self.flag_counts.urg,
            tcp_retransmissions: self.tcp_retransmissions,
            unique_src_ips,
            unique_dst_ips,
            unique_src_ratio: ratio(unique_src_ips),
            unique_dst_ratio: ratio(unique_dst_ips),
            flow_count,
            flow_ratio: ratio(flow_count),
            avg_flow_packets: if flow_count > 0 {
                packets as f64 / flow_count as f64
            } else {
                0.0
            },
            avg_flow_bytes: if flow_count > 0 {
                self.total_bytes as f64 / flow_count as f64
            } else {
                0.0
            },
            packets_per_sec: packets as f64 / duration,
            bytes_per_sec: self.total_bytes as f64 / duration,
            port_diversity: self.ports.len() as u64,
            avg_inter_arrival_time: self.inter_arrival_sum / packets.saturating_sub(1).max(1) as f64,
            connection_rate: self.new_flows as f64 / duration,
            packet_size_distribution: size_spec.histogram(self.size_bins),
            flow_duration_distribution: duration_spec.histogram(duration_bins),
            top_flows: select_top_flows(&self.flows, config.top_k_flows as usize),
            top_ports: select_top_ports(&self.ports, config.top_k_ports as usize),
        }
    }
}

/// One closed window. Field names here are the output schema; they appear
/// verbatim in the emitted JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowRecord {
    pub window_start: f64,
    pub window_end: f64,
    pub packet_count: u64,
    pub total_bytes: u64,
    pub avg_packet_size: f64,
    pub min_packet_size: u32,
    pub max_packet_size: u32,
    pub packet_size_std: f64,
    pub tcp_count: u64,
    pub udp_count: u64,
    pub icmp_count: u64,
    pub other_count: u64,
    pub tcp_ratio: f64,
    pub udp_ratio: f64,
    pub icmp_ratio: f64,
    pub other_ratio: f64,
    pub tcp_syn_count: u64,
    pub tcp_ack_count: u64,
    pub tcp_fin_count: u64,
    pub tcp_rst_count: u64,
    pub tcp_psh_count: u64,
    pub tcp_urg_count: u64,
    pub tcp_retransmissions: u64,
    pub unique_src_ips: u64,
    pub unique_dst_ips: u64,
    pub unique_src_ratio: f64,
    pub unique_dst_ratio: f64,
    pub flow_count: u64,
    pub flow_ratio: f64,
    pub avg_flow_packets: f64,
    pub avg_flow_bytes: f64,
    pub packets_per_sec: f64,
    pub bytes_per_sec: f64,
    pub port_diversity: u64,
    pub avg_inter_arrival_time: f64,
    pub connection_rate: f64,
    pub packet_size_distribution: Histogram,
    pub flow_duration_distribution: Histogram,
    pub top_flows: Vec<TopFlow>,
    pub top_ports: Vec<TopPort>,
}
