//! Behavioral feature engineering: turns per-window counters into
//! scale-robust features for the anomaly detector. Pure over its input
//! apart from the rolling-baseline length; output is one row per window,
//! same order.

pub mod rolling;

use crate::config::FeatureConfig;
use crate::engine::window::WindowRecord;
use rolling::RollingMean;
use serde::Serialize;

/// Entropy guard inherited from the trained model's preprocessing.
const ENTROPY_EPSILON: f64 = 1e-6;

/// One engineered row. Every field is finite; anything that computes to
/// NaN or infinity is forced to zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    pub log_packet_count: f64,
    pub bytes_per_packet: f64,
    pub pct_change_packets: f64,
    pub pct_change_bytes_ps: f64,
    pub pct_change_flows: f64,
    pub tcp_ratio: f64,
    pub udp_ratio: f64,
    pub icmp_ratio: f64,
    pub src_ips_per_packet: f64,
    pub dst_ips_per_packet: f64,
    pub flow_per_packet: f64,
    pub protocol_diversity: f64,
    pub packet_size_range: f64,
}

/// Engineer one `FeatureRow` per `WindowRecord`, in order.
pub fn engineer_features(windows: &[WindowRecord], config: &FeatureConfig) -> Vec<FeatureRow> {
    let mut rolling_packets = RollingMean::new(config.rolling_window);
    let mut rolling_bytes_ps = RollingMean::new(config.rolling_window);
    let mut rolling_flows = RollingMean::new(config.rolling_window);

    windows
        .iter()
        .map(|window| {
            let packets = window.packet_count as f64;

            let baseline_packets = rolling_packets.push(packets);
            let baseline_bytes_ps = rolling_bytes_ps.push(window.bytes_per_sec);
            let baseline_flows = rolling_flows.push(window.flow_count as f64);

            let pct = |value: f64, baseline: f64| (value - baseline) / (baseline + 1.0);
            let per_packet = |value: f64| value / (packets + 1.0);

            // The "other" ratio is deliberately left out of the entropy; the
            // detector was trained on the three first-class protocols.
            let protocol_diversity = -(window.tcp_ratio
                * (window.tcp_ratio + ENTROPY_EPSILON).ln()
                + window.udp_ratio * (window.udp_ratio + ENTROPY_EPSILON).ln()
                + window.icmp_ratio * (window.icmp_ratio + ENTROPY_EPSILON).ln());

            FeatureRow {
                log_packet_count: finite((1.0 + packets).ln()),
                bytes_per_packet: finite(window.total_bytes as f64 / packets.max(1.0)),
                pct_change_packets: finite(pct(packets, baseline_packets)),
                pct_change_bytes_ps: finite(pct(window.bytes_per_sec, baseline_bytes_ps)),
                pct_change_flows: finite(pct(window.flow_count as f64, baseline_flows)),
                tcp_ratio: finite(window.tcp_ratio),
                udp_ratio: finite(window.udp_ratio),
                icmp_ratio: finite(window.icmp_ratio),
                src_ips_per_packet: finite(per_packet(window.unique_src_ips as f64)),
                dst_ips_per_packet: finite(per_packet(window.unique_dst_ips as f64)),
                flow_per_packet: finite(per_packet(window.flow_count as f64)),
                protocol_diversity: finite(protocol_diversity),
                packet_size_range: finite(
                    (window.max_packet_size as f64 - window.min_packet_size as f64)
                        / (window.avg_packet_size + 1.0),
                ),
            }
        })
        .collect()
}

fn finite(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::histogram::BinSpec;
    use crate::engine::window::WindowAccumulator;

    /// Build a closed window with the given packet count; every packet is
    /// 100 bytes of TCP from one flow.
    fn window_with(packets: u64, start: f64) -> WindowRecord {
        use crate::protocol::{Decoded, L3Proto, L4Proto};
        use std::net::{IpAddr, Ipv4Addr};

        let config = EngineConfig::default();
        let size_spec = BinSpec::from_u32(&config.size_bin_edges);
        let duration_spec = BinSpec::from_f64(&config.duration_bin_edges);
        let mut acc = WindowAccumulator::open(start, &config, &size_spec);
        for i in 0..packets {
            let decoded = Decoded {
                ts_seconds: start + i as f64 * 0.001,
                size: 100,
                l3: L3Proto::V4,
                src_ip: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
                dst_ip: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))),
                l4: L4Proto::Tcp,
                src_port: Some(40000),
                dst_port: Some(80),
                tcp_flags: Some(0x10),
                tcp_seq: Some(i as u32),
                payload_len: 0,
                malformed: false,
            };
            acc.update(&decoded, decoded.ts_seconds, &size_spec);
        }
        acc.close(&config, &size_spec, &duration_spec)
    }

    #[test]
    fn length_and_order_are_preserved() {
        let windows: Vec<WindowRecord> =
            (0..7).map(|i| window_with(10, i as f64 * 60.0)).collect();
        let rows = engineer_features(&windows, &FeatureConfig::default());
        assert_eq!(rows.len(), windows.len());
    }

    #[test]
    fn first_window_has_zero_deltas() {
        let windows = vec![window_with(50, 0.0)];
        let rows = engineer_features(&windows, &FeatureConfig::default());
        assert_eq!(rows[0].pct_change_packets, 0.0);
        assert_eq!(rows[0].pct_change_bytes_ps, 0.0);
        assert_eq!(rows[0].pct_change_flows, 0.0);
    }

    #[test]
    fn spike_after_flat_baseline_matches_hand_computation() {
        // Nine windows of 10 packets, then one of 100, R = 5.
        let mut windows: Vec<WindowRecord> =
            (0..9).map(|i| window_with(10, i as f64 * 60.0)).collect();
        windows.push(window_with(100, 540.0));

        let config = FeatureConfig { rolling_window: 5 };
        let rows = engineer_features(&windows, &config);

        // Baseline over [10,10,10,10,100] = 28; (100-28)/29.
        let expected = (100.0 - 28.0) / 29.0;
        assert!((rows[9].pct_change_packets - expected).abs() < 1e-9);
        assert!((rows[9].pct_change_packets - 2.4828).abs() < 1e-4);
        // Flat stretch in the middle has no deltas.
        assert!(rows[5].pct_change_packets.abs() < 1e-12);
    }

    #[test]
    fn log_packet_count_and_composition() {
        let windows = vec![window_with(99, 0.0)];
        let rows = engineer_features(&windows, &FeatureConfig::default());
        assert!((rows[0].log_packet_count - 100.0f64.ln()).abs() < 1e-12);
        assert!((rows[0].bytes_per_packet - 100.0).abs() < 1e-12);
        assert!((rows[0].flow_per_packet - 1.0 / 100.0).abs() < 1e-12);
    }

    #[test]
    fn entropy_ignores_other_ratio() {
        let mut window = window_with(10, 0.0);
        // All-other traffic: the three first-class ratios are zero, so the
        // entropy collapses to the epsilon terms, effectively zero.
        window.tcp_ratio = 0.0;
        window.udp_ratio = 0.0;
        window.icmp_ratio = 0.0;
        window.other_ratio = 1.0;
        let rows = engineer_features(&[window], &FeatureConfig::default());
        assert!(rows[0].protocol_diversity.abs() < 1e-4);
    }

    #[test]
    fn every_field_is_finite_even_for_empty_windows() {
        let windows = vec![window_with(0, 0.0), window_with(0, 60.0)];
        let rows = engineer_features(&windows, &FeatureConfig::default());
        for row in &rows {
            for value in [
                row.log_packet_count,
                row.bytes_per_packet,
                row.pct_change_packets,
                row.pct_change_bytes_ps,
                row.pct_change_flows,
                row.tcp_ratio,
                row.udp_ratio,
                row.icmp_ratio,
                row.src_ips_per_packet,
                row.dst_ips_per_packet,
                row.flow_per_packet,
                row.protocol_diversity,
                row.packet_size_range,
            ] {
                assert!(value.is_finite());
            }
        }
    }
}
