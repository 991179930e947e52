//! Adapter between engineered features and the pretrained detector.
//!
//! The detector itself is a black box behind the `Detector` trait: it takes
//! an N x F matrix and returns a score per row (lower = more anomalous) and
//! a -1/1 label per row. This module only selects columns, applies the
//! externally fitted standardization, and derives the optional
//! contributing-feature attribution.

use crate::features::FeatureRow;
use serde::Serialize;

/// Number of feature columns the detector consumes.
pub const FEATURE_DIM: usize = 13;

/// Fixed column order. The trained model was fitted against exactly this
/// layout; reordering silently breaks scoring.
pub const FEATURE_COLUMNS: [&str; FEATURE_DIM] = [
    "log_packet_count",
    "bytes_per_packet",
    "pct_change_packets",
    "pct_change_bytes_ps",
    "pct_change_flows",
    "tcp_ratio",
    "udp_ratio",
    "icmp_ratio",
    "src_ips_per_packet",
    "dst_ips_per_packet",
    "flow_per_packet",
    "protocol_diversity",
    "packet_size_range",
];

/// Label value the detector assigns to anomalous rows.
pub const ANOMALY_LABEL: i8 = -1;

impl FeatureRow {
    /// Project the row onto the detector's column order.
    pub fn as_columns(&self) -> [f64; FEATURE_DIM] {
        [
            self.log_packet_count,
            self.bytes_per_packet,
            self.pct_change_packets,
            self.pct_change_bytes_ps,
            self.pct_change_flows,
            self.tcp_ratio,
            self.udp_ratio,
            self.icmp_ratio,
            self.src_ips_per_packet,
            self.dst_ips_per_packet,
            self.flow_per_packet,
            self.protocol_diversity,
            self.packet_size_range,
        ]
    }
}

/// Per-column standardization parameters fitted alongside the model.
#[derive(Debug, Clone, Serialize)]
pub struct ScalerParams {
    pub mean: [f64; FEATURE_DIM],
    pub std: [f64; FEATURE_DIM],
}

impl ScalerParams {
    fn apply(&self, row: &mut [f64; FEATURE_DIM]) {
        for (i, value) in row.iter_mut().enumerate() {
            let std = if self.std[i].abs() > f64::EPSILON {
                self.std[i]
            } else {
                1.0
            };
            *value = (*value - self.mean[i]) / std;
        }
    }
}

/// The pretrained anomaly detector. Scores are "lower is more anomalous";
/// labels are -1 (anomaly) or 1 (normal).
pub trait Detector {
    fn score(&self, matrix: &[[f64; FEATURE_DIM]]) -> (Vec<f64>, Vec<i8>);
}

/// Scoring results for one run, row-aligned with the input.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreReport {
    pub scores: Vec<f64>,
    pub labels: Vec<i8>,
    pub anomaly_count: usize,
}

/// One attributed feature for an anomalous row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contribution {
    pub feature: &'static str,
    /// Share of the total deviation, normalized so the top-5 sum to 100.
    pub percent: f64,
}

/// Column selection + scaling + black-box scoring.
pub struct ScorerAdapter<D: Detector> {
    detector: D,
    scaler: Option<ScalerParams>,
}

impl<D: Detector> ScorerAdapter<D> {
    pub fn new(detector: D, scaler: Option<ScalerParams>) -> Self {
        ScorerAdapter { detector, scaler }
    }

    /// Build the (scaled) matrix the detector sees.
    pub fn to_matrix(&self, rows: &[FeatureRow]) -> Vec<[f64; FEATURE_DIM]> {
        rows.iter()
            .map(|row| {
                let mut columns = row.as_columns();
                if let Some(scaler) = &self.scaler {
                    scaler.apply(&mut columns);
                }
                columns
            })
            .collect()
    }

    pub fn score(&self, rows: &[FeatureRow]) -> ScoreReport {
        let matrix = self.to_matrix(rows);
        let (scores, labels) = self.detector.score(&matrix);
        let anomaly_count = labels.iter().filter(|&&l| l == ANOMALY_LABEL).count();
        ScoreReport {
            scores,
            labels,
            anomaly_count,
        }
    }
}

/// Attribute an anomalous row to its most deviant features.
///
/// Deviation per column is `|x - median| / MAD`, MAD floored at 1; the top
/// five are kept and normalized to sum to 100%. This is a documented
/// approximation of feature importance, not the detector's own.
pub fn contributing_features(
    matrix: &[[f64; FEATURE_DIM]],
    row_index: usize,
) -> Vec<Contribution> {
    if matrix.is_empty() || row_index >= matrix.len() {
        return Vec::new();
    }

    let mut deviations: Vec<(usize, f64)> = (0..FEATURE_DIM)
        .map(|col| {
            let mut values: Vec<f64> = matrix.iter().map(|row| row[col]).collect();
            let med = median(&mut values);
            let mut abs_dev: Vec<f64> = matrix.iter().map(|row| (row[col] - med).abs()).collect();
            let mad = median(&mut abs_dev).max(1.0);
            (col, (matrix[row_index][col] - med).abs() / mad)
        })
        .collect();

    deviations.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    deviations.truncate(5);

    let total: f64 = deviations.iter().map(|(_, d)| d).sum();
    if total <= 0.0 {
        return Vec::new();
    }
    deviations
        .into_iter()
        .map(|(col, deviation)| Contribution {
            feature: FEATURE_COLUMNS[col],
            percent: deviation / total * 100.0,
        })
        .collect()
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
