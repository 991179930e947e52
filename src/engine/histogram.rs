//! Fixed-bin histograms over configurable edges.
//!
//! Edges are a sorted array; bucket lookup is a binary search. Bin labels
//! are derived from the edges once per run, never hard-coded: `"<64"` for
//! each finite edge, `">=1518"` for the open-ended last bin.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Immutable bin-edge specification shared by every window in a run.
#[derive(Debug, Clone)]
pub struct BinSpec {
    edges: Vec<f64>,
    labels: Vec<String>,
}

impl BinSpec {
    /// Build a spec from ordered f64 edges (flow-duration bins).
    pub fn from_f64(edges: &[f64]) -> Self {
        let edges = edges.to_vec();
        let mut labels = Vec::with_capacity(edges.len() + 1);
        for edge in &edges {
            labels.push(format!("<{}", edge));
        }
        match edges.last() {
            Some(last) => labels.push(format!(">={}", last)),
            None => labels.push(">=0".to_string()),
        }
        BinSpec { edges, labels }
    }

    /// Build a spec from ordered u32 edges (packet-size bins).
    pub fn from_u32(edges: &[u32]) -> Self {
        let as_f64: Vec<f64> = edges.iter().map(|&e| e as f64).collect();
        Self::from_f64(&as_f64)
    }

    /// Number of bins: one per edge plus the open-ended last bin.
    pub fn bin_count(&self) -> usize {
        self.edges.len() + 1
    }

    /// Bucket index for a value: bin `i` holds `edge[i-1] <= v < edge[i]`.
    pub fn bucket(&self, value: f64) -> usize {
        self.edges.partition_point(|edge| value >= *edge)
    }

    /// Attach labels to raw per-bin counts.
    pub fn histogram(&self, counts: Vec<u64>) -> Histogram {
        debug_assert_eq!(counts.len(), self.bin_count());
        Histogram {
            bins: self.labels.iter().cloned().zip(counts).collect(),
        }
    }
}

/// Labeled bin counts, emitted inside `WindowRecord`. Serializes as a JSON
/// object in bin order.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    bins: Vec<(String, u64)>,
}

impl Histogram {
    /// Sum over all bins.
    pub fn total(&self) -> u64 {
        self.bins.iter().map(|(_, count)| count).sum()
    }

    /// Count for a label, if present.
    pub fn count_for(&self, label: &str) -> Option<u64> {
        self.bins
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, count)| *count)
    }

    pub fn bins(&self) -> &[(String, u64)] {
        &self.bins
    }
}

impl Serialize for Histogram {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.bins.len()))?;
        for (label, count) in &self.bins {
            map.serialize_entry(label, count)?;
        }
        map.end()
    }
}
