//! Bounded distinct-IP counting.
//!
//! Exact set semantics up to a configured cap; at the cap the set is frozen
//! into a HyperLogLog sketch seeded with everything seen so far, and later
//! inserts only touch the sketch. Register hashing uses fixed seeds so the
//! same capture always yields the same estimate.

use ahash::{AHashSet, RandomState};
use std::hash::{BuildHasher, Hash, Hasher};
use std::net::IpAddr;

/// Register-index bits: 2^12 = 4096 registers, ~1.6% standard error.
const HLL_P: u32 = 12;
const HLL_M: usize = 1 << HLL_P;

#[derive(Debug, Clone)]
pub struct HyperLogLog {
    registers: Vec<u8>,
    hasher: RandomState,
}

impl HyperLogLog {
    pub fn new() -> Self {
        HyperLogLog {
            registers: vec![0u8; HLL_M],
            hasher: RandomState::with_seeds(
                0x9e37_79b9_7f4a_7c15,
                0x6a09_e667_f3bc_c909,
                0xbb67_ae85_84ca_a73b,
                0x3c6e_f372_fe94_f82b,
            ),
        }
    }

    pub fn insert<T: Hash>(&mut self, item: &T) {
        let mut state = self.hasher.build_hasher();
        item.hash(&mut state);
        let hash = state.finish();

        let index = (hash >> (64 - HLL_P)) as usize;
        let remainder = hash << HLL_P;
        let rank = (remainder.leading_zeros().min(64 - HLL_P) + 1) as u8;
        if rank > self.registers[index] {
            self.registers[index] = rank;
        }
    }

    pub fn estimate(&self) -> f64 {
        let m = HLL_M as f64;
        let alpha = 0.7213 / (1.0 + 1.079 / m);
        let sum: f64 = self
            .registers
            .iter()
            .map(|&r| 2f64.powi(-(r as i32)))
            .sum();
        let raw = alpha * m * m / sum;

        // Small-range correction: linear counting while registers are sparse.
        if raw <= 2.5 * m {
            let zeros = self.registers.iter().filter(|&&r| r == 0).count();
            if zeros > 0 {
                return m * (m / zeros as f64).ln();
            }
        }
        raw
    }
}

impl Default for HyperLogLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Distinct-IP tracker with a hard memory bound.
#[derive(Debug, Clone)]
pub struct CappedCardinality {
    cap: usize,
    exact: AHashSet<IpAddr>,
    sketch: Option<HyperLogLog>,
}

impl CappedCardinality {
    pub fn new(cap: usize) -> Self {
        CappedCardinality {
            cap: cap.max(1),
            exact: AHashSet::new(),
            sketch: None,
        }
    }

    /// Insert one address. Returns true when this insert froze the exact
    /// set into the sketch.
    pub fn insert(&mut self, ip: IpAddr) -> bool {
        if let Some(sketch) = self.sketch.as_mut() {
            sketch.insert(&ip);
            return false;
        }
        if self.exact.contains(&ip) {
            return false;
        }
        if self.exact.len() >= self.cap {
            let mut sketch = HyperLogLog::new();
            for seen in &self.exact {
                sketch.insert(seen);
            }
            sketch.insert(&ip);
            // Release the exact set; its memory is the whole point of the cap.
            self.exact = AHashSet::new();
            self.sketch = Some(sketch);
            return true;
        }
        self.exact.insert(ip);
        false
    }

    pub fn is_frozen(&self) -> bool {
        self.sketch.is_some()
    }

    /// Distinct count: exact below the cap, estimated (never reported below
    /// the cap) once frozen.
    pub fn count(&self) -> u64 {
        match &self.sketch {
            Some(sketch) => (sketch.estimate().round() as u64).max(self.cap as u64),
            None => self.exact.len() as u64,
        }
    }
}
