//! Windowed feature extraction engine.
//!
//! Single-threaded, cooperative: read one decoded packet, mutate the one
//! open accumulator, emit zero or more closed windows, loop. Memory is
//! bounded by one window's tables regardless of capture length.

pub mod cardinality;
pub mod flow;
pub mod histogram;
pub mod window;

use crate::config::{EngineConfig, NonMonotonicPolicy};
use crate::protocol::Decoded;
use crate::sink::{SinkError, WindowSink};
use crate::source::SourceError;
use histogram::BinSpec;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use window::{WindowAccumulator, WindowRecord};

/// Progress log cadence, in packets.
const PROGRESS_EVERY: u64 = 500_000;

/// Errors that abort extraction.
#[derive(Debug)]
pub enum ExtractError {
    /// The capture produced no packets at all.
    EmptyCapture,
    /// A packet was older than the open window under the `reject` policy.
    NonMonotonicTimestamp { ts: f64, window_start: f64 },
    /// The packet source failed.
    Source(SourceError),
    /// The sink refused a record.
    Sink(SinkError),
    /// Cancellation was requested; the in-flight window was discarded.
    Cancelled,
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractError::EmptyCapture => write!(f, "capture contains no packets"),
            ExtractError::NonMonotonicTimestamp { ts, window_start } => write!(
                f,
                "timestamp {} precedes open window start {}",
                ts, window_start
            ),
            ExtractError::Source(err) => write!(f, "source error: {}", err),
            ExtractError::Sink(err) => write!(f, "sink error: {}", err),
            ExtractError::Cancelled => write!(f, "extraction cancelled"),
        }
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExtractError::Source(err) => Some(err),
            ExtractError::Sink(err) => Some(err),
            _ => None,
        }
    }
}

/// Observability counters for one extraction run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub packets: u64,
    pub windows: u64,
    /// Truncated or unparseable frames (counted in `other`, never fatal).
    pub decode_errors: u64,
    /// Timestamps snapped forward under the clamp policy.
    pub clamped_timestamps: u64,
    /// Diversity sets that hit `unique_ip_cap` and froze.
    pub diversity_freezes: u64,
}

/// Drive a decoded packet stream through window accumulation.
///
/// Guarantees: records reach the sink in strict time order; every packet
/// lands in exactly one window; gaps produce explicit zero-count windows;
/// the terminal window may be short. The in-flight window is discarded on
/// cancellation, not emitted.
pub fn extract<I, S>(
    source: I,
    sink: &mut S,
    config: &EngineConfig,
    cancel: &AtomicBool,
) -> Result<ExtractStats, ExtractError>
where
    I: IntoIterator<Item = Result<Decoded, SourceError>>,
    S: WindowSink + ?Sized,
{
    let size_spec = BinSpec::from_u32(&config.size_bin_edges);
    let duration_spec = BinSpec::from_f64(&config.duration_bin_edges);
    let window_seconds = config.window_seconds;

    let mut stats = ExtractStats::default();
    let mut current: Option<WindowAccumulator> = None;
    let mut last_ts = f64::NEG_INFINITY;

    for item in source {
        if cancel.load(Ordering::Relaxed) {
            return Err(ExtractError::Cancelled);
        }
        let decoded = item.map_err(ExtractError::Source)?;
        stats.packets += 1;
        if decoded.malformed {
            stats.decode_errors += 1;
        }

        let mut ts = decoded.ts_seconds;
        // First packet anchors the window grid.
        let acc = current.get_or_insert_with(|| {
            let start = (ts / window_seconds).floor() * window_seconds;
            WindowAccumulator::open(start, config, &size_spec)
        });

        if ts < acc.window_start {
            match config.nonmonotonic_policy {
                NonMonotonicPolicy::Reject => {
                    return Err(ExtractError::NonMonotonicTimestamp {
                        ts,
                        window_start: acc.window_start,
                    });
                }
                NonMonotonicPolicy::Clamp => {
                    stats.clamped_timestamps += 1;
                    tracing::debug!(ts, window_start = acc.window_start, "clamped timestamp");
                    ts = acc.window_start;
                }
            }
        }

        while ts >= acc.window_end {
            let next_start = acc.window_end;
            let sealed = std::mem::replace(
                acc,
                WindowAccumulator::open(next_start, config, &size_spec),
            );
            let record = sealed.close(config, &size_spec, &duration_spec);
            stats.windows += 1;
            sink.push(record).map_err(ExtractError::Sink)?;
        }

        stats.diversity_freezes += acc.update(&decoded, ts, &size_spec) as u64;
        // Clamped packets can arrive behind the latest timestamp; the
        // terminal truncation below must use the maximum, not the last.
        last_ts = last_ts.max(ts);

        if stats.packets % PROGRESS_EVERY == 0 {
            tracing::info!(
                packets = stats.packets,
                windows = stats.windows,
                "extraction progress"
            );
        }
    }

    let mut acc = current.ok_or(ExtractError::EmptyCapture)?;

    // Terminal window: truncate to the last packet, rounded up to the next
    // whole microsecond, when that makes it shorter than W.
    let truncated_end = round_up_to_microsecond(last_ts);
    if truncated_end < acc.window_end {
        acc.window_end = truncated_end;
    }
    let record = acc.close(config, &size_spec, &duration_spec);
    stats.windows += 1;
    sink.push(record).map_err(ExtractError::Sink)?;

    tracing::debug!(
        packets = stats.packets,
        windows = stats.windows,
        decode_errors = stats.decode_errors,
        "extraction finished"
    );
    Ok(stats)
}

/// Convenience wrapper that collects records into a vector.
pub fn extract_to_vec<I>(
    source: I,
    config: &EngineConfig,
    cancel: &AtomicBool,
) -> Result<(Vec<WindowRecord>, ExtractStats), ExtractError>
where
    I: IntoIterator<Item = Result<Decoded, SourceError>>,
{
    let mut sink = crate::sink::VecSink::new();
    let stats = extract(source, &mut sink, config, cancel)?;
    Ok((sink.records, stats))
}

fn round_up_to_microsecond(ts: f64) -> f64 {
    ((ts * 1e6).floor() + 1.0) / 1e6
}
