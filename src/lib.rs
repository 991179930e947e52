//! trafficlens: windowed feature extraction and behavioral feature
//! engineering over pcap captures, feeding an external anomaly detector.

pub mod config;
pub mod engine;
pub mod features;
pub mod protocol;
pub mod score;
pub mod sink;
pub mod source;

use config::Config;
use engine::window::WindowRecord;
use engine::{ExtractError, ExtractStats};
use source::{PcapReader, SourceLimits};
use std::path::Path;
use std::sync::atomic::AtomicBool;

// ---------------------------------------------------------------------------
// Shared pipeline helpers used by the binary (main.rs) and the integration
// tests.
// ---------------------------------------------------------------------------

/// Run the full extraction pipeline over a pcap file: stream records,
/// decode, accumulate windows, collect the ordered `WindowRecord`s.
pub fn extract_file(
    path: &Path,
    config: &Config,
    cancel: &AtomicBool,
) -> Result<(Vec<WindowRecord>, ExtractStats), ExtractError> {
    let limits = SourceLimits {
        max_read_bytes: config.source.max_read_bytes,
        read_timeout_secs: config.source.read_timeout_secs,
    };
    let mut reader = PcapReader::open(path, limits).map_err(ExtractError::Source)?;
    let link_type = reader.link_type();

    let stream = std::iter::from_fn(move || match reader.next_packet() {
        Ok(Some(packet)) => Some(Ok(protocol::decode(&packet, link_type))),
        Ok(None) => None,
        Err(err) => Some(Err(err)),
    });

    engine::extract_to_vec(stream, &config.engine, cancel)
}
