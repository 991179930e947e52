//! Streaming reader for classic pcap files.
//!
//! Classic pcap layout:
//!   - 24-byte global header: magic, version, thiszone, sigfigs, snaplen,
//!     link type
//!   - per-record 16-byte header: ts_sec, ts_frac, incl_len, orig_len
//!     followed by incl_len bytes of captured frame
//!
//! Both byte orders and both timestamp precisions (microsecond and
//! nanosecond magics) are accepted. Pcapng is a different container and is
//! rejected up front; conversion happens upstream.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::Instant;

/// Microsecond-precision magic, as written by a big-endian host.
const MAGIC_USEC_BE: [u8; 4] = [0xa1, 0xb2, 0xc3, 0xd4];
const MAGIC_USEC_LE: [u8; 4] = [0xd4, 0xc3, 0xb2, 0xa1];
/// Nanosecond-precision variants.
const MAGIC_NSEC_BE: [u8; 4] = [0xa1, 0xb2, 0x3c, 0x4d];
const MAGIC_NSEC_LE: [u8; 4] = [0x4d, 0x3c, 0xb2, 0xa1];
/// Pcapng Section Header Block type, identical in both byte orders.
const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];

/// Upper bound on a single captured record. Anything larger than this is a
/// corrupt length field, not a packet.
const MAX_RECORD_BYTES: u32 = 256 * 1024;

/// LINKTYPE_ETHERNET in the pcap global header.
pub const LINKTYPE_ETHERNET: u32 = 1;

/// One captured packet, as read from the file.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Capture timestamp in seconds since the epoch.
    pub ts_seconds: f64,
    /// Original length on the wire (may exceed the captured bytes).
    pub wire_len: u32,
    /// Captured link-layer frame.
    pub link_frame: Vec<u8>,
}

/// Errors from the packet source.
#[derive(Debug)]
pub enum SourceError {
    /// The file is a pcapng container; only classic pcap is supported here.
    UnsupportedContainer,
    /// The magic number matches neither pcap variant nor pcapng.
    BadMagic([u8; 4]),
    /// Structural problem at a known offset (truncated header, absurd
    /// record length).
    InvalidFormat { offset: u64, reason: String },
    /// Underlying read failure, with the byte offset reached.
    Io { offset: u64, source: std::io::Error },
    /// A configured read budget (bytes or wall clock) was exceeded.
    Limit { what: String },
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::UnsupportedContainer => {
                write!(f, "pcapng container detected; convert to classic pcap first")
            }
            SourceError::BadMagic(bytes) => {
                write!(f, "not a pcap file (magic {:02x?})", bytes)
            }
            SourceError::InvalidFormat { offset, reason } => {
                write!(f, "malformed pcap at byte {}: {}", offset, reason)
            }
            SourceError::Io { offset, source } => {
                write!(f, "read error at byte {}: {}", offset, source)
            }
            SourceError::Limit { what } => write!(f, "source limit exceeded: {}", what),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Big,
    Little,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TsPrecision {
    Micro,
    Nano,
}

/// Read budgets for the source. Zero means unlimited.
#[derive(Debug, Clone, Copy)]
pub struct SourceLimits {
    pub max_read_bytes: u64,
    pub read_timeout_secs: f64,
}

impl Default for SourceLimits {
    fn default() -> Self {
        SourceLimits {
            max_read_bytes: 0,
            read_timeout_secs: 0.0,
        }
    }
}

/// Streaming pcap record reader. Memory use is one record, independent of
/// file size; there is no seeking.
#[derive(Debug)]
pub struct PcapReader<R: Read> {
    input: R,
    order: ByteOrder,
    precision: TsPrecision,
    link_type: u32,
    offset: u64,
    limits: SourceLimits,
    started: Instant,
}

impl PcapReader<BufReader<File>> {
    /// Open a pcap file and parse its global header.
    pub fn open(path: &Path, limits: SourceLimits) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|source| SourceError::Io { offset: 0, source })?;
        Self::new(BufReader::new(file), limits)
    }
}

impl<R: Read> PcapReader<R> {
    /// Wrap any byte stream positioned at the start of a pcap file.
    pub fn new(mut input: R, limits: SourceLimits) -> Result<Self, SourceError> {
        let mut magic = [0u8; 4];
        input
            .read_exact(&mut magic)
            .map_err(|source| SourceError::Io { offset: 0, source })?;

        let (order, precision) = match magic {
            MAGIC_USEC_BE => (ByteOrder::Big, TsPrecision::Micro),
            MAGIC_USEC_LE => (ByteOrder::Little, TsPrecision::Micro),
            MAGIC_NSEC_BE => (ByteOrder::Big, TsPrecision::Nano),
            MAGIC_NSEC_LE => (ByteOrder::Little, TsPrecision::Nano),
            PCAPNG_MAGIC => return Err(SourceError::UnsupportedContainer),
            other => return Err(SourceError::BadMagic(other)),
        };

        // Remainder of the 24-byte global header: version (4), thiszone (4),
        // sigfigs (4), snaplen (4), network (4).
        let mut rest = [0u8; 20];
        input
            .read_exact(&mut rest)
            .map_err(|source| SourceError::Io { offset: 4, source })?;
        let link_type = read_u32(order, &rest[16..20]);

        tracing::debug!(
            byte_order = ?order,
            precision = ?precision,
            link_type,
            "opened pcap stream"
        );

        Ok(PcapReader {
            input,
            order,
            precision,
            link_type,
            offset: 24,
            limits,
            started: Instant::now(),
        })
    }

    /// Link-layer type from the global header.
    pub fn link_type(&self) -> u32 {
        self.link_type
    }

    /// Bytes consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.offset
    }

    /// Read the next record. `Ok(None)` at a clean end of file.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, SourceError> {
        self.check_limits()?;

        let mut header = [0u8; 16];
        match read_exact_or_eof(&mut self.input, &mut header) {
            Ok(ReadOutcome::Eof) => return Ok(None),
            Ok(ReadOutcome::Full) => {}
            Ok(ReadOutcome::Partial(n)) => {
                return Err(SourceError::InvalidFormat {
                    offset: self.offset + n as u64,
                    reason: "truncated record header".into(),
                })
            }
            Err(source) => {
                return Err(SourceError::Io {
                    offset: self.offset,
                    source,
                })
            }
        }

        let ts_sec = read_u32(self.order, &header[0..4]);
        let ts_frac = read_u32(self.order, &header[4..8]);
        let incl_len = read_u32(self.order, &header[8..12]);
        let orig_len = read_u32(self.order, &header[12..16]);
        let header_offset = self.offset;
        self.offset += 16;

        if incl_len > MAX_RECORD_BYTES {
            return Err(SourceError::InvalidFormat {
                offset: header_offset,
                reason: format!("record length {} exceeds {} bytes", incl_len, MAX_RECORD_BYTES),
            });
        }

        let mut frame = vec![0u8; incl_len as usize];
        self.input.read_exact(&mut frame).map_err(|source| {
            if source.kind() == std::io::ErrorKind::UnexpectedEof {
                SourceError::InvalidFormat {
                    offset: self.offset,
                    reason: format!("truncated record body (wanted {} bytes)", incl_len),
                }
            } else {
                SourceError::Io {
                    offset: self.offset,
                    source,
                }
            }
        })?;
        self.offset += incl_len as u64;

        let ts_seconds = match self.precision {
            TsPrecision::Micro => ts_sec as f64 + ts_frac as f64 * 1e-6,
            TsPrecision::Nano => ts_sec as f64 + ts_frac as f64 * 1e-9,
        };

        Ok(Some(Packet {
            ts_seconds,
            wire_len: orig_len,
            link_frame: frame,
        }))
    }

    fn check_limits(&self) -> Result<(), SourceError> {
        let max = self.limits.max_read_bytes;
        if max > 0 && self.offset > max {
            return Err(SourceError::Limit {
                what: format!("read {} bytes, budget {}", self.offset, max),
            });
        }
        let timeout = self.limits.read_timeout_secs;
        if timeout > 0.0 && self.started.elapsed().as_secs_f64() > timeout {
            return Err(SourceError::Limit {
                what: format!("read time exceeded {}s", timeout),
            });
        }
        Ok(())
    }
}

enum ReadOutcome {
    Full,
    Partial(usize),
    Eof,
}

/// `read_exact` that distinguishes a clean EOF at a record boundary from a
/// torn read in the middle of one.
fn read_exact_or_eof<R: Read>(input: &mut R, buf: &mut [u8]) -> std::io::Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Partial(filled)
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(ReadOutcome::Full)
}

fn read_u32(order: ByteOrder, bytes: &[u8]) -> u32 {
    let arr = [bytes[0], bytes[1], bytes[2], bytes[3]];
    match order {
        ByteOrder::Big => u32::from_be_bytes(arr),
        ByteOrder::Little => u32::from_le_bytes(arr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn global_header_le(link_type: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC_USEC_LE);
        out.extend_from_slice(&2u16.to_le_bytes()); // version major
        out.extend_from_slice(&4u16.to_le_bytes()); // version minor
        out.extend_from_slice(&0i32.to_le_bytes()); // thiszone
        out.extend_from_slice(&0u32.to_le_bytes()); // sigfigs
        out.extend_from_slice(&65535u32.to_le_bytes()); // snaplen
        out.extend_from_slice(&link_type.to_le_bytes());
        out
    }

    fn record_le(ts_sec: u32, ts_usec: u32, frame: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&ts_sec.to_le_bytes());
        out.extend_from_slice(&ts_usec.to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(frame);
        out
    }

    #[test]
    fn reads_little_endian_records() {
        let mut bytes = global_header_le(LINKTYPE_ETHERNET);
        bytes.extend(record_le(10, 500_000, &[0xaa; 60]));
        bytes.extend(record_le(11, 0, &[0xbb; 40]));

        let mut reader = PcapReader::new(Cursor::new(bytes), SourceLimits::default()).unwrap();
        assert_eq!(reader.link_type(), LINKTYPE_ETHERNET);

        let p1 = reader.next_packet().unwrap().unwrap();
        assert!((p1.ts_seconds - 10.5).abs() < 1e-9);
        assert_eq!(p1.wire_len, 60);
        assert_eq!(p1.link_frame.len(), 60);

        let p2 = reader.next_packet().unwrap().unwrap();
        assert!((p2.ts_seconds - 11.0).abs() < 1e-9);

        assert!(reader.next_packet().unwrap().is_none());
    }

    #[test]
    fn reads_big_endian_nanosecond_records() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC_NSEC_BE);
        bytes.extend_from_slice(&2u16.to_be_bytes());
        bytes.extend_from_slice(&4u16.to_be_bytes());
        bytes.extend_from_slice(&0i32.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(&65535u32.to_be_bytes());
        bytes.extend_from_slice(&1u32.to_be_bytes());
        // one record at t = 5 + 250ns
        bytes.extend_from_slice(&5u32.to_be_bytes());
        bytes.extend_from_slice(&250u32.to_be_bytes());
        bytes.extend_from_slice(&4u32.to_be_bytes());
        bytes.extend_from_slice(&4u32.to_be_bytes());
        bytes.extend_from_slice(&[1, 2, 3, 4]);

        let mut reader = PcapReader::new(Cursor::new(bytes), SourceLimits::default()).unwrap();
        let p = reader.next_packet().unwrap().unwrap();
        assert!((p.ts_seconds - 5.000_000_25).abs() < 1e-12);
    }

    #[test]
    fn rejects_pcapng() {
        let mut bytes = PCAPNG_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 28]);
        match PcapReader::new(Cursor::new(bytes), SourceLimits::default()) {
            Err(SourceError::UnsupportedContainer) => {}
            other => panic!("expected UnsupportedContainer, got {:?}", other.err()),
        }
    }

    #[test]
    fn rejects_unknown_magic() {
        let bytes = vec![0u8; 24];
        assert!(matches!(
            PcapReader::new(Cursor::new(bytes), SourceLimits::default()),
            Err(SourceError::BadMagic(_))
        ));
    }

    #[test]
    fn truncated_record_header_is_invalid_format() {
        let mut bytes = global_header_le(1);
        bytes.extend_from_slice(&[0u8; 7]); // half a record header
        let mut reader = PcapReader::new(Cursor::new(bytes), SourceLimits::default()).unwrap();
        assert!(matches!(
            reader.next_packet(),
            Err(SourceError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn truncated_record_body_is_invalid_format() {
        let mut bytes = global_header_le(1);
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&100u32.to_le_bytes()); // claims 100 bytes
        bytes.extend_from_slice(&100u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 10]); // delivers 10
        let mut reader = PcapReader::new(Cursor::new(bytes), SourceLimits::default()).unwrap();
        assert!(matches!(
            reader.next_packet(),
            Err(SourceError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn oversized_record_length_is_rejected() {
        let mut bytes = global_header_le(1);
        bytes.extend(record_le(0, 0, &[]));
        // Patch incl_len to something absurd.
        let len_at = 24 + 8;
        bytes[len_at..len_at + 4].copy_from_slice(&(MAX_RECORD_BYTES + 1).to_le_bytes());
        let mut reader = PcapReader::new(Cursor::new(bytes), SourceLimits::default()).unwrap();
        assert!(matches!(
            reader.next_packet(),
            Err(SourceError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn byte_budget_is_enforced() {
        let mut bytes = global_header_le(1);
        for i in 0..100 {
            bytes.extend(record_le(i, 0, &[0u8; 100]));
        }
        let limits = SourceLimits {
            max_read_bytes: 300,
            read_timeout_secs: 0.0,
        };
        let mut reader = PcapReader::new(Cursor::new(bytes), limits).unwrap();
        let mut result = Ok(());
        loop {
            match reader.next_packet() {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        assert!(matches!(result, Err(SourceError::Limit { .. })));
    }
}
