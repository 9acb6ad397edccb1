//! Container format detection and demuxing

pub mod mpegts;

use std::fmt;

pub use mpegts::{probe, ProbeResult};

/// Supported container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// ISO/IEC 13818-1 transport stream, 188-byte packets
    MpegTs,
    /// Blu-ray M2TS, 192-byte packets with a 4-byte timecode prefix
    M2ts,
    /// Transport stream with 16 trailing Reed-Solomon bytes per packet
    MpegTsRs,
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Container::MpegTs => write!(f, "MPEG-TS"),
            Container::M2ts => write!(f, "M2TS"),
            Container::MpegTsRs => write!(f, "MPEG-TS (RS)"),
        }
    }
}

/// Detect the container from the leading bytes of a stream.
///
/// Returns `None` when more data is needed or nothing matched.
pub fn detect_container(data: &[u8]) -> Option<Container> {
    match probe(data) {
        ProbeResult::Match { packet_size, .. } => Some(match packet_size {
            192 => Container::M2ts,
            204 => Container::MpegTsRs,
            _ => Container::MpegTs,
        }),
        ProbeResult::NeedMoreData | ProbeResult::NoMatch => None,
    }
}
