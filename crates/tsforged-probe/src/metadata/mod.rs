//! Timed metadata carried alongside the audio and video streams.
//!
//! The demuxer does not interpret these payloads beyond framing. KLV
//! access units and SMPTE 2038 ancillary packets are split out; SCTE-35
//! sections and generic private data are passed through as raw bytes.

pub mod klv;
pub mod smpte2038;

use bytes::Bytes;
use serde::Serialize;

pub use klv::{parse_access_units, KlvAccessUnit};
pub use smpte2038::{parse_ancillaries, AncillaryData};

/// Descriptor loop of a private (`0x06`) PMT entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrivateDataDescriptor {
    pub pid: u16,
    pub stream_type: u8,
    #[serde(skip)]
    pub descriptor: Bytes,
}

/// A PES payload from an unrecognised private stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrivateData {
    pub pid: u16,
    pub stream_id: u8,
    pub len: usize,
    #[serde(skip)]
    pub data: Bytes,
    /// Presentation time in milliseconds, or the nearest known media time
    /// when the PES header carries none.
    pub pts: Option<i64>,
    pub dts: Option<i64>,
}

/// Synchronous KLV metadata (stream type `0x15`, format `KLVA`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SynchronousKlv {
    pub pid: u16,
    pub stream_id: u8,
    pub len: usize,
    #[serde(skip)]
    pub data: Bytes,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    #[serde(skip)]
    pub access_units: Vec<KlvAccessUnit>,
}

/// Asynchronous KLV metadata; carries no timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AsynchronousKlv {
    pub pid: u16,
    pub stream_id: u8,
    pub len: usize,
    #[serde(skip)]
    pub data: Bytes,
}

/// SMPTE ST 2038 ancillary data PES.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Smpte2038 {
    pub pid: u16,
    pub stream_id: u8,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub nearest_pts: Option<i64>,
    pub ancillaries: Vec<AncillaryData>,
    #[serde(skip)]
    pub data: Bytes,
    pub len: usize,
}

/// A raw SCTE-35 splice information section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scte35 {
    pub pid: u16,
    #[serde(skip)]
    pub data: Bytes,
    /// Nearest known media time in milliseconds at the time of arrival.
    pub nearest_pts: Option<i64>,
}

/// Any timed metadata event raised by the demuxer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimedMetadata {
    PrivateDataDescriptor(PrivateDataDescriptor),
    PrivateData(PrivateData),
    SynchronousKlv(SynchronousKlv),
    AsynchronousKlv(AsynchronousKlv),
    Smpte2038(Smpte2038),
    Scte35(Scte35),
}

impl TimedMetadata {
    /// PID the event was carried on.
    pub fn pid(&self) -> u16 {
        match self {
            Self::PrivateDataDescriptor(m) => m.pid,
            Self::PrivateData(m) => m.pid,
            Self::SynchronousKlv(m) => m.pid,
            Self::AsynchronousKlv(m) => m.pid,
            Self::Smpte2038(m) => m.pid,
            Self::Scte35(m) => m.pid,
        }
    }
}

impl TimedMetadata {
    /// Shift every timestamp back by `base` milliseconds so events line up
    /// with the remuxed media timeline.
    pub fn rebase(&mut self, base: i64) {
        let shift = |t: &mut Option<i64>| {
            if let Some(t) = t {
                *t -= base;
            }
        };
        match self {
            Self::PrivateData(m) => {
                shift(&mut m.pts);
                shift(&mut m.dts);
            }
            Self::SynchronousKlv(m) => {
                shift(&mut m.pts);
                shift(&mut m.dts);
            }
            Self::Smpte2038(m) => {
                shift(&mut m.pts);
                shift(&mut m.dts);
                shift(&mut m.nearest_pts);
            }
            Self::Scte35(m) => shift(&mut m.nearest_pts),
            Self::PrivateDataDescriptor(_) | Self::AsynchronousKlv(_) => {}
        }
    }
}
