//! MPEG transport stream demuxing
//!
//! [`probe`] locks on to the packet stride, then [`TsDemuxer`] routes
//! packets by PID, reassembles PSI sections and PES packets, and turns
//! elementary stream payloads into samples and track metadata.

mod demuxer;
pub mod packet;
pub mod pes;
mod probe;
pub mod psi;
mod sink;

pub use demuxer::TsDemuxer;
pub use probe::{probe, ProbeResult};
pub use psi::{Pat, Pmt, StreamType};
pub use sink::DemuxSink;

/// Transport packet sync byte
pub const SYNC_BYTE: u8 = 0x47;

/// Size of a transport packet without M2TS or Reed-Solomon framing
pub const TS_PACKET_SIZE: usize = 188;

/// PES clock ticks per millisecond
pub const TIMESCALE_90KHZ: u64 = 90;
