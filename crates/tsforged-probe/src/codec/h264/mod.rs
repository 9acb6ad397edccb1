//! H.264 (AVC) parameter sets
//!
//! - Sequence Parameter Set decoding into resolution, frame rate and
//!   profile metadata
//! - `avcC` decoder configuration records

mod avcc;
mod sps;

pub use avcc::build_avcc;
pub use sps::{parse_sps, H264Sps};

/// H.264 NAL unit types handled by the demuxer
pub mod nal_type {
    pub const NON_IDR_SLICE: u8 = 1;
    pub const IDR_SLICE: u8 = 5;
    pub const SEI: u8 = 6;
    pub const SPS: u8 = 7;
    pub const PPS: u8 = 8;
    pub const AUD: u8 = 9;
}
