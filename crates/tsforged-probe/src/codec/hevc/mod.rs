//! HEVC (H.265) parameter sets
//!
//! This module provides parsing of HEVC NAL units to extract:
//! - Video Parameter Set (VPS)
//! - Sequence Parameter Set (SPS)
//! - Picture Parameter Set (PPS)
//!
//! and builds the `hvcC` record that carries all three.

mod hvcc;
mod pps;
mod sps;
mod vps;

pub use hvcc::build_hvcc;
pub use pps::{parse_pps, HevcPps};
pub use sps::{parse_sps, HevcSps, ProfileTierLevel};
pub use vps::{parse_vps, HevcVps};

/// HEVC NAL unit types handled by the demuxer
pub mod nal_type {
    pub const IDR_W_RADL: u8 = 19;
    pub const IDR_N_LP: u8 = 20;
    pub const CRA_NUT: u8 = 21;
    pub const VPS: u8 = 32;
    pub const SPS: u8 = 33;
    pub const PPS: u8 = 34;
    pub const AUD: u8 = 35;
}

/// IRAP picture types treated as sync samples
pub fn is_keyframe(nal_type: u8) -> bool {
    matches!(
        nal_type,
        nal_type::IDR_W_RADL | nal_type::IDR_N_LP | nal_type::CRA_NUT
    )
}
