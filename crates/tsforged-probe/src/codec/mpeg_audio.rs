//! MPEG-1/2/2.5 audio frame header parsing

use crate::error::{ProbeError, Result};

const MPEG1_RATES: [u32; 4] = [44100, 48000, 32000, 0];
const MPEG2_RATES: [u32; 4] = [22050, 24000, 16000, 0];
const MPEG25_RATES: [u32; 4] = [11025, 12000, 8000, 0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegLayer {
    Layer1,
    Layer2,
    Layer3,
}

impl MpegLayer {
    /// MPEG-4 object type indication used for this layer
    pub fn object_type(self) -> u8 {
        match self {
            MpegLayer::Layer1 => 32,
            MpegLayer::Layer2 => 33,
            MpegLayer::Layer3 => 34,
        }
    }
}

/// Fields of the first frame header in a PES payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpegAudioHeader {
    pub layer: MpegLayer,
    /// 0 when the rate index is reserved
    pub sample_rate: u32,
    pub channel_count: u8,
}

impl MpegAudioHeader {
    pub fn object_type(&self) -> u8 {
        self.layer.object_type()
    }
}

/// Parse the 4-byte frame header at the start of `data`
pub fn parse_header(data: &[u8]) -> Result<MpegAudioHeader> {
    if data.len() < 4 {
        return Err(ProbeError::malformed("MPEG audio header truncated"));
    }
    if data[0] != 0xff || data[1] & 0xe0 != 0xe0 {
        return Err(ProbeError::malformed(format!(
            "MPEG audio sync missing: {:02x}{:02x}",
            data[0], data[1]
        )));
    }

    let version = (data[1] >> 3) & 0x03;
    let layer_bits = (data[1] & 0x06) >> 1;
    let sample_rate_index = usize::from((data[2] & 0x0c) >> 2);
    let channel_mode = (data[3] >> 6) & 0x03;

    let sample_rate = match version {
        0 => MPEG25_RATES[sample_rate_index],
        2 => MPEG2_RATES[sample_rate_index],
        3 => MPEG1_RATES[sample_rate_index],
        _ => 0,
    };

    let layer = match layer_bits {
        2 => MpegLayer::Layer2,
        3 => MpegLayer::Layer1,
        _ => MpegLayer::Layer3,
    };

    Ok(MpegAudioHeader {
        layer,
        sample_rate,
        // channel_mode 3 is single channel
        channel_count: if channel_mode != 3 { 2 } else { 1 },
    })
}
