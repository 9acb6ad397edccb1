//! AAC elementary stream framing
//!
//! Two framings are supported: ADTS (fixed 7/9 byte headers) and LOAS/LATM
//! (AudioMuxElement with an in-band StreamMuxConfig). Both parsers yield raw
//! AAC frames and report a trailing partial frame separately so the caller
//! can prefix it to the next PES payload.

mod adts;
mod config;
mod loas;

use bytes::Bytes;

pub use adts::AdtsParser;
pub use config::AudioSpecificConfig;
pub use loas::{LoasParser, StreamMuxConfig};

/// MPEG-4 sampling frequencies by `sampling_frequency_index`
pub const SAMPLING_FREQUENCIES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Samples per AAC frame
pub const SAMPLES_PER_FRAME: u32 = 1024;

pub fn sampling_frequency(index: u8) -> Option<u32> {
    SAMPLING_FREQUENCIES.get(usize::from(index)).copied()
}

/// One raw AAC frame with the parameters of the header that carried it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AacFrame {
    pub audio_object_type: u8,
    pub sampling_freq_index: u8,
    pub sampling_frequency: u32,
    pub channel_config: u8,
    pub data: Bytes,
}

impl AacFrame {
    /// True when the stream parameters differ from `other`
    pub fn config_differs(&self, other: &AacFrame) -> bool {
        self.audio_object_type != other.audio_object_type
            || self.sampling_freq_index != other.sampling_freq_index
            || self.channel_config != other.channel_config
    }

    /// Frame duration in milliseconds
    pub fn duration_ms(&self) -> f64 {
        f64::from(SAMPLES_PER_FRAME) / f64::from(self.sampling_frequency.max(1)) * 1000.0
    }
}
