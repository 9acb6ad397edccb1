//! AudioSpecificConfig generation for `esds`

use bytes::Bytes;
use tsforged_common::AacSignalling;

use super::{sampling_frequency, AacFrame};

/// AudioSpecificConfig plus the codec strings it implies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub config: Bytes,
    pub sampling_rate: u32,
    pub channel_count: u8,
    /// Codec string of the signalled object type
    pub codec_mimetype: String,
    /// Codec string of the object type found in the stream
    pub original_codec_mimetype: String,
}

impl AudioSpecificConfig {
    /// Derive a config from a frame's header parameters.
    ///
    /// With [`AacSignalling::HeAac`] the config signals SBR (object type 5)
    /// with LC as the extension object type, so a later profile switch in the
    /// stream does not require a new init segment. Mono streams at 24 kHz and
    /// above fall back to plain LC.
    pub fn new(frame: &AacFrame, signalling: AacSignalling) -> Self {
        let sampling_index = frame.sampling_freq_index;
        let channel_config = frame.channel_config;

        let (audio_object_type, extension_sampling_index) = match signalling {
            AacSignalling::Lc => (2u8, sampling_index),
            AacSignalling::HeAac if sampling_index >= 6 => (5, sampling_index - 3),
            AacSignalling::HeAac if channel_config == 1 => (2, sampling_index),
            AacSignalling::HeAac => (5, sampling_index),
        };

        let mut config = vec![
            (audio_object_type << 3) | ((sampling_index & 0x0f) >> 1),
            ((sampling_index & 0x0f) << 7) | ((channel_config & 0x0f) << 3),
        ];
        if audio_object_type == 5 {
            config[1] |= (extension_sampling_index & 0x0f) >> 1;
            // extension object type forced to LC
            config.push(((extension_sampling_index & 0x01) << 7) | (2 << 2));
            config.push(0);
        }

        Self {
            config: Bytes::from(config),
            sampling_rate: sampling_frequency(sampling_index).unwrap_or(frame.sampling_frequency),
            channel_count: channel_config,
            codec_mimetype: format!("mp4a.40.{audio_object_type}"),
            original_codec_mimetype: format!("mp4a.40.{}", frame.audio_object_type),
        }
    }
}
