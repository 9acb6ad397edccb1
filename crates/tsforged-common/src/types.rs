//! Sample, track, and track metadata types.
//!
//! Timestamps handed from the demuxer to the remuxer are integer
//! milliseconds; the remuxer writes fragments with a 1000 Hz timescale.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Elementary stream kind carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    /// Video elementary stream.
    Video,
    /// Audio elementary stream.
    Audio,
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// One length-prefixed NAL unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    /// NAL unit type.
    pub nal_type: u8,
    /// 4-byte big-endian length followed by the NAL payload.
    pub data: Bytes,
}

impl NalUnit {
    /// Wrap a raw NAL payload with a 4-byte length prefix.
    pub fn length_prefixed(nal_type: u8, payload: &[u8]) -> Self {
        let mut data = Vec::with_capacity(4 + payload.len());
        data.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        data.extend_from_slice(payload);
        Self {
            nal_type,
            data: Bytes::from(data),
        }
    }

    /// NAL payload without the length prefix.
    pub fn payload(&self) -> &[u8] {
        &self.data[4..]
    }
}

/// A demuxed video access unit.
#[derive(Debug, Clone)]
pub struct VideoSample {
    /// Length-prefixed NAL units of the access unit.
    pub units: Vec<NalUnit>,
    /// Total byte length of `units`.
    pub length: usize,
    pub is_keyframe: bool,
    /// Decode timestamp in milliseconds.
    pub dts: i64,
    /// Presentation timestamp in milliseconds.
    pub pts: i64,
    /// `pts - dts`.
    pub cts: i64,
    /// Byte offset of the TS packet that started this access unit.
    pub file_position: Option<u64>,
}

/// A demuxed audio frame.
#[derive(Debug, Clone)]
pub struct AudioSample {
    pub unit: Bytes,
    /// Decode timestamp in milliseconds; equal to the presentation timestamp.
    pub dts: i64,
    pub pts: i64,
}

impl AudioSample {
    pub fn len(&self) -> usize {
        self.unit.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unit.is_empty()
    }
}

/// A batch of samples for one stream.
#[derive(Debug, Clone)]
pub struct Track<S> {
    /// Track ID written into `tkhd`/`tfhd`.
    pub id: u32,
    /// Fragment sequence number for the next `mfhd`.
    pub sequence_number: u32,
    pub samples: Vec<S>,
    /// Total payload bytes in `samples`.
    pub length: usize,
}

impl<S> Track<S> {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            sequence_number: 0,
            samples: Vec::new(),
            length: 0,
        }
    }

    /// Take the current batch, leaving the track empty.
    pub fn take(&mut self) -> Track<S> {
        Track {
            id: self.id,
            sequence_number: self.sequence_number,
            samples: std::mem::take(&mut self.samples),
            length: std::mem::replace(&mut self.length, 0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

pub type VideoTrack = Track<VideoSample>;
pub type AudioTrack = Track<AudioSample>;

/// Exact frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameRate {
    pub fixed: bool,
    pub fps: f64,
    pub fps_num: u32,
    pub fps_den: u32,
}

impl Default for FrameRate {
    fn default() -> Self {
        Self {
            fixed: true,
            fps: 23.976,
            fps_num: 23976,
            fps_den: 1000,
        }
    }
}

/// Sample aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleAspectRatio {
    pub width: u32,
    pub height: u32,
}

impl Default for SampleAspectRatio {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
        }
    }
}

/// Decoder configuration record per video codec family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoCodecConfig {
    /// AVCDecoderConfigurationRecord (`avcC`).
    Avc { avcc: Bytes },
    /// HEVCDecoderConfigurationRecord (`hvcC`).
    Hevc { hvcc: Bytes },
}

/// Everything needed to write a video init segment.
#[derive(Debug, Clone)]
pub struct VideoTrackMetadata {
    pub id: u32,
    pub timescale: u32,
    pub duration: u64,
    /// RFC 6381 codec string, e.g. `avc1.64001f`.
    pub codec: String,
    pub codec_width: u32,
    pub codec_height: u32,
    pub present_width: u32,
    pub present_height: u32,
    pub profile: String,
    pub level: String,
    pub bit_depth: u8,
    pub chroma_format: String,
    pub ref_frames: u32,
    pub sar: SampleAspectRatio,
    pub frame_rate: FrameRate,
    /// Nominal frame duration in milliseconds.
    pub ref_sample_duration: f64,
    pub config: VideoCodecConfig,
}

/// Codec-specific audio configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioCodecConfig {
    /// AAC with an AudioSpecificConfig for `esds`.
    Aac {
        config: Bytes,
        /// Codec string of the object type found in the stream.
        original_codec: String,
    },
    /// MPEG-1/2 Layer III passthrough.
    Mp3,
}

/// Everything needed to write an audio init segment.
#[derive(Debug, Clone)]
pub struct AudioTrackMetadata {
    pub id: u32,
    pub timescale: u32,
    pub duration: u64,
    /// RFC 6381 codec string, e.g. `mp4a.40.5` or `mp3`.
    pub codec: String,
    pub sample_rate: u32,
    pub channel_count: u8,
    /// Frame duration in milliseconds; `None` for streams timed by their
    /// own timestamps.
    pub ref_sample_duration: Option<f64>,
    pub config: AudioCodecConfig,
}

impl AudioTrackMetadata {
    /// Codec string of the object type found in the stream.
    pub fn original_codec(&self) -> &str {
        match &self.config {
            AudioCodecConfig::Aac { original_codec, .. } => original_codec,
            AudioCodecConfig::Mp3 => "mp3",
        }
    }
}

/// Track metadata announced by the demuxer.
#[derive(Debug, Clone)]
pub enum TrackMetadata {
    Video(VideoTrackMetadata),
    Audio(AudioTrackMetadata),
}

impl TrackMetadata {
    pub fn track_type(&self) -> TrackType {
        match self {
            Self::Video(_) => TrackType::Video,
            Self::Audio(_) => TrackType::Audio,
        }
    }
}

/// PCM produced by an external audio decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Interleaved samples.
    pub pcm: Vec<f32>,
    pub sample_rate: u32,
    pub channel_count: u8,
    /// Presentation time of the frame in milliseconds.
    pub pts: f64,
}

/// Software decoder for audio codecs that cannot be packaged into fMP4.
pub trait AudioDecoder: Send {
    /// Decode one raw frame. Returns `None` when the frame yields no output.
    fn decode(&mut self, frame: &[u8]) -> Option<DecodedAudio>;

    /// Drop internal state; called on stream or codec switch.
    fn reset(&mut self);
}
