//! Fragmented MP4 (fMP4) serialization.
//!
//! This module generates the two kinds of appendable fMP4 data:
//! - Init segment (ftyp + moov describing exactly one track)
//! - Fragments (moof + mdat for one batch of samples)
//!
//! Audio and video each get their own init segment so they can be appended
//! to separate buffers by the host.

mod moof;

pub use moof::{Fmp4Sample, MoofBuilder, SampleFlags};

use bytes::{BufMut, Bytes, BytesMut};
use tsforged_common::{
    AudioCodecConfig, AudioTrackMetadata, TrackMetadata, TrackType, VideoCodecConfig,
    VideoTrackMetadata,
};

use crate::error::{Error, Result};

/// Open a box with a placeholder size and return its start offset.
pub(crate) fn begin_box(buf: &mut BytesMut, kind: &[u8; 4]) -> usize {
    let start = buf.len();
    buf.put_u32(0); // placeholder size
    buf.put_slice(kind);
    start
}

/// Backpatch the size of the box opened at `start`.
pub(crate) fn end_box(buf: &mut BytesMut, start: usize) {
    let size = buf.len() - start;
    buf[start..start + 4].copy_from_slice(&(size as u32).to_be_bytes());
}

/// Initialization segment for one track.
#[derive(Debug, Clone)]
pub struct InitSegment {
    pub track_type: TrackType,
    /// Serialized ftyp + moov.
    pub data: Bytes,
    /// RFC 6381 codec string.
    pub codec: String,
    /// MIME container, `video/mp4` or `audio/mp4`.
    pub container: String,
    /// Track duration in milliseconds, 0 when unknown.
    pub media_duration: u64,
}

impl InitSegment {
    /// Serialize the init segment announced by `track`.
    pub fn from_metadata(track: &TrackMetadata) -> Result<Self> {
        let writer = InitWriter::new(track)?;
        let mut buf = BytesMut::with_capacity(1024);

        // ftyp box
        writer.write_ftyp(&mut buf);

        // moov box
        writer.write_moov(&mut buf);

        Ok(Self {
            track_type: track.track_type(),
            data: buf.freeze(),
            codec: writer.codec.to_string(),
            container: format!("{}/mp4", track.track_type()),
            media_duration: writer.duration,
        })
    }

    /// MIME type with the codecs parameter, as handed to a media sink.
    pub fn mime_type(&self) -> String {
        format!("{}; codecs=\"{}\"", self.container, self.codec)
    }
}

/// Sample description of the single track in the moov.
enum SampleEntry<'a> {
    Avc {
        meta: &'a VideoTrackMetadata,
        avcc: &'a [u8],
    },
    Hevc {
        meta: &'a VideoTrackMetadata,
        hvcc: &'a [u8],
    },
    Mp4a {
        meta: &'a AudioTrackMetadata,
        config: &'a [u8],
    },
    Mp3 {
        meta: &'a AudioTrackMetadata,
    },
}

struct InitWriter<'a> {
    track_id: u32,
    timescale: u32,
    duration: u64,
    codec: &'a str,
    entry: SampleEntry<'a>,
}

impl<'a> InitWriter<'a> {
    fn new(track: &'a TrackMetadata) -> Result<Self> {
        let track_type = track.track_type();
        let (track_id, timescale, duration, codec, entry) = match track {
            TrackMetadata::Video(meta) => {
                if meta.codec_width == 0 || meta.codec_height == 0 {
                    return Err(Error::invalid_track(
                        track_type,
                        format!("{}x{} picture", meta.codec_width, meta.codec_height),
                    ));
                }
                let entry = match &meta.config {
                    VideoCodecConfig::Avc { avcc } if !avcc.is_empty() => {
                        SampleEntry::Avc { meta, avcc: &avcc[..] }
                    }
                    VideoCodecConfig::Hevc { hvcc } if !hvcc.is_empty() => {
                        SampleEntry::Hevc { meta, hvcc: &hvcc[..] }
                    }
                    _ => {
                        return Err(Error::missing_config(
                            track_type,
                            "empty decoder configuration record",
                        ))
                    }
                };
                (meta.id, meta.timescale, meta.duration, &meta.codec, entry)
            }
            TrackMetadata::Audio(meta) => {
                if meta.sample_rate == 0 || meta.channel_count == 0 {
                    return Err(Error::invalid_track(
                        track_type,
                        format!(
                            "{} Hz with {} channels",
                            meta.sample_rate, meta.channel_count
                        ),
                    ));
                }
                let entry = match &meta.config {
                    AudioCodecConfig::Aac { config, .. } if !config.is_empty() => {
                        SampleEntry::Mp4a { meta, config: &config[..] }
                    }
                    AudioCodecConfig::Aac { .. } => {
                        return Err(Error::missing_config(
                            track_type,
                            "empty AudioSpecificConfig",
                        ))
                    }
                    AudioCodecConfig::Mp3 => SampleEntry::Mp3 { meta },
                };
                (meta.id, meta.timescale, meta.duration, &meta.codec, entry)
            }
        };

        if timescale == 0 {
            return Err(Error::invalid_track(track_type, "zero timescale"));
        }
        if track_id == 0 {
            return Err(Error::invalid_track(track_type, "track ID 0 is reserved"));
        }

        Ok(Self {
            track_id,
            timescale,
            duration,
            codec,
            entry,
        })
    }

    fn is_video(&self) -> bool {
        matches!(self.entry, SampleEntry::Avc { .. } | SampleEntry::Hevc { .. })
    }

    fn write_ftyp(&self, buf: &mut BytesMut) {
        // ftyp: isom, iso5, dash, mp42
        let brands = [b"isom", b"iso5", b"dash", b"mp42"];
        let size = 8 + 4 + 4 + brands.len() * 4;

        buf.put_u32(size as u32);
        buf.put_slice(b"ftyp");
        buf.put_slice(b"isom"); // major brand
        buf.put_u32(0x200); // minor version
        for brand in &brands {
            buf.put_slice(*brand);
        }
    }

    fn write_moov(&self, buf: &mut BytesMut) {
        let moov_start = begin_box(buf, b"moov");

        self.write_mvhd(buf);
        self.write_trak(buf);

        // mvex (movie extends for fragmented)
        let mvex_start = begin_box(buf, b"mvex");
        self.write_trex(buf);
        end_box(buf, mvex_start);

        end_box(buf, moov_start);
    }

    fn write_mvhd(&self, buf: &mut BytesMut) {
        buf.put_u32(120); // version 1
        buf.put_slice(b"mvhd");
        buf.put_u8(1); // version 1
        buf.put_slice(&[0, 0, 0]); // flags
        buf.put_u64(0); // creation time
        buf.put_u64(0); // modification time
        buf.put_u32(self.timescale);
        buf.put_u64(self.duration);
        buf.put_u32(0x00010000); // rate = 1.0
        buf.put_u16(0x0100); // volume = 1.0
        buf.put_u16(0); // reserved
        buf.put_u64(0); // reserved
        write_identity_matrix(buf);
        // Pre-defined (6 * 4 bytes)
        for _ in 0..6 {
            buf.put_u32(0);
        }
        buf.put_u32(self.track_id + 1); // next track ID
    }

    fn write_trak(&self, buf: &mut BytesMut) {
        let trak_start = begin_box(buf, b"trak");

        self.write_tkhd(buf);

        let mdia_start = begin_box(buf, b"mdia");
        self.write_mdhd(buf);
        if self.is_video() {
            write_hdlr(buf, b"vide", b"VideoHandler");
        } else {
            write_hdlr(buf, b"soun", b"SoundHandler");
        }
        self.write_minf(buf);
        end_box(buf, mdia_start);

        end_box(buf, trak_start);
    }

    fn write_tkhd(&self, buf: &mut BytesMut) {
        buf.put_u32(104); // version 1
        buf.put_slice(b"tkhd");
        buf.put_u8(1); // version 1
        buf.put_slice(&[0, 0, 7]); // flags: enabled, in_movie, in_preview
        buf.put_u64(0); // creation time
        buf.put_u64(0); // modification time
        buf.put_u32(self.track_id);
        buf.put_u32(0); // reserved
        buf.put_u64(self.duration);
        buf.put_u64(0); // reserved
        buf.put_u16(0); // layer
        buf.put_u16(0); // alternate group
        buf.put_u16(if self.is_video() { 0 } else { 0x0100 }); // volume
        buf.put_u16(0); // reserved
        write_identity_matrix(buf);
        // Presentation size (16.16 fixed point)
        match self.entry {
            SampleEntry::Avc { meta, .. } | SampleEntry::Hevc { meta, .. } => {
                buf.put_u32(meta.present_width << 16);
                buf.put_u32(meta.present_height << 16);
            }
            _ => {
                buf.put_u32(0);
                buf.put_u32(0);
            }
        }
    }

    fn write_mdhd(&self, buf: &mut BytesMut) {
        buf.put_u32(44); // version 1
        buf.put_slice(b"mdhd");
        buf.put_u8(1); // version 1
        buf.put_slice(&[0, 0, 0]); // flags
        buf.put_u64(0); // creation time
        buf.put_u64(0); // modification time
        buf.put_u32(self.timescale);
        buf.put_u64(self.duration);
        buf.put_u16(0x55C4); // language: und
        buf.put_u16(0); // pre_defined
    }

    fn write_minf(&self, buf: &mut BytesMut) {
        let minf_start = begin_box(buf, b"minf");

        if self.is_video() {
            buf.put_u32(20);
            buf.put_slice(b"vmhd");
            buf.put_u32(1); // version/flags
            buf.put_u16(0); // graphics mode
            buf.put_slice(&[0; 6]); // opcolor
        } else {
            buf.put_u32(16);
            buf.put_slice(b"smhd");
            buf.put_u32(0); // version/flags
            buf.put_u16(0); // balance
            buf.put_u16(0); // reserved
        }

        write_dinf(buf);

        let stbl_start = begin_box(buf, b"stbl");
        self.write_stsd(buf);
        // Sample tables stay empty, samples live in fragments
        write_empty_table(buf, b"stts");
        write_empty_table(buf, b"stsc");
        buf.put_u32(20);
        buf.put_slice(b"stsz");
        buf.put_u32(0); // version/flags
        buf.put_u32(0); // sample size
        buf.put_u32(0); // sample count
        write_empty_table(buf, b"stco");
        end_box(buf, stbl_start);

        end_box(buf, minf_start);
    }

    fn write_stsd(&self, buf: &mut BytesMut) {
        let stsd_start = begin_box(buf, b"stsd");
        buf.put_u32(0); // version/flags
        buf.put_u32(1); // entry count

        match self.entry {
            SampleEntry::Avc { meta, avcc } => write_visual_entry(buf, b"avc1", b"avcC", meta, avcc),
            SampleEntry::Hevc { meta, hvcc } => {
                write_visual_entry(buf, b"hvc1", b"hvcC", meta, hvcc)
            }
            SampleEntry::Mp4a { meta, config } => {
                let entry_start = begin_box(buf, b"mp4a");
                write_audio_entry_fields(buf, meta);
                write_esds(buf, config);
                end_box(buf, entry_start);
            }
            SampleEntry::Mp3 { meta } => {
                let entry_start = begin_box(buf, b".mp3");
                write_audio_entry_fields(buf, meta);
                end_box(buf, entry_start);
            }
        }

        end_box(buf, stsd_start);
    }

    fn write_trex(&self, buf: &mut BytesMut) {
        buf.put_u32(32);
        buf.put_slice(b"trex");
        buf.put_u32(0); // version/flags
        buf.put_u32(self.track_id);
        buf.put_u32(1); // default sample description index
        buf.put_u32(0); // default sample duration
        buf.put_u32(0); // default sample size
        buf.put_u32(0x00010001); // default sample flags: non-sync
    }
}

fn write_identity_matrix(buf: &mut BytesMut) {
    for value in [0x00010000, 0, 0, 0, 0x00010000, 0, 0, 0, 0x40000000u32] {
        buf.put_u32(value);
    }
}

fn write_hdlr(buf: &mut BytesMut, handler: &[u8; 4], name: &[u8]) {
    let size = 32 + name.len() + 1;
    buf.put_u32(size as u32);
    buf.put_slice(b"hdlr");
    buf.put_u32(0); // version/flags
    buf.put_u32(0); // pre_defined
    buf.put_slice(handler);
    buf.put_slice(&[0; 12]); // reserved
    buf.put_slice(name);
    buf.put_u8(0); // null terminator
}

fn write_dinf(buf: &mut BytesMut) {
    buf.put_u32(36);
    buf.put_slice(b"dinf");

    buf.put_u32(28);
    buf.put_slice(b"dref");
    buf.put_u32(0); // version/flags
    buf.put_u32(1); // entry count

    buf.put_u32(12);
    buf.put_slice(b"url ");
    buf.put_u32(1); // flags: self-contained
}

fn write_empty_table(buf: &mut BytesMut, kind: &[u8; 4]) {
    buf.put_u32(16);
    buf.put_slice(kind);
    buf.put_u32(0); // version/flags
    buf.put_u32(0); // entry count
}

fn write_visual_entry(
    buf: &mut BytesMut,
    kind: &[u8; 4],
    config_kind: &[u8; 4],
    meta: &VideoTrackMetadata,
    config: &[u8],
) {
    let entry_start = begin_box(buf, kind);
    buf.put_slice(&[0; 6]); // reserved
    buf.put_u16(1); // data reference index
    buf.put_u16(0); // pre_defined
    buf.put_u16(0); // reserved
    buf.put_slice(&[0; 12]); // pre_defined
    buf.put_u16(meta.codec_width as u16);
    buf.put_u16(meta.codec_height as u16);
    buf.put_u32(0x00480000); // horiz resolution 72 dpi
    buf.put_u32(0x00480000); // vert resolution 72 dpi
    buf.put_u32(0); // reserved
    buf.put_u16(1); // frame count
    buf.put_slice(&[0; 32]); // compressor name
    buf.put_u16(0x0018); // depth
    buf.put_i16(-1); // pre_defined

    buf.put_u32((8 + config.len()) as u32);
    buf.put_slice(config_kind);
    buf.put_slice(config);

    end_box(buf, entry_start);
}

fn write_audio_entry_fields(buf: &mut BytesMut, meta: &AudioTrackMetadata) {
    buf.put_slice(&[0; 6]); // reserved
    buf.put_u16(1); // data reference index
    buf.put_u32(0); // reserved
    buf.put_u32(0); // reserved
    buf.put_u16(u16::from(meta.channel_count));
    buf.put_u16(16); // sample size
    buf.put_u16(0); // pre_defined
    buf.put_u16(0); // reserved
    // 16.16 fixed point, integer part truncated to 16 bits
    buf.put_u32((meta.sample_rate & 0xffff) << 16);
}

fn write_esds(buf: &mut BytesMut, config: &[u8]) {
    let config_len = config.len() as u8;
    let esds_start = begin_box(buf, b"esds");
    buf.put_u32(0); // version/flags

    // ES_Descriptor
    buf.put_u8(0x03);
    buf.put_u8(0x17 + config_len);
    buf.put_u16(1); // ES_ID
    buf.put_u8(0); // stream priority

    // DecoderConfigDescriptor
    buf.put_u8(0x04);
    buf.put_u8(0x0f + config_len);
    buf.put_u8(0x40); // object type: MPEG-4 audio
    buf.put_u8(0x15); // stream type: audio
    buf.put_slice(&[0; 3]); // buffer size
    buf.put_u32(0); // max bitrate
    buf.put_u32(0); // avg bitrate

    // DecoderSpecificInfo
    buf.put_u8(0x05);
    buf.put_u8(config_len);
    buf.put_slice(config);

    // SLConfigDescriptor
    buf.put_slice(&[0x06, 0x01, 0x02]);

    end_box(buf, esds_start);
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tsforged_common::{FrameRate, SampleAspectRatio};

    fn video_meta(config: VideoCodecConfig) -> TrackMetadata {
        TrackMetadata::Video(VideoTrackMetadata {
            id: 1,
            timescale: 1000,
            duration: 60_000,
            codec: "avc1.64001f".to_string(),
            codec_width: 1280,
            codec_height: 720,
            present_width: 1280,
            present_height: 720,
            profile: "High".to_string(),
            level: "3.1".to_string(),
            bit_depth: 8,
            chroma_format: "4:2:0".to_string(),
            ref_frames: 4,
            sar: SampleAspectRatio::default(),
            frame_rate: FrameRate::default(),
            ref_sample_duration: 41.7,
            config,
        })
    }

    fn audio_meta(config: AudioCodecConfig) -> TrackMetadata {
        TrackMetadata::Audio(AudioTrackMetadata {
            id: 2,
            timescale: 1000,
            duration: 0,
            codec: "mp4a.40.2".to_string(),
            sample_rate: 48000,
            channel_count: 2,
            ref_sample_duration: Some(21.333),
            config,
        })
    }

    fn find_box<'a>(data: &'a [u8], kind: &[u8; 4]) -> Option<&'a [u8]> {
        data.windows(4)
            .position(|w| w == kind)
            .filter(|&pos| pos >= 4)
            .map(|pos| {
                let size = u32::from_be_bytes(data[pos - 4..pos].try_into().unwrap()) as usize;
                &data[pos - 4..pos - 4 + size]
            })
    }

    #[test]
    fn test_avc_init_segment() {
        let avcc = Bytes::from_static(&[0x01, 0x64, 0x00, 0x1f, 0xff, 0xe1, 0x00, 0x00]);
        let init = InitSegment::from_metadata(&video_meta(VideoCodecConfig::Avc {
            avcc: avcc.clone(),
        }))
        .unwrap();

        assert_eq!(init.track_type, TrackType::Video);
        assert_eq!(init.container, "video/mp4");
        assert_eq!(init.mime_type(), "video/mp4; codecs=\"avc1.64001f\"");
        assert_eq!(init.media_duration, 60_000);
        assert_eq!(&init.data[4..8], b"ftyp");

        // moov spans the rest of the segment
        let moov = find_box(&init.data, b"moov").unwrap();
        assert_eq!(moov.len(), init.data.len() - 32);

        let avcc_box = find_box(&init.data, b"avcC").unwrap();
        assert_eq!(&avcc_box[8..], &avcc[..]);
        assert!(find_box(&init.data, b"vmhd").is_some());

        let tkhd = find_box(&init.data, b"tkhd").unwrap();
        let width = u32::from_be_bytes(tkhd[tkhd.len() - 8..tkhd.len() - 4].try_into().unwrap());
        assert_eq!(width >> 16, 1280);
    }

    #[test]
    fn test_hevc_uses_hvc1_entry() {
        let init = InitSegment::from_metadata(&video_meta(VideoCodecConfig::Hevc {
            hvcc: Bytes::from_static(&[0x01, 0x01, 0x60]),
        }))
        .unwrap();
        assert!(find_box(&init.data, b"hvc1").is_some());
        assert!(find_box(&init.data, b"hvcC").is_some());
        assert!(find_box(&init.data, b"avc1").is_none());
    }

    #[test]
    fn test_aac_esds_layout() {
        let config = Bytes::from_static(&[0x11, 0x90]);
        let init = InitSegment::from_metadata(&audio_meta(AudioCodecConfig::Aac {
            config,
            original_codec: "mp4a.40.2".to_string(),
        }))
        .unwrap();

        assert_eq!(init.container, "audio/mp4");
        let esds = find_box(&init.data, b"esds").unwrap();
        // ES_Descriptor length covers the nested descriptors
        assert_eq!(esds[12], 0x03);
        assert_eq!(esds[13], 0x17 + 2);
        assert_eq!(&esds[esds.len() - 5..], &[0x11, 0x90, 0x06, 0x01, 0x02]);

        let trex = find_box(&init.data, b"trex").unwrap();
        assert_eq!(&trex[12..16], &2u32.to_be_bytes());
    }

    #[test]
    fn test_mp3_entry_has_no_esds() {
        let init = InitSegment::from_metadata(&audio_meta(AudioCodecConfig::Mp3)).unwrap();
        assert!(find_box(&init.data, b".mp3").is_some());
        assert!(find_box(&init.data, b"esds").is_none());
        assert!(find_box(&init.data, b"smhd").is_some());
    }

    #[test]
    fn test_rejects_incomplete_metadata() {
        let empty = video_meta(VideoCodecConfig::Avc { avcc: Bytes::new() });
        assert_matches!(
            InitSegment::from_metadata(&empty),
            Err(Error::MissingConfig {
                track: TrackType::Video,
                ..
            })
        );

        let mut no_rate = audio_meta(AudioCodecConfig::Mp3);
        if let TrackMetadata::Audio(meta) = &mut no_rate {
            meta.sample_rate = 0;
        }
        assert_matches!(
            InitSegment::from_metadata(&no_rate),
            Err(Error::InvalidTrack { .. })
        );
    }
}
