//! Movie fragment (moof) box builder.

use super::{begin_box, end_box};
use bytes::{BufMut, BytesMut};

/// Sample dependency flags, written to both `trun` and `sdtp`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleFlags {
    pub is_leading: u8,
    pub depends_on: u8,
    pub is_depended_on: u8,
    pub has_redundancy: u8,
    pub is_non_sync: bool,
}

impl SampleFlags {
    pub fn audio() -> Self {
        Self {
            depends_on: 1,
            ..Self::default()
        }
    }

    pub fn video(is_keyframe: bool) -> Self {
        if is_keyframe {
            Self {
                depends_on: 2,
                is_depended_on: 1,
                ..Self::default()
            }
        } else {
            Self {
                depends_on: 1,
                is_non_sync: true,
                ..Self::default()
            }
        }
    }

    /// 32-bit `sample_flags` field of a `trun` entry.
    pub fn to_trun_flags(self) -> u32 {
        (u32::from(self.is_leading) << 26)
            | (u32::from(self.depends_on) << 24)
            | (u32::from(self.is_depended_on) << 22)
            | (u32::from(self.has_redundancy) << 20)
            | (u32::from(self.is_non_sync) << 16)
    }

    /// One `sdtp` entry.
    pub fn to_sdtp_byte(self) -> u8 {
        (self.is_leading << 6)
            | (self.depends_on << 4)
            | (self.is_depended_on << 2)
            | self.has_redundancy
    }
}

/// One `trun` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fmp4Sample {
    /// Duration in timescale units.
    pub duration: u32,
    /// Payload size in bytes.
    pub size: u32,
    /// Composition offset (`pts - dts`).
    pub cts: i32,
    pub flags: SampleFlags,
}

/// Builder for moof boxes.
pub struct MoofBuilder {
    sequence_number: u32,
    track_id: u32,
    base_media_decode_time: u64,
}

impl MoofBuilder {
    /// Create a new moof builder.
    pub fn new(sequence_number: u32, track_id: u32) -> Self {
        Self {
            sequence_number,
            track_id,
            base_media_decode_time: 0,
        }
    }

    /// Set base media decode time.
    pub fn base_media_decode_time(mut self, time: u64) -> Self {
        self.base_media_decode_time = time;
        self
    }

    /// Build moof + mdat header for the given samples.
    ///
    /// Sample payloads must be appended to the returned buffer in the same
    /// order as `samples`.
    pub fn build(self, samples: &[Fmp4Sample]) -> BytesMut {
        let data_size: u64 = samples.iter().map(|s| u64::from(s.size)).sum();
        let mdat_header_size = if data_size + 8 > u64::from(u32::MAX) {
            16
        } else {
            8
        };

        let mut buf =
            BytesMut::with_capacity(128 + samples.len() * 17 + mdat_header_size + data_size as usize);

        let moof_start = begin_box(&mut buf, b"moof");

        // mfhd (movie fragment header)
        buf.put_u32(16);
        buf.put_slice(b"mfhd");
        buf.put_u32(0); // version/flags
        buf.put_u32(self.sequence_number);

        let traf_start = begin_box(&mut buf, b"traf");
        self.write_tfhd(&mut buf);
        self.write_tfdt(&mut buf);
        let data_offset_pos = self.write_trun(&mut buf, samples);
        self.write_sdtp(&mut buf, samples);
        end_box(&mut buf, traf_start);

        end_box(&mut buf, moof_start);

        // With default-base-is-moof, the offset is relative to the moof start
        let data_offset = (buf.len() - moof_start + mdat_header_size) as i32;
        buf[data_offset_pos..data_offset_pos + 4].copy_from_slice(&data_offset.to_be_bytes());

        if mdat_header_size == 16 {
            // Extended size
            buf.put_u32(1);
            buf.put_slice(b"mdat");
            buf.put_u64(data_size + 16);
        } else {
            buf.put_u32((data_size + 8) as u32);
            buf.put_slice(b"mdat");
        }

        buf
    }

    fn write_tfhd(&self, buf: &mut BytesMut) {
        // Flags: default-base-is-moof (0x020000)
        buf.put_u32(16);
        buf.put_slice(b"tfhd");
        buf.put_u32(0x020000); // version 0, flags
        buf.put_u32(self.track_id);
    }

    fn write_tfdt(&self, buf: &mut BytesMut) {
        // Version 1 for 64-bit decode time
        buf.put_u32(20);
        buf.put_slice(b"tfdt");
        buf.put_u32(0x01000000); // version 1
        buf.put_u64(self.base_media_decode_time);
    }

    /// Returns the position of the data offset field.
    fn write_trun(&self, buf: &mut BytesMut, samples: &[Fmp4Sample]) -> usize {
        // Flags:
        // 0x000001: data-offset-present
        // 0x000100: sample-duration-present
        // 0x000200: sample-size-present
        // 0x000400: sample-flags-present
        // 0x000800: sample-composition-time-offset-present
        let flags = 0x000001 | 0x000100 | 0x000200 | 0x000400 | 0x000800;

        let size = 12 + 4 + 4 + samples.len() * 16;
        buf.put_u32(size as u32);
        buf.put_slice(b"trun");
        buf.put_u32(0x01000000 | flags); // version 1, signed composition offsets
        buf.put_u32(samples.len() as u32);

        let data_offset_pos = buf.len();
        buf.put_u32(0); // placeholder

        for sample in samples {
            buf.put_u32(sample.duration);
            buf.put_u32(sample.size);
            buf.put_u32(sample.flags.to_trun_flags());
            buf.put_i32(sample.cts);
        }

        data_offset_pos
    }

    fn write_sdtp(&self, buf: &mut BytesMut, samples: &[Fmp4Sample]) {
        buf.put_u32((12 + samples.len()) as u32);
        buf.put_slice(b"sdtp");
        buf.put_u32(0); // version/flags
        for sample in samples {
            buf.put_u8(sample.flags.to_sdtp_byte());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Fmp4Sample> {
        vec![
            Fmp4Sample {
                duration: 40,
                size: 3,
                cts: 80,
                flags: SampleFlags::video(true),
            },
            Fmp4Sample {
                duration: 40,
                size: 2,
                cts: 0,
                flags: SampleFlags::video(false),
            },
        ]
    }

    fn read_u32(data: &[u8], pos: usize) -> u32 {
        u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap())
    }

    #[test]
    fn test_data_offset_points_at_payload() {
        let mut buf = MoofBuilder::new(7, 1)
            .base_media_decode_time(1000)
            .build(&samples());
        buf.put_slice(&[0xaa, 0xbb, 0xcc, 0x11, 0x22]);

        assert_eq!(&buf[4..8], b"moof");
        let moof_size = read_u32(&buf, 0) as usize;
        assert_eq!(&buf[moof_size + 4..moof_size + 8], b"mdat");
        assert_eq!(read_u32(&buf, moof_size), 8 + 5);

        let trun = buf.windows(4).position(|w| w == b"trun").unwrap() - 4;
        assert_eq!(read_u32(&buf, trun + 12), 2);
        let data_offset = read_u32(&buf, trun + 16) as usize;
        assert_eq!(&buf[data_offset..data_offset + 3], &[0xaa, 0xbb, 0xcc]);

        // mfhd sequence number
        assert_eq!(read_u32(&buf, 8 + 12), 7);
    }

    #[test]
    fn test_sample_flags() {
        let key = SampleFlags::video(true);
        assert_eq!(key.to_trun_flags(), 0x0240_0000);
        assert_eq!(key.to_sdtp_byte(), 0x24);

        let delta = SampleFlags::video(false);
        assert_eq!(delta.to_trun_flags(), 0x0101_0000);
        assert_eq!(delta.to_sdtp_byte(), 0x10);

        assert_eq!(SampleFlags::audio().to_trun_flags(), 0x0100_0000);
    }

    #[test]
    fn test_sdtp_follows_trun() {
        let buf = MoofBuilder::new(1, 2).build(&samples());
        let sdtp = buf.windows(4).position(|w| w == b"sdtp").unwrap() - 4;
        assert_eq!(read_u32(&buf, sdtp), 14);
        assert_eq!(&buf[sdtp + 12..sdtp + 14], &[0x24, 0x10]);
    }
}
