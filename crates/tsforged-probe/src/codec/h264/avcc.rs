//! AVCDecoderConfigurationRecord (`avcC`) construction

use bytes::{BufMut, Bytes, BytesMut};

use super::sps::H264Sps;

/// Profiles whose `avcC` carries no chroma/bit-depth trailer
const BASE_PROFILES: [u8; 3] = [66, 77, 88];

/// Build an `avcC` record from one raw SPS and one raw PPS.
///
/// High profiles get the trailing chroma_format/bit_depth fields with an
/// empty SPS extension table.
pub fn build_avcc(sps: &[u8], pps: &[u8], info: &H264Sps) -> Bytes {
    let mut buf = BytesMut::with_capacity(11 + sps.len() + pps.len() + 4);

    buf.put_u8(1); // configurationVersion
    buf.put_u8(sps.get(1).copied().unwrap_or(info.profile_idc));
    buf.put_u8(sps.get(2).copied().unwrap_or(0));
    buf.put_u8(sps.get(3).copied().unwrap_or(info.level_idc));
    buf.put_u8(0xff); // lengthSizeMinusOne = 3
    buf.put_u8(0xe1); // numOfSequenceParameterSets = 1
    buf.put_u16(sps.len() as u16);
    buf.put_slice(sps);
    buf.put_u8(1); // numOfPictureParameterSets
    buf.put_u16(pps.len() as u16);
    buf.put_slice(pps);

    if !BASE_PROFILES.contains(&info.profile_idc) {
        buf.put_u8(0xfc | (info.chroma_format_idc as u8 & 0x03));
        buf.put_u8(0xf8 | (info.bit_depth_luma.saturating_sub(8) & 0x07));
        buf.put_u8(0xf8 | (info.bit_depth_chroma.saturating_sub(8) & 0x07));
        buf.put_u8(0); // numOfSequenceParameterSetExt
    }

    buf.freeze()
}
