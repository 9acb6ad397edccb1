//! HEVCDecoderConfigurationRecord (`hvcC`) construction

use bytes::{BufMut, Bytes, BytesMut};

use super::pps::HevcPps;
use super::sps::HevcSps;
use super::vps::HevcVps;

/// NAL array entry: array_completeness = 1, NAL type, one unit
fn put_nal_array(buf: &mut BytesMut, nal_type: u8, nal: &[u8]) {
    buf.put_u8(0x80 | nal_type);
    buf.put_u16(1);
    buf.put_u16(nal.len() as u16);
    buf.put_slice(nal);
}

/// Build an `hvcC` record with one VPS, SPS and PPS array each
pub fn build_hvcc(
    vps: &[u8],
    sps: &[u8],
    pps: &[u8],
    vps_info: &HevcVps,
    sps_info: &HevcSps,
    pps_info: &HevcPps,
) -> Bytes {
    let general = &sps_info.general;
    let mut buf = BytesMut::with_capacity(23 + 15 + vps.len() + sps.len() + pps.len());

    buf.put_u8(1); // configurationVersion
    buf.put_u8(
        (general.profile_space & 0x03) << 6
            | u8::from(general.tier_flag) << 5
            | (general.profile_idc & 0x1f),
    );
    buf.put_slice(&general.profile_compatibility_flags);
    buf.put_slice(&general.constraint_indicator_flags);
    buf.put_u8(general.level_idc);

    let segmentation = sps_info.min_spatial_segmentation_idc;
    buf.put_u8(0xf0 | ((segmentation & 0x0f00) >> 8) as u8);
    buf.put_u8((segmentation & 0xff) as u8);
    buf.put_u8(0xfc | (pps_info.parallelism_type & 0x03));
    buf.put_u8(0xfc | (sps_info.chroma_format_idc as u8 & 0x03));
    buf.put_u8(0xf8 | (sps_info.bit_depth_luma_minus8 & 0x07));
    buf.put_u8(0xf8 | (sps_info.bit_depth_chroma_minus8 & 0x07));
    buf.put_u16(0); // avgFrameRate
    buf.put_u8(
        (sps_info.constant_frame_rate & 0x03) << 6
            | (vps_info.num_temporal_layers & 0x07) << 3
            | u8::from(vps_info.temporal_id_nested) << 2
            | 0x03, // lengthSizeMinusOne
    );
    buf.put_u8(3); // numOfArrays

    put_nal_array(&mut buf, 32, vps);
    put_nal_array(&mut buf, 33, sps);
    put_nal_array(&mut buf, 34, pps);

    buf.freeze()
}
