//! H.264 Sequence Parameter Set (SPS) parsing

use tsforged_common::{FrameRate, SampleAspectRatio};

use crate::bitreader::BitReader;
use crate::codec::nal::ebsp_to_rbsp;
use crate::codec::{chroma_format_string, cropped_dimension, read_ue_max, sar_from_idc};
use crate::error::{ProbeError, Result};

/// Profiles that carry chroma format, bit depth and scaling matrices
const HIGH_PROFILES: [u8; 11] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 144];

/// Decoded H.264 Sequence Parameter Set
#[derive(Debug, Clone, PartialEq)]
pub struct H264Sps {
    /// RFC 6381 codec string, `avc1.PPCCLL`
    pub codec_mimetype: String,
    pub profile_idc: u8,
    pub level_idc: u8,
    /// Baseline, Main, High, ...
    pub profile_string: String,
    /// `level_idc / 10` with one decimal
    pub level_string: String,
    pub chroma_format_idc: u32,
    pub bit_depth_luma: u8,
    pub bit_depth_chroma: u8,
    /// max_num_ref_frames
    pub ref_frames: u32,
    pub chroma_format_string: String,
    /// Frame rate from VUI timing; `fps == 0` when timing is absent
    pub frame_rate: FrameRate,
    pub sar: SampleAspectRatio,
    /// Cropped coded size
    pub codec_width: u32,
    pub codec_height: u32,
    /// Width scaled by the sample aspect ratio
    pub present_width: u32,
    pub present_height: u32,
}

impl H264Sps {
    pub fn bit_depth(&self) -> u8 {
        self.bit_depth_luma
    }
}

/// Parse an SPS NAL unit (including its one-byte header)
pub fn parse_sps(data: &[u8]) -> Result<H264Sps> {
    if data.len() < 4 {
        return Err(ProbeError::malformed(format!(
            "H.264 SPS too short: {} bytes",
            data.len()
        )));
    }
    let codec_mimetype = format!("avc1.{:02x}{:02x}{:02x}", data[1], data[2], data[3]);

    let rbsp = ebsp_to_rbsp(data);
    let mut reader = BitReader::new(&rbsp);

    // NAL header
    reader.read_byte()?;
    let profile_idc = reader.read_byte()?;
    // constraint_set_flags + reserved_zero_2bits
    reader.read_byte()?;
    let level_idc = reader.read_byte()?;
    // seq_parameter_set_id
    reader.read_ue()?;

    let mut chroma_format_idc = 1;
    let mut bit_depth_luma = 8;
    let mut bit_depth_chroma = 8;

    if HIGH_PROFILES.contains(&profile_idc) {
        chroma_format_idc = reader.read_ue()?;
        if chroma_format_idc == 3 {
            // separate_colour_plane_flag
            reader.read_bits(1)?;
        }
        bit_depth_luma = read_ue_max(&mut reader, 6, "bit_depth_luma_minus8")? as u8 + 8;
        bit_depth_chroma = read_ue_max(&mut reader, 6, "bit_depth_chroma_minus8")? as u8 + 8;
        // qpprime_y_zero_transform_bypass_flag
        reader.read_bits(1)?;

        // seq_scaling_matrix_present_flag
        if reader.read_bool()? {
            let count = if chroma_format_idc != 3 { 8 } else { 12 };
            for i in 0..count {
                // seq_scaling_list_present_flag
                if reader.read_bool()? {
                    skip_scaling_list(&mut reader, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    // log2_max_frame_num_minus4
    reader.read_ue()?;
    let pic_order_cnt_type = reader.read_ue()?;
    if pic_order_cnt_type == 0 {
        // log2_max_pic_order_cnt_lsb_minus4
        reader.read_ue()?;
    } else if pic_order_cnt_type == 1 {
        reader.read_bits(1)?; // delta_pic_order_always_zero_flag
        reader.read_se()?; // offset_for_non_ref_pic
        reader.read_se()?; // offset_for_top_to_bottom_field
        let cycle = reader.read_ue()?;
        for _ in 0..cycle {
            reader.read_se()?; // offset_for_ref_frame
        }
    }

    let ref_frames = reader.read_ue()?;
    // gaps_in_frame_num_value_allowed_flag
    reader.read_bits(1)?;

    let pic_width_in_mbs_minus1 = reader.read_ue()?;
    let pic_height_in_map_units_minus1 = reader.read_ue()?;

    let frame_mbs_only_flag = reader.read_bits(1)?;
    if frame_mbs_only_flag == 0 {
        // mb_adaptive_frame_field_flag
        reader.read_bits(1)?;
    }
    // direct_8x8_inference_flag
    reader.read_bits(1)?;

    let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
    // frame_cropping_flag
    if reader.read_bool()? {
        crop_left = reader.read_ue()?;
        crop_right = reader.read_ue()?;
        crop_top = reader.read_ue()?;
        crop_bottom = reader.read_ue()?;
    }

    let mut sar = SampleAspectRatio::default();
    let mut frame_rate = FrameRate {
        fixed: true,
        fps: 0.0,
        fps_num: 0,
        fps_den: 0,
    };

    // vui_parameters_present_flag
    if reader.read_bool()? {
        // aspect_ratio_info_present_flag
        if reader.read_bool()? {
            let aspect_ratio_idc = reader.read_byte()?;
            if aspect_ratio_idc == 255 {
                // Extended_SAR
                sar.width = reader.read_bits(16)?;
                sar.height = reader.read_bits(16)?;
            } else if aspect_ratio_idc < 16 {
                if let Some(table) = sar_from_idc(aspect_ratio_idc) {
                    sar = table;
                }
            }
        }

        // overscan_info_present_flag
        if reader.read_bool()? {
            reader.read_bool()?; // overscan_appropriate_flag
        }
        // video_signal_type_present_flag
        if reader.read_bool()? {
            // video_format + video_full_range_flag
            reader.read_bits(4)?;
            // colour_description_present_flag
            if reader.read_bool()? {
                // colour_primaries, transfer_characteristics, matrix_coefficients
                reader.read_bits(24)?;
            }
        }
        // chroma_loc_info_present_flag
        if reader.read_bool()? {
            reader.read_ue()?; // chroma_sample_loc_type_top_field
            reader.read_ue()?; // chroma_sample_loc_type_bottom_field
        }
        // timing_info_present_flag
        if reader.read_bool()? {
            let num_units_in_tick = reader.read_bits(32)?;
            let time_scale = reader.read_bits(32)?;
            frame_rate.fixed = reader.read_bool()?;

            frame_rate.fps_num = time_scale;
            frame_rate.fps_den = num_units_in_tick.saturating_mul(2);
            if frame_rate.fps_den > 0 {
                frame_rate.fps = f64::from(frame_rate.fps_num) / f64::from(frame_rate.fps_den);
            }
        }
    }

    let (crop_unit_x, crop_unit_y) = if chroma_format_idc == 0 {
        (1, 2 - frame_mbs_only_flag)
    } else {
        let sub_wc = if chroma_format_idc == 3 { 1 } else { 2 };
        let sub_hc = if chroma_format_idc == 1 { 2 } else { 1 };
        (sub_wc, sub_hc * (2 - frame_mbs_only_flag))
    };

    let coded_width = macroblock_span(pic_width_in_mbs_minus1, 1)?;
    let coded_height = macroblock_span(pic_height_in_map_units_minus1, 2 - frame_mbs_only_flag)?;
    let codec_width = cropped_dimension(coded_width, (crop_left, crop_right), crop_unit_x)?;
    let codec_height = cropped_dimension(coded_height, (crop_top, crop_bottom), crop_unit_y)?;

    let present_width = if sar.width != 1 || sar.height != 1 {
        (f64::from(codec_width) * f64::from(sar.width) / f64::from(sar.height.max(1))).ceil() as u32
    } else {
        codec_width
    };

    Ok(H264Sps {
        codec_mimetype,
        profile_idc,
        level_idc,
        profile_string: profile_string(profile_idc).to_string(),
        level_string: format!("{:.1}", f64::from(level_idc) / 10.0),
        chroma_format_idc,
        bit_depth_luma,
        bit_depth_chroma,
        ref_frames,
        chroma_format_string: chroma_format_string(chroma_format_idc).to_string(),
        frame_rate,
        sar,
        codec_width,
        codec_height,
        present_width,
        present_height: codec_height,
    })
}

/// Luma samples covered by `minus1 + 1` macroblocks, doubled for field pairs
fn macroblock_span(minus1: u32, scale: u32) -> Result<u32> {
    minus1
        .checked_add(1)
        .and_then(|n| n.checked_mul(16 * scale))
        .ok_or_else(|| ProbeError::malformed(format!("{minus1} macroblocks overflow")))
}

fn skip_scaling_list(reader: &mut BitReader, count: usize) -> Result<()> {
    let mut last_scale: i32 = 8;
    let mut next_scale: i32 = 8;
    for _ in 0..count {
        if next_scale != 0 {
            let delta_scale = reader.read_se()?;
            next_scale = (last_scale + delta_scale + 256).rem_euclid(256);
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

fn profile_string(profile_idc: u8) -> &'static str {
    match profile_idc {
        66 => "Baseline",
        77 => "Main",
        88 => "Extended",
        100 => "High",
        110 => "High10",
        122 => "High422",
        244 => "High444",
        _ => "Unknown",
    }
}
