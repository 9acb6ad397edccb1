//! HEVC Sequence Parameter Set (SPS) parsing

use tsforged_common::{FrameRate, SampleAspectRatio};

use crate::bitreader::BitReader;
use crate::codec::nal::ebsp_to_rbsp;
use crate::codec::{chroma_format_string, cropped_dimension, read_ue_max, sar_from_idc};
use crate::error::Result;

/// General profile_tier_level fields, copied verbatim into `hvcC`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProfileTierLevel {
    pub profile_space: u8,
    pub tier_flag: bool,
    pub profile_idc: u8,
    pub profile_compatibility_flags: [u8; 4],
    pub constraint_indicator_flags: [u8; 6],
    pub level_idc: u8,
}

/// Decoded HEVC Sequence Parameter Set
#[derive(Debug, Clone, PartialEq)]
pub struct HevcSps {
    /// RFC 6381 codec string, `hvc1.P.1.LNN.B0`
    pub codec_mimetype: String,
    pub profile_string: String,
    /// `general_level_idc / 30` with one decimal
    pub level_string: String,
    pub general: ProfileTierLevel,
    pub chroma_format_idc: u32,
    pub chroma_format_string: String,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub min_spatial_segmentation_idc: u32,
    /// Always 1; the reference count is not tracked for HEVC
    pub ref_frames: u32,
    /// Always 0 in `hvcC`
    pub constant_frame_rate: u8,
    pub frame_rate: FrameRate,
    pub sar: SampleAspectRatio,
    pub codec_width: u32,
    pub codec_height: u32,
    pub present_width: u32,
    pub present_height: u32,
}

impl HevcSps {
    pub fn bit_depth(&self) -> u8 {
        self.bit_depth_luma_minus8 + 8
    }
}

/// Parse SPS NAL unit (including its two-byte header)
pub fn parse_sps(data: &[u8]) -> Result<HevcSps> {
    // Remove emulation prevention bytes for proper parsing
    let rbsp = ebsp_to_rbsp(data);
    let mut reader = BitReader::new(&rbsp);

    // NAL header (2 bytes)
    reader.read_bits(16)?;

    // sps_video_parameter_set_id (4 bits)
    reader.read_bits(4)?;

    // sps_max_sub_layers_minus1 (3 bits)
    let max_sub_layers_minus1 = reader.read_bits(3)? as u8;

    // sps_temporal_id_nesting_flag (1 bit)
    reader.read_bits(1)?;

    let general = parse_profile_tier_level(&mut reader, max_sub_layers_minus1)?;

    // sps_seq_parameter_set_id (ue(v))
    reader.read_ue()?;

    // chroma_format_idc (ue(v))
    let chroma_format_idc = reader.read_ue()?;
    if chroma_format_idc == 3 {
        // separate_colour_plane_flag (1 bit)
        reader.read_bits(1)?;
    }

    // pic_width_in_luma_samples (ue(v))
    let pic_width = reader.read_ue()?;
    // pic_height_in_luma_samples (ue(v))
    let pic_height = reader.read_ue()?;

    let (mut left, mut right, mut top, mut bottom) = (0, 0, 0, 0);
    // conformance_window_flag (1 bit)
    if reader.read_bool()? {
        left = reader.read_ue()?;
        right = reader.read_ue()?;
        top = reader.read_ue()?;
        bottom = reader.read_ue()?;
    }

    // bit_depth_luma_minus8 (ue(v))
    let bit_depth_luma_minus8 = read_ue_max(&mut reader, 8, "bit_depth_luma_minus8")? as u8;
    // bit_depth_chroma_minus8 (ue(v))
    let bit_depth_chroma_minus8 = read_ue_max(&mut reader, 8, "bit_depth_chroma_minus8")? as u8;
    // log2_max_pic_order_cnt_lsb_minus4 (ue(v))
    let log2_max_pic_order_cnt_lsb_minus4 = reader.read_ue()?;

    // sps_sub_layer_ordering_info_present_flag (1 bit)
    let start = if reader.read_bool()? {
        0
    } else {
        max_sub_layers_minus1
    };
    for _ in start..=max_sub_layers_minus1 {
        reader.read_ue()?; // sps_max_dec_pic_buffering_minus1
        reader.read_ue()?; // sps_max_num_reorder_pics
        reader.read_ue()?; // sps_max_latency_increase_plus1
    }

    // log2_min_luma_coding_block_size_minus3 (ue(v))
    reader.read_ue()?;
    // log2_diff_max_min_luma_coding_block_size (ue(v))
    reader.read_ue()?;
    // log2_min_luma_transform_block_size_minus2 (ue(v))
    reader.read_ue()?;
    // log2_diff_max_min_luma_transform_block_size (ue(v))
    reader.read_ue()?;
    // max_transform_hierarchy_depth_inter (ue(v))
    reader.read_ue()?;
    // max_transform_hierarchy_depth_intra (ue(v))
    reader.read_ue()?;

    // scaling_list_enabled_flag (1 bit)
    if reader.read_bool()? {
        // sps_scaling_list_data_present_flag (1 bit)
        if reader.read_bool()? {
            skip_scaling_list_data(&mut reader)?;
        }
    }

    // amp_enabled_flag (1 bit)
    reader.read_bits(1)?;
    // sample_adaptive_offset_enabled_flag (1 bit)
    reader.read_bits(1)?;

    // pcm_enabled_flag (1 bit)
    if reader.read_bool()? {
        reader.read_bits(4)?; // pcm_sample_bit_depth_luma_minus1
        reader.read_bits(4)?; // pcm_sample_bit_depth_chroma_minus1
        reader.read_ue()?; // log2_min_pcm_luma_coding_block_size_minus3
        reader.read_ue()?; // log2_diff_max_min_pcm_luma_coding_block_size
        reader.read_bits(1)?; // pcm_loop_filter_disabled_flag
    }

    // num_short_term_ref_pic_sets (ue(v))
    let num_short_term_ref_pic_sets =
        read_ue_max(&mut reader, 64, "num_short_term_ref_pic_sets")?;
    let mut num_delta_pocs = 0;
    for i in 0..num_short_term_ref_pic_sets {
        num_delta_pocs = skip_short_term_ref_pic_set(
            &mut reader,
            i,
            num_short_term_ref_pic_sets,
            num_delta_pocs,
        )?;
    }

    // long_term_ref_pics_present_flag (1 bit)
    if reader.read_bool()? {
        let num_long_term_ref_pics = reader.read_ue()?;
        for _ in 0..num_long_term_ref_pics {
            // lt_ref_pic_poc_lsb_sps (u(v))
            reader.skip_bits(u64::from(log2_max_pic_order_cnt_lsb_minus4) + 4)?;
            // used_by_curr_pic_lt_sps_flag (1 bit)
            reader.read_bits(1)?;
        }
    }

    // sps_temporal_mvp_enabled_flag (1 bit)
    reader.read_bits(1)?;
    // strong_intra_smoothing_enabled_flag (1 bit)
    reader.read_bits(1)?;

    let mut vui = Vui::default();
    // vui_parameters_present_flag (1 bit)
    if reader.read_bool()? {
        vui = parse_vui(&mut reader, max_sub_layers_minus1)?;
    }

    let sub_wc = if chroma_format_idc == 1 || chroma_format_idc == 2 { 2 } else { 1 };
    let sub_hc = if chroma_format_idc == 1 { 2 } else { 1 };
    let codec_width = cropped_dimension(pic_width, (left, right), sub_wc)?;
    let codec_height = cropped_dimension(pic_height, (top, bottom), sub_hc)?;

    let present_width = if vui.sar.width != 1 || vui.sar.height != 1 {
        (f64::from(codec_width) * f64::from(vui.sar.width) / f64::from(vui.sar.height.max(1)))
            .ceil() as u32
    } else {
        codec_width
    };

    Ok(HevcSps {
        codec_mimetype: format!(
            "hvc1.{}.1.L{}.B0",
            general.profile_idc, general.level_idc
        ),
        profile_string: profile_string(general.profile_idc).to_string(),
        level_string: format!("{:.1}", f64::from(general.level_idc) / 30.0),
        general,
        chroma_format_idc,
        chroma_format_string: chroma_format_string(chroma_format_idc).to_string(),
        bit_depth_luma_minus8,
        bit_depth_chroma_minus8,
        min_spatial_segmentation_idc: vui.min_spatial_segmentation_idc,
        ref_frames: 1,
        constant_frame_rate: 0,
        frame_rate: vui.frame_rate,
        sar: vui.sar,
        codec_width,
        codec_height,
        present_width,
        present_height: codec_height,
    })
}

/// Parse profile_tier_level structure
fn parse_profile_tier_level(
    reader: &mut BitReader,
    max_sub_layers_minus1: u8,
) -> Result<ProfileTierLevel> {
    let mut ptl = ProfileTierLevel {
        // general_profile_space (2 bits)
        profile_space: reader.read_bits(2)? as u8,
        // general_tier_flag (1 bit)
        tier_flag: reader.read_bool()?,
        // general_profile_idc (5 bits)
        profile_idc: reader.read_bits(5)? as u8,
        ..Default::default()
    };
    // general_profile_compatibility_flag[32]
    for flag in ptl.profile_compatibility_flags.iter_mut() {
        *flag = reader.read_byte()?;
    }
    // progressive/interlaced/non_packed/frame_only + reserved 44 bits
    for flag in ptl.constraint_indicator_flags.iter_mut() {
        *flag = reader.read_byte()?;
    }
    // general_level_idc (8 bits)
    ptl.level_idc = reader.read_byte()?;

    let mut sub_layer_profile_present = vec![false; max_sub_layers_minus1 as usize];
    let mut sub_layer_level_present = vec![false; max_sub_layers_minus1 as usize];

    for i in 0..max_sub_layers_minus1 as usize {
        sub_layer_profile_present[i] = reader.read_bool()?;
        sub_layer_level_present[i] = reader.read_bool()?;
    }

    if max_sub_layers_minus1 > 0 {
        for _ in max_sub_layers_minus1..8 {
            reader.read_bits(2)?; // reserved_zero_2bits
        }
    }

    for i in 0..max_sub_layers_minus1 as usize {
        if sub_layer_profile_present[i] {
            // profile space, tier, idc, compatibility, constraint flags (88 bits)
            reader.skip_bits(88)?;
        }
        if sub_layer_level_present[i] {
            reader.read_bits(8)?; // sub_layer_level_idc
        }
    }

    Ok(ptl)
}

fn skip_scaling_list_data(reader: &mut BitReader) -> Result<()> {
    for size_id in 0..4 {
        let matrix_count = if size_id == 3 { 2 } else { 6 };
        for _ in 0..matrix_count {
            // scaling_list_pred_mode_flag (1 bit)
            if !reader.read_bool()? {
                // scaling_list_pred_matrix_id_delta (ue(v))
                reader.read_ue()?;
            } else {
                let coef_num = 64.min(1 << (4 + (size_id << 1)));
                if size_id > 1 {
                    // scaling_list_dc_coef_minus8 (se(v))
                    reader.read_se()?;
                }
                for _ in 0..coef_num {
                    // scaling_list_delta_coef (se(v))
                    reader.read_se()?;
                }
            }
        }
    }
    Ok(())
}

/// Skip one st_ref_pic_set, returning its NumDeltaPocs
fn skip_short_term_ref_pic_set(
    reader: &mut BitReader,
    idx: u32,
    num_sets: u32,
    prev_num_delta_pocs: u32,
) -> Result<u32> {
    let inter_ref_pic_set_prediction_flag = idx != 0 && reader.read_bool()?;

    if inter_ref_pic_set_prediction_flag {
        if idx == num_sets {
            reader.read_ue()?; // delta_idx_minus1
        }
        reader.read_bits(1)?; // delta_rps_sign
        reader.read_ue()?; // abs_delta_rps_minus1

        let mut num_delta_pocs = 0;
        for _ in 0..=prev_num_delta_pocs {
            let used_by_curr_pic_flag = reader.read_bool()?;
            let use_delta_flag = !used_by_curr_pic_flag && reader.read_bool()?;
            if used_by_curr_pic_flag || use_delta_flag {
                num_delta_pocs += 1;
            }
        }
        return Ok(num_delta_pocs);
    }

    let num_negative_pics = read_ue_max(reader, 16, "num_negative_pics")?;
    let num_positive_pics = read_ue_max(reader, 16, "num_positive_pics")?;

    for _ in 0..num_negative_pics {
        reader.read_ue()?; // delta_poc_s0_minus1
        reader.read_bits(1)?; // used_by_curr_pic_s0_flag
    }
    for _ in 0..num_positive_pics {
        reader.read_ue()?; // delta_poc_s1_minus1
        reader.read_bits(1)?; // used_by_curr_pic_s1_flag
    }

    Ok(num_negative_pics + num_positive_pics)
}

/// VUI fields that feed track metadata
#[derive(Debug, Clone, Copy)]
struct Vui {
    sar: SampleAspectRatio,
    frame_rate: FrameRate,
    min_spatial_segmentation_idc: u32,
}

impl Default for Vui {
    fn default() -> Self {
        Self {
            sar: SampleAspectRatio::default(),
            frame_rate: FrameRate {
                fixed: false,
                fps: 1.0,
                fps_num: 1,
                fps_den: 1,
            },
            min_spatial_segmentation_idc: 0,
        }
    }
}

/// Parse VUI parameters
fn parse_vui(reader: &mut BitReader, max_sub_layers_minus1: u8) -> Result<Vui> {
    let mut vui = Vui::default();

    // aspect_ratio_info_present_flag (1 bit)
    if reader.read_bool()? {
        let aspect_ratio_idc = reader.read_byte()?;
        if aspect_ratio_idc == 255 {
            // Extended_SAR
            vui.sar.width = reader.read_bits(16)?;
            vui.sar.height = reader.read_bits(16)?;
        } else if let Some(sar) = sar_from_idc(aspect_ratio_idc) {
            vui.sar = sar;
        }
    }

    // overscan_info_present_flag (1 bit)
    if reader.read_bool()? {
        reader.read_bits(1)?; // overscan_appropriate_flag
    }

    // video_signal_type_present_flag (1 bit)
    if reader.read_bool()? {
        reader.read_bits(3)?; // video_format
        reader.read_bits(1)?; // video_full_range_flag
        // colour_description_present_flag (1 bit)
        if reader.read_bool()? {
            reader.read_bits(24)?; // colour_primaries, transfer, matrix
        }
    }

    // chroma_loc_info_present_flag (1 bit)
    if reader.read_bool()? {
        reader.read_ue()?;
        reader.read_ue()?;
    }

    // neutral_chroma_indication_flag, field_seq_flag, frame_field_info_present_flag
    reader.read_bits(3)?;

    // default_display_window_flag (1 bit)
    if reader.read_bool()? {
        for _ in 0..4 {
            reader.read_ue()?;
        }
    }

    // vui_timing_info_present_flag (1 bit)
    if reader.read_bool()? {
        let num_units_in_tick = reader.read_bits(32)?;
        let time_scale = reader.read_bits(32)?;
        vui.frame_rate.fps_den = num_units_in_tick;
        vui.frame_rate.fps_num = time_scale;
        if num_units_in_tick > 0 {
            vui.frame_rate.fps = f64::from(time_scale) / f64::from(num_units_in_tick);
        }

        // vui_poc_proportional_to_timing_flag (1 bit)
        if reader.read_bool()? {
            reader.read_ue()?; // vui_num_ticks_poc_diff_one_minus1
        }
        // vui_hrd_parameters_present_flag (1 bit)
        if reader.read_bool()? {
            if let Some(fixed) = skip_hrd_parameters(reader, max_sub_layers_minus1)? {
                vui.frame_rate.fixed = fixed;
            }
        }
    }

    // bitstream_restriction_flag (1 bit)
    if reader.read_bool()? {
        // tiles_fixed_structure, motion_vectors_over_pic_boundaries, restricted_ref_pic_lists
        reader.read_bits(3)?;
        vui.min_spatial_segmentation_idc = reader.read_ue()?;
        reader.read_ue()?; // max_bytes_per_pic_denom
        reader.read_ue()?; // max_bits_per_min_cu_denom
        reader.read_ue()?; // log2_max_mv_length_horizontal
        reader.read_ue()?; // log2_max_mv_length_vertical
    }

    Ok(vui)
}

/// Skip hrd_parameters with commonInfPresentFlag = 1.
///
/// Returns the fixed_pic_rate_general_flag of the highest sub-layer.
fn skip_hrd_parameters(reader: &mut BitReader, max_sub_layers_minus1: u8) -> Result<Option<bool>> {
    // nal_hrd_parameters_present_flag, vcl_hrd_parameters_present_flag
    let nal_hrd = reader.read_bool()?;
    let vcl_hrd = reader.read_bool()?;
    let mut sub_pic_hrd_params_present = false;

    if nal_hrd || vcl_hrd {
        sub_pic_hrd_params_present = reader.read_bool()?;
        if sub_pic_hrd_params_present {
            reader.read_bits(8)?; // tick_divisor_minus2
            reader.read_bits(5)?; // du_cpb_removal_delay_increment_length_minus1
            reader.read_bits(1)?; // sub_pic_cpb_params_in_pic_timing_sei_flag
            reader.read_bits(5)?; // dpb_output_delay_du_length_minus1
        }
        reader.read_bits(4)?; // bit_rate_scale
        reader.read_bits(4)?; // cpb_size_scale
        if sub_pic_hrd_params_present {
            reader.read_bits(4)?; // cpb_size_du_scale
        }
        reader.read_bits(5)?; // initial_cpb_removal_delay_length_minus1
        reader.read_bits(5)?; // au_cpb_removal_delay_length_minus1
        reader.read_bits(5)?; // dpb_output_delay_length_minus1
    }

    let mut fixed = None;
    for _ in 0..=max_sub_layers_minus1 {
        let fixed_pic_rate_general_flag = reader.read_bool()?;
        fixed = Some(fixed_pic_rate_general_flag);

        let fixed_pic_rate_within_cvs_flag =
            fixed_pic_rate_general_flag || reader.read_bool()?;

        let mut low_delay_hrd_flag = false;
        if fixed_pic_rate_within_cvs_flag {
            reader.read_ue()?; // elemental_duration_in_tc_minus1
        } else {
            low_delay_hrd_flag = reader.read_bool()?;
        }

        let mut cpb_cnt = 1;
        if !low_delay_hrd_flag {
            cpb_cnt = reader.read_ue()? + 1;
        }

        for present in [nal_hrd, vcl_hrd] {
            if !present {
                continue;
            }
            // sub_layer_hrd_parameters
            for _ in 0..cpb_cnt {
                reader.read_ue()?; // bit_rate_value_minus1
                reader.read_ue()?; // cpb_size_value_minus1
                if sub_pic_hrd_params_present {
                    reader.read_ue()?; // cpb_size_du_value_minus1
                    reader.read_ue()?; // bit_rate_du_value_minus1
                }
                reader.read_bits(1)?; // cbr_flag
            }
        }
    }

    Ok(fixed)
}

fn profile_string(profile_idc: u8) -> &'static str {
    match profile_idc {
        1 => "Main",
        2 => "Main10",
        3 => "MainSP",
        4 => "Rext",
        9 => "SCC",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Main 1920x1080 level 4.1 with two short-term RPS (one inter-predicted),
    /// long-term refs, and VUI timing plus NAL HRD parameters.
    const MAIN_1080P_SPS: [u8; 62] = [
        0x42, 0x01, 0x01, 0x01, 0x60, 0x00, 0x00, 0x03, 0x00, 0x90, 0x00, 0x00, 0x03, 0x00,
        0x00, 0x03, 0x00, 0x7b, 0xa0, 0x03, 0xc0, 0x80, 0x11, 0x07, 0xcb, 0x96, 0x57, 0x92,
        0x46, 0xd9, 0xbe, 0xb6, 0xe8, 0x17, 0xe0, 0x2d, 0x40, 0x40, 0x40, 0x41, 0x00, 0x00,
        0x03, 0x03, 0xe9, 0x00, 0x00, 0xea, 0x60, 0x60, 0x05, 0xef, 0x7e, 0x00, 0xfa, 0x40,
        0x0f, 0xa2, 0x8b, 0x41, 0x00, 0x82,
    ];

    #[test]
    fn test_main_1080p_sps() {
        let sps = parse_sps(&MAIN_1080P_SPS).unwrap();
        assert_eq!(sps.codec_mimetype, "hvc1.1.1.L123.B0");
        assert_eq!(sps.profile_string, "Main");
        assert_eq!(sps.level_string, "4.1");
        assert_eq!(sps.general.profile_compatibility_flags, [0x60, 0, 0, 0]);
        assert_eq!(sps.general.constraint_indicator_flags, [0x90, 0, 0, 0, 0, 0]);
        assert_eq!(sps.codec_width, 1920);
        assert_eq!(sps.codec_height, 1080);
        assert_eq!(sps.present_width, 1920);
        assert_eq!(sps.chroma_format_string, "4:2:0");
        assert_eq!(sps.bit_depth(), 8);
        assert_eq!(sps.frame_rate.fps_num, 60000);
        assert_eq!(sps.frame_rate.fps_den, 1001);
        assert!(sps.frame_rate.fixed);
        assert!((sps.frame_rate.fps - 59.94).abs() < 0.01);
        assert_eq!(sps.ref_frames, 1);
    }

    #[test]
    fn test_profile_strings() {
        assert_eq!(profile_string(1), "Main");
        assert_eq!(profile_string(2), "Main10");
        assert_eq!(profile_string(7), "Unknown");
    }

    #[test]
    fn test_truncated_sps() {
        assert!(parse_sps(&[0x42, 0x01, 0x01, 0x01]).is_err());
    }
}
