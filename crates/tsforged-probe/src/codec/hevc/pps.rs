//! HEVC Picture Parameter Set (PPS) parsing

use crate::bitreader::BitReader;
use crate::codec::nal::ebsp_to_rbsp;
use crate::error::Result;

/// Fields of the PPS needed for `hvcC`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HevcPps {
    /// 0 mixed, 1 slice, 2 tile, 3 wavefront
    pub parallelism_type: u8,
}

/// Parse a PPS NAL unit (including its two-byte header)
pub fn parse_pps(data: &[u8]) -> Result<HevcPps> {
    let rbsp = ebsp_to_rbsp(data);
    let mut reader = BitReader::new(&rbsp);

    // NAL header (2 bytes)
    reader.read_bits(16)?;

    reader.read_ue()?; // pps_pic_parameter_set_id
    reader.read_ue()?; // pps_seq_parameter_set_id
    reader.read_bits(1)?; // dependent_slice_segments_enabled_flag
    reader.read_bits(1)?; // output_flag_present_flag
    reader.read_bits(3)?; // num_extra_slice_header_bits
    reader.read_bits(1)?; // sign_data_hiding_enabled_flag
    reader.read_bits(1)?; // cabac_init_present_flag
    reader.read_ue()?; // num_ref_idx_l0_default_active_minus1
    reader.read_ue()?; // num_ref_idx_l1_default_active_minus1
    reader.read_se()?; // init_qp_minus26
    reader.read_bits(1)?; // constrained_intra_pred_flag
    reader.read_bits(1)?; // transform_skip_enabled_flag

    // cu_qp_delta_enabled_flag (1 bit)
    if reader.read_bool()? {
        reader.read_ue()?; // diff_cu_qp_delta_depth
    }

    reader.read_se()?; // pps_cb_qp_offset
    reader.read_se()?; // pps_cr_qp_offset
    reader.read_bits(1)?; // pps_slice_chroma_qp_offsets_present_flag
    reader.read_bits(1)?; // weighted_pred_flag
    reader.read_bits(1)?; // weighted_bipred_flag
    reader.read_bits(1)?; // transquant_bypass_enabled_flag

    let tiles_enabled = reader.read_bool()?;
    let entropy_coding_sync_enabled = reader.read_bool()?;

    let parallelism_type = match (entropy_coding_sync_enabled, tiles_enabled) {
        (true, true) => 0,
        (true, false) => 3,
        (false, true) => 2,
        (false, false) => 1,
    };

    Ok(HevcPps { parallelism_type })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_parallelism() {
        // ids 0/0, all flags clear, init_qp 0, cb/cr 0
        let data = [0x44, 0x01, 0xc0, 0x71, 0x81];
        let pps = parse_pps(&data).unwrap();
        assert_eq!(pps.parallelism_type, 1);
    }

    #[test]
    fn test_wavefront_parallelism() {
        let data = [0x44, 0x01, 0xc0, 0x71, 0x83];
        assert_eq!(parse_pps(&data).unwrap().parallelism_type, 3);
    }
}
