//! HEVC Video Parameter Set (VPS) parsing

use crate::bitreader::BitReader;
use crate::codec::nal::ebsp_to_rbsp;
use crate::error::Result;

/// Fields of the VPS needed for `hvcC`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HevcVps {
    /// vps_max_sub_layers_minus1 + 1
    pub num_temporal_layers: u8,
    pub temporal_id_nested: bool,
}

/// Parse a VPS NAL unit (including its two-byte header)
pub fn parse_vps(data: &[u8]) -> Result<HevcVps> {
    let rbsp = ebsp_to_rbsp(data);
    let mut reader = BitReader::new(&rbsp);

    // NAL header (2 bytes)
    reader.read_bits(16)?;

    // vps_video_parameter_set_id (4 bits)
    reader.read_bits(4)?;
    // vps_base_layer_internal_flag + vps_base_layer_available_flag (2 bits)
    reader.read_bits(2)?;
    // vps_max_layers_minus1 (6 bits)
    reader.read_bits(6)?;
    // vps_max_sub_layers_minus1 (3 bits)
    let max_sub_layers_minus1 = reader.read_bits(3)? as u8;
    // vps_temporal_id_nesting_flag (1 bit)
    let temporal_id_nested = reader.read_bool()?;

    Ok(HevcVps {
        num_temporal_layers: max_sub_layers_minus1 + 1,
        temporal_id_nested,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vps() {
        // id 0, flags 11, max_layers 0, sub_layers_minus1 2, nesting 1
        let data = [0x40, 0x01, 0x0c, 0x05, 0xff, 0xff];
        let vps = parse_vps(&data).unwrap();
        assert_eq!(vps.num_temporal_layers, 3);
        assert!(vps.temporal_id_nested);
    }

    #[test]
    fn test_truncated_vps() {
        assert!(parse_vps(&[0x40, 0x01, 0x0c]).is_err());
    }
}
