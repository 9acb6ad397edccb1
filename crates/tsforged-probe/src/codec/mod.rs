//! Codec parameter-set and frame-header parsers

pub mod aac;
pub mod h264;
pub mod hevc;
pub mod mpeg_audio;
pub mod nal;

use tsforged_common::SampleAspectRatio;

use crate::bitreader::BitReader;
use crate::error::{ProbeError, Result};

/// Largest coded width or height accepted from a parameter set, in luma samples
pub const MAX_CODED_DIMENSION: u32 = 1 << 15;

const SAR_WIDTHS: [u32; 16] = [1, 12, 10, 16, 40, 24, 20, 32, 80, 18, 15, 64, 160, 4, 3, 2];
const SAR_HEIGHTS: [u32; 16] = [1, 11, 11, 11, 33, 11, 11, 11, 33, 11, 11, 33, 99, 3, 2, 1];

/// Table E-1 sample aspect ratio for an `aspect_ratio_idc` in 1..=16
pub(crate) fn sar_from_idc(idc: u8) -> Option<SampleAspectRatio> {
    let index = usize::from(idc).checked_sub(1)?;
    Some(SampleAspectRatio {
        width: *SAR_WIDTHS.get(index)?,
        height: *SAR_HEIGHTS.get(index)?,
    })
}

/// `ue(v)` for a field whose legal range ends at `max`
pub(crate) fn read_ue_max(reader: &mut BitReader, max: u32, field: &str) -> Result<u32> {
    let value = reader.read_ue()?;
    if value > max {
        return Err(ProbeError::malformed(format!("{field} {value} exceeds {max}")));
    }
    Ok(value)
}

/// Coded size with its conformance crop removed, `coded - (start + end) * unit`
pub(crate) fn cropped_dimension(coded: u32, crop: (u32, u32), unit: u32) -> Result<u32> {
    if coded == 0 || coded > MAX_CODED_DIMENSION {
        return Err(ProbeError::malformed(format!(
            "coded dimension {coded} out of range"
        )));
    }
    let cropped = crop
        .0
        .checked_add(crop.1)
        .and_then(|c| c.checked_mul(unit))
        .and_then(|c| coded.checked_sub(c))
        .filter(|&size| size > 0);
    cropped.ok_or_else(|| {
        ProbeError::malformed(format!(
            "crop of {}+{} units removes the whole {coded} sample dimension",
            crop.0, crop.1
        ))
    })
}

pub(crate) fn chroma_format_string(chroma_format_idc: u32) -> &'static str {
    match chroma_format_idc {
        0 => "4:0:0",
        1 => "4:2:0",
        2 => "4:2:2",
        3 => "4:4:4",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sar_table() {
        assert_eq!(sar_from_idc(0), None);
        assert_eq!(sar_from_idc(2), Some(SampleAspectRatio { width: 12, height: 11 }));
        assert_eq!(sar_from_idc(16), Some(SampleAspectRatio { width: 2, height: 1 }));
        assert_eq!(sar_from_idc(17), None);
    }

    #[test]
    fn test_cropped_dimension() {
        assert_eq!(cropped_dimension(1088, (0, 4), 2).unwrap(), 1080);
        assert_eq!(cropped_dimension(1920, (0, 0), 1).unwrap(), 1920);
        assert!(cropped_dimension(0, (0, 0), 1).is_err());
        assert!(cropped_dimension(MAX_CODED_DIMENSION + 16, (0, 0), 1).is_err());
        assert!(cropped_dimension(64, (16, 16), 2).is_err());
        assert!(cropped_dimension(64, (u32::MAX, 1), 2).is_err());
        assert!(cropped_dimension(64, (u32::MAX / 2, 0), 4).is_err());
    }
}
