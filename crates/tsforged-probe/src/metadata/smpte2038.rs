//! SMPTE ST 2038 ancillary data packets carried in PES

use bytes::Bytes;
use serde::Serialize;

use crate::bitreader::BitReader;
use crate::error::Result;

/// One ancillary data packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AncillaryData {
    /// true for luma (Y), false for chroma (C)
    pub yc_indicator: bool,
    pub line_number: u16,
    pub horizontal_offset: u16,
    pub did: u8,
    pub sdid: u8,
    #[serde(skip)]
    pub user_data: Bytes,
    pub description: &'static str,
}

/// Known DID/SDID registrations
pub fn describe(did: u8, sdid: u8) -> &'static str {
    match (did, sdid) {
        (0x41, 0x07) => "SCTE-104",
        (0x5f, 0xdc) => "ARIB STD-B37 (1SEG)",
        (0x5f, 0xdd) => "ARIB STD-B37 (ANALOG)",
        (0x5f, 0xde) => "ARIB STD-B37 (SD)",
        (0x5f, 0xdf) => "ARIB STD-B37 (HD)",
        (0x61, 0x01) => "EIA-708",
        (0x61, 0x02) => "EIA-608",
        _ => "User Defined",
    }
}

/// Decode the ANC packets of a PES payload.
///
/// Parsing stops at the first packet not led by six zero bits or at the
/// end of the payload.
pub fn parse_ancillaries(data: &[u8]) -> Vec<AncillaryData> {
    let mut reader = BitReader::new(data);
    let mut ancillaries = Vec::new();

    loop {
        match parse_packet(&mut reader) {
            Ok(Some(anc)) => ancillaries.push(anc),
            Ok(None) => break,
            Err(e) => {
                if !ancillaries.is_empty() || reader.bits_remaining() > 0 {
                    tracing::trace!("SMPTE 2038 payload ended mid-packet: {}", e);
                }
                break;
            }
        }
    }

    ancillaries
}

fn parse_packet(reader: &mut BitReader) -> Result<Option<AncillaryData>> {
    if reader.read_bits(6)? != 0 {
        return Ok(None);
    }
    let yc_indicator = reader.read_bool()?;
    let line_number = reader.read_bits(11)? as u16;
    let horizontal_offset = reader.read_bits(12)? as u16;
    // 10-bit words carry 8 data bits plus parity
    let did = (reader.read_bits(10)? & 0xff) as u8;
    let sdid = (reader.read_bits(10)? & 0xff) as u8;
    let data_count = reader.read_bits(10)? & 0xff;

    let mut user_data = Vec::with_capacity(data_count as usize);
    for _ in 0..data_count {
        user_data.push((reader.read_bits(10)? & 0xff) as u8);
    }
    // checksum_word
    reader.read_bits(10)?;

    // stuffing to byte alignment
    let misalign = reader.bits_consumed() % 8;
    if misalign != 0 {
        reader.skip_bits(8 - misalign)?;
    }

    Ok(Some(AncillaryData {
        yc_indicator,
        line_number,
        horizontal_offset,
        did,
        sdid,
        user_data: Bytes::from(user_data),
        description: describe(did, sdid),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitstream_io::{BigEndian, BitWrite, BitWriter};

    fn anc_packet(w: &mut BitWriter<Vec<u8>, BigEndian>, did: u32, sdid: u32, words: &[u8]) {
        w.write(6, 0u32).unwrap();
        w.write_bit(false).unwrap();
        w.write(11, 9u32).unwrap();
        w.write(12, 0u32).unwrap();
        w.write(10, 0x200 | did).unwrap();
        w.write(10, 0x100 | sdid).unwrap();
        w.write(10, words.len() as u32).unwrap();
        for &b in words {
            w.write(10, u32::from(b)).unwrap();
        }
        w.write(10, 0x155u32).unwrap();
        while !w.byte_aligned() {
            w.write_bit(true).unwrap();
        }
    }

    #[test]
    fn test_caption_packets() {
        let mut w = BitWriter::endian(Vec::new(), BigEndian);
        anc_packet(&mut w, 0x61, 0x01, &[0x96, 0x69, 0x55]);
        anc_packet(&mut w, 0x41, 0x07, &[0x08]);
        w.write(8, 0xffu32).unwrap();
        let data = w.into_writer();

        let ancillaries = parse_ancillaries(&data);
        assert_eq!(ancillaries.len(), 2);
        assert_eq!(ancillaries[0].line_number, 9);
        assert_eq!(ancillaries[0].did, 0x61);
        assert_eq!(ancillaries[0].description, "EIA-708");
        assert_eq!(&ancillaries[0].user_data[..], &[0x96, 0x69, 0x55]);
        assert_eq!(ancillaries[1].description, "SCTE-104");
    }

    #[test]
    fn test_describe_unknown() {
        assert_eq!(describe(0x10, 0x20), "User Defined");
        assert_eq!(describe(0x5f, 0xdf), "ARIB STD-B37 (HD)");
    }
}
