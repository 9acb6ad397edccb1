//! KLV metadata access units (SMPTE RP 217 / ISO 13818-1 metadata AU cells)

use bytes::Bytes;

/// One metadata access unit cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KlvAccessUnit {
    pub service_id: u8,
    pub sequence_number: u8,
    pub flags: u8,
    pub data: Bytes,
}

/// Split a synchronous metadata PES payload into access unit cells.
///
/// A cell whose declared size runs past the payload is truncated.
pub fn parse_access_units(data: &[u8]) -> Vec<KlvAccessUnit> {
    let mut units = Vec::new();
    let mut offset = 0;

    while offset + 5 < data.len() {
        let au_size = usize::from(u16::from_be_bytes([data[offset + 3], data[offset + 4]]));
        let start = offset + 5;
        let end = (start + au_size).min(data.len());

        units.push(KlvAccessUnit {
            service_id: data[offset],
            sequence_number: data[offset + 1],
            flags: data[offset + 2],
            data: Bytes::copy_from_slice(&data[start..end]),
        });

        offset = start + au_size;
    }

    units
}
