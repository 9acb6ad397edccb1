//! Annex-B byte stream scanning and emulation-prevention removal

use tsforged_common::NalUnit;

/// NAL header layout of the codec carried in the byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalFlavor {
    /// One-byte header, type in the low 5 bits
    H264,
    /// Two-byte header, type in bits 1..7 of the first byte
    H265,
}

impl NalFlavor {
    /// Extract the NAL unit type from the first header byte.
    pub fn nal_type(self, header: u8) -> u8 {
        match self {
            NalFlavor::H264 => header & 0x1f,
            NalFlavor::H265 => (header >> 1) & 0x3f,
        }
    }
}

/// Remove emulation prevention bytes (`00 00 03` -> `00 00`)
pub fn ebsp_to_rbsp(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut zeros = 0;

    for &byte in data {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        if byte == 0x00 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        result.push(byte);
    }

    result
}

/// Iterator over the NAL units of one Annex-B access unit payload.
///
/// Units are yielded with a 4-byte length prefix. Units with the forbidden
/// bit set are skipped, as are H.264 units of reserved types (14 and up).
pub struct AnnexBReader<'a> {
    data: &'a [u8],
    flavor: NalFlavor,
    current: usize,
    eof: bool,
}

impl<'a> AnnexBReader<'a> {
    pub fn new(data: &'a [u8], flavor: NalFlavor) -> Self {
        let mut reader = Self {
            data,
            flavor,
            current: 0,
            eof: false,
        };
        reader.current = reader.find_next_start_code(0);
        if reader.eof {
            tracing::trace!("no Annex-B start code in {} byte payload", data.len());
        }
        reader
    }

    fn find_next_start_code(&mut self, from: usize) -> usize {
        let data = self.data;
        let mut i = from;
        loop {
            if i + 3 >= data.len() {
                self.eof = true;
                return data.len();
            }
            let four = u32::from_be_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
            let three = four >> 8;
            if four == 1 || three == 1 {
                return i;
            }
            i += 1;
        }
    }

    fn start_code_len(&self, at: usize) -> usize {
        let d = self.data;
        if at + 3 < d.len() && d[at] == 0 && d[at + 1] == 0 && d[at + 2] == 0 && d[at + 3] == 1 {
            4
        } else {
            3
        }
    }

    fn is_rejected(&self, header: u8) -> bool {
        if header & 0x80 != 0 {
            return true;
        }
        self.flavor == NalFlavor::H264 && self.flavor.nal_type(header) >= 14
    }
}

impl Iterator for AnnexBReader<'_> {
    type Item = NalUnit;

    fn next(&mut self) -> Option<NalUnit> {
        while !self.eof {
            let start = self.current + self.start_code_len(self.current);
            let end = self.find_next_start_code(start);
            self.current = end;

            if start >= end {
                continue;
            }
            let payload = &self.data[start..end];
            if self.is_rejected(payload[0]) {
                continue;
            }
            return Some(NalUnit::length_prefixed(
                self.flavor.nal_type(payload[0]),
                payload,
            ));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ebsp_to_rbsp() {
        let data = [0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00, 0x03];
        assert_eq!(ebsp_to_rbsp(&data), vec![0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn test_ebsp_to_rbsp_passthrough() {
        let data = [0x67, 0x64, 0x00, 0x1f, 0x03];
        assert_eq!(ebsp_to_rbsp(&data), data.to_vec());
    }

    #[test]
    fn test_h264_units_with_mixed_start_codes() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x09, 0xf0, // AUD
            0x00, 0x00, 0x01, 0x67, 0x42, 0x1f, // SPS
            0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x00, // IDR slice
        ];
        let units: Vec<_> = AnnexBReader::new(&data, NalFlavor::H264).collect();
        assert_eq!(units.len(), 3);
        assert_eq!(units[0].nal_type, 9);
        assert_eq!(units[1].nal_type, 7);
        assert_eq!(units[1].payload(), &[0x67, 0x42, 0x1f]);
        assert_eq!(units[2].nal_type, 5);
        assert_eq!(&units[2].data[..4], &[0, 0, 0, 4]);
    }

    #[test]
    fn test_h264_reserved_and_forbidden_units_skipped() {
        let data = [
            0x00, 0x00, 0x01, 0x0e, 0xaa, // type 14, reserved
            0x00, 0x00, 0x01, 0x85, 0xbb, // forbidden bit
            0x00, 0x00, 0x01, 0x41, 0xcc, 0xdd,
        ];
        let units: Vec<_> = AnnexBReader::new(&data, NalFlavor::H264).collect();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].nal_type, 1);
    }

    #[test]
    fn test_h265_types() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x40, 0x01, 0x0c, // VPS
            0x00, 0x00, 0x01, 0x26, 0x01, 0xaf, 0x00, // IDR_W_RADL
        ];
        let units: Vec<_> = AnnexBReader::new(&data, NalFlavor::H265).collect();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].nal_type, 32);
        assert_eq!(units[1].nal_type, 19);
    }

    #[test]
    fn test_no_start_code() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9a];
        assert_eq!(AnnexBReader::new(&data, NalFlavor::H264).count(), 0);
    }
}
