//! PES and PSI section reassembly

use bytes::{Bytes, BytesMut};

use super::packet::TimestampClock;

/// stream_id values whose PES packets carry no optional header
const HEADERLESS_STREAM_IDS: [u8; 8] = [0xbc, 0xbe, 0xbf, 0xf0, 0xf1, 0xff, 0xf2, 0xf8];

/// Accumulates the payload of one PES packet or PSI section across
/// transport packets.
#[derive(Debug, Default)]
pub struct SliceQueue {
    data: BytesMut,
    /// Total length once known; 0 for unbounded video PES packets
    expected_length: usize,
    pub file_position: u64,
    pub random_access_indicator: bool,
}

impl SliceQueue {
    pub fn new(file_position: u64, random_access_indicator: bool) -> Self {
        Self {
            data: BytesMut::new(),
            expected_length: 0,
            file_position,
            random_access_indicator,
        }
    }

    pub fn total_length(&self) -> usize {
        self.data.len()
    }

    pub fn expected_length(&self) -> usize {
        self.expected_length
    }

    pub fn set_expected_length(&mut self, length: usize) {
        self.expected_length = length;
    }

    pub fn push(&mut self, slice: &[u8]) {
        self.data.extend_from_slice(slice);
    }

    /// Bytes still missing before the unit is complete
    pub fn remaining(&self) -> usize {
        self.expected_length.saturating_sub(self.data.len())
    }

    pub fn is_complete(&self) -> bool {
        self.expected_length > 0 && self.data.len() == self.expected_length
    }

    pub fn is_overrun(&self) -> bool {
        self.expected_length > 0 && self.data.len() > self.expected_length
    }

    /// Hand out the assembled bytes and reset.
    pub fn take(&mut self) -> Bytes {
        self.expected_length = 0;
        self.data.split().freeze()
    }

    pub fn clear(&mut self) {
        self.expected_length = 0;
        self.data.clear();
    }
}

/// A PES packet with its optional header decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PesPacket {
    pub stream_id: u8,
    /// Presentation timestamp in 90 kHz units, unwrapped
    pub pts: Option<u64>,
    /// Decode timestamp; equals `pts` when only a PTS is present
    pub dts: Option<u64>,
    pub payload: Bytes,
    /// True for stream ids without an optional PES header
    pub headerless: bool,
}

/// Errors that cause a reassembled PES packet to be skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PesError {
    StartCode(u32),
    Truncated,
    /// PES_packet_length shorter than the header it declares
    LengthMismatch,
}

impl std::fmt::Display for PesError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PesError::StartCode(code) => {
                write!(f, "packet_start_code_prefix should be 1 but with value {code}")
            }
            PesError::Truncated => write!(f, "PES header truncated"),
            PesError::LengthMismatch => {
                write!(f, "PES_packet_length < 3 + PES_header_data_length")
            }
        }
    }
}

pub fn start_code_prefix(data: &[u8]) -> Option<u32> {
    if data.len() < 3 {
        return None;
    }
    Some((u32::from(data[0]) << 16) | (u32::from(data[1]) << 8) | u32::from(data[2]))
}

/// Decode the header of a complete PES packet.
pub fn parse_pes(data: Bytes, clock: &TimestampClock) -> Result<PesPacket, PesError> {
    if data.len() < 6 {
        return Err(PesError::Truncated);
    }
    let prefix = start_code_prefix(&data).unwrap_or(0);
    if prefix != 1 {
        return Err(PesError::StartCode(prefix));
    }
    let stream_id = data[3];
    let pes_packet_length = usize::from(u16::from_be_bytes([data[4], data[5]]));

    if HEADERLESS_STREAM_IDS.contains(&stream_id) {
        let end = if pes_packet_length != 0 {
            (6 + pes_packet_length).min(data.len())
        } else {
            data.len()
        };
        return Ok(PesPacket {
            stream_id,
            pts: None,
            dts: None,
            payload: data.slice(6..end),
            headerless: true,
        });
    }

    if data.len() < 9 {
        return Err(PesError::Truncated);
    }
    let pts_dts_flags = (data[7] & 0xc0) >> 6;
    let header_data_length = usize::from(data[8]);

    let (mut pts, mut dts) = (None, None);
    if pts_dts_flags == 2 || pts_dts_flags == 3 {
        if data.len() < 14 {
            return Err(PesError::Truncated);
        }
        let p = clock.timestamp(&data[9..14]);
        pts = Some(p);
        dts = Some(p);
        if pts_dts_flags == 3 {
            if data.len() < 19 {
                return Err(PesError::Truncated);
            }
            dts = Some(clock.timestamp(&data[14..19]));
        }
    }

    let payload_start = 9 + header_data_length;
    let payload_length = if pes_packet_length != 0 {
        if pes_packet_length < 3 + header_data_length {
            return Err(PesError::LengthMismatch);
        }
        pes_packet_length - 3 - header_data_length
    } else {
        data.len().saturating_sub(payload_start)
    };
    let start = payload_start.min(data.len());
    let end = (payload_start + payload_length).min(data.len());

    Ok(PesPacket {
        stream_id,
        pts,
        dts,
        payload: data.slice(start..end),
        headerless: false,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn encode_timestamp(prefix: u8, ts: u64) -> [u8; 5] {
        [
            (prefix << 4) | (((ts >> 30) as u8 & 0x07) << 1) | 1,
            (ts >> 22) as u8,
            (((ts >> 15) as u8) << 1) | 1,
            (ts >> 7) as u8,
            ((ts as u8) << 1) | 1,
        ]
    }

    /// Build a PES packet; `bounded` writes a real PES_packet_length
    pub(crate) fn pes_packet(
        stream_id: u8,
        pts: Option<u64>,
        dts: Option<u64>,
        payload: &[u8],
        bounded: bool,
    ) -> Vec<u8> {
        let mut header = Vec::new();
        let flags = match (pts, dts) {
            (Some(p), Some(d)) if p != d => {
                header.extend_from_slice(&encode_timestamp(3, p));
                header.extend_from_slice(&encode_timestamp(1, d));
                0xc0
            }
            (Some(p), _) => {
                header.extend_from_slice(&encode_timestamp(2, p));
                0x80
            }
            _ => 0x00,
        };
        let length = if bounded { 3 + header.len() + payload.len() } else { 0 };
        let mut data = vec![
            0x00,
            0x00,
            0x01,
            stream_id,
            (length >> 8) as u8,
            length as u8,
            0x80,
            flags,
            header.len() as u8,
        ];
        data.extend_from_slice(&header);
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn test_pts_and_dts() {
        let data = pes_packet(0xe0, Some(183_003), Some(180_000), &[1, 2, 3], true);
        let pes = parse_pes(Bytes::from(data), &TimestampClock::default()).unwrap();
        assert_eq!(pes.pts, Some(183_003));
        assert_eq!(pes.dts, Some(180_000));
        assert_eq!(&pes.payload[..], &[1, 2, 3]);
    }

    #[test]
    fn test_pts_only_sets_dts() {
        let data = pes_packet(0xc0, Some(90_000), None, &[9; 10], false);
        let pes = parse_pes(Bytes::from(data), &TimestampClock::default()).unwrap();
        assert_eq!(pes.dts, Some(90_000));
        assert_eq!(pes.payload.len(), 10);
    }

    #[test]
    fn test_bad_start_code() {
        let mut data = pes_packet(0xe0, None, None, &[0; 4], true);
        data[2] = 0x02;
        assert_eq!(
            parse_pes(Bytes::from(data), &TimestampClock::default()),
            Err(PesError::StartCode(2))
        );
    }

    #[test]
    fn test_length_mismatch() {
        let mut data = pes_packet(0xe0, Some(0), None, &[0; 4], true);
        data[4] = 0;
        data[5] = 2;
        assert_eq!(
            parse_pes(Bytes::from(data), &TimestampClock::default()),
            Err(PesError::LengthMismatch)
        );
    }

    #[test]
    fn test_headerless_private_stream() {
        let data = vec![0x00, 0x00, 0x01, 0xbf, 0x00, 0x03, 0xaa, 0xbb, 0xcc, 0xdd];
        let pes = parse_pes(Bytes::from(data), &TimestampClock::default()).unwrap();
        assert!(pes.headerless);
        assert_eq!(&pes.payload[..], &[0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn test_slice_queue_completion() {
        let mut queue = SliceQueue::new(376, true);
        queue.set_expected_length(5);
        queue.push(&[1, 2]);
        assert!(!queue.is_complete());
        assert_eq!(queue.remaining(), 3);
        queue.push(&[3, 4, 5]);
        assert!(queue.is_complete());
        assert_eq!(&queue.take()[..], &[1, 2, 3, 4, 5]);
        assert_eq!(queue.total_length(), 0);
    }
}
