//! Transport packet headers, adaptation fields and the 90 kHz clock

/// Fixed transport packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub payload_unit_start_indicator: bool,
    pub pid: u16,
    pub adaptation_field_control: u8,
    pub continuity_counter: u8,
}

impl PacketHeader {
    /// Parse the four header bytes of a 188-byte packet starting at its
    /// sync byte.
    pub fn parse(packet: &[u8]) -> Self {
        Self {
            payload_unit_start_indicator: packet[1] & 0x40 != 0,
            pid: (u16::from(packet[1] & 0x1f) << 8) | u16::from(packet[2]),
            adaptation_field_control: (packet[3] & 0x30) >> 4,
            continuity_counter: packet[3] & 0x0f,
        }
    }

    pub fn has_adaptation_field(&self) -> bool {
        self.adaptation_field_control & 0x02 != 0
    }

    pub fn has_payload(&self) -> bool {
        self.adaptation_field_control & 0x01 != 0
    }
}

/// Adaptation field flags of interest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdaptationField {
    pub length: usize,
    pub discontinuity_indicator: bool,
    pub random_access_indicator: bool,
    pub elementary_stream_priority_indicator: bool,
    pub pcr_flag: bool,
}

impl AdaptationField {
    pub fn parse(packet: &[u8]) -> Self {
        let length = usize::from(packet[4]);
        if length == 0 {
            return Self::default();
        }
        let flags = packet[5];
        Self {
            length,
            discontinuity_indicator: flags & 0x80 != 0,
            random_access_indicator: flags & 0x40 != 0,
            elementary_stream_priority_indicator: flags & 0x20 != 0,
            pcr_flag: flags & 0x10 != 0,
        }
    }
}

const WRAP_33_BITS: u64 = 1 << 33;
const HALF_WRAP: u64 = 1 << 32;

/// Unwraps 33-bit PCR and PES timestamps against the last PCR base.
///
/// When a PCR base falls more than 2^32 ticks behind the previous one the
/// counter has wrapped; the offset grows by 2^33 and every later timestamp
/// is shifted by it.
#[derive(Debug, Clone, Default)]
pub struct TimestampClock {
    last_pcr_base: u64,
    offset: u64,
    /// Last program clock reference in 27 MHz units
    last_pcr: Option<u64>,
}

impl TimestampClock {
    /// Read the PCR of a packet whose adaptation field has the PCR flag set
    /// and record it.
    pub fn update_pcr(&mut self, packet: &[u8]) -> u64 {
        let raw = (u64::from(packet[6]) << 25)
            | (u64::from(packet[7]) << 17)
            | (u64::from(packet[8]) << 9)
            | (u64::from(packet[9]) << 1)
            | (u64::from(packet[10]) >> 7);
        let mut base = raw + self.offset;
        if base + HALF_WRAP < self.last_pcr_base {
            base += WRAP_33_BITS;
            self.offset += WRAP_33_BITS;
        }
        self.last_pcr_base = base;

        let extension = (u64::from(packet[10] & 0x01) << 8) | u64::from(packet[11]);
        let pcr = base * 300 + extension;
        self.last_pcr = Some(pcr);
        pcr
    }

    /// Decode a 5-byte PTS/DTS field in 90 kHz units.
    pub fn timestamp(&self, field: &[u8]) -> u64 {
        let raw = (u64::from(field[0] & 0x0e) << 29)
            | (u64::from(field[1]) << 22)
            | (u64::from(field[2] & 0xfe) << 14)
            | (u64::from(field[3]) << 7)
            | (u64::from(field[4]) >> 1);
        let mut ts = raw + self.offset;
        if ts + HALF_WRAP < self.last_pcr_base {
            ts += WRAP_33_BITS;
        }
        ts
    }

    pub fn last_pcr(&self) -> Option<u64> {
        self.last_pcr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode a PCR base (33 bits) and extension (9 bits) into packet bytes 6..12
    fn pcr_packet(base: u64, extension: u16) -> [u8; 12] {
        let mut p = [0u8; 12];
        p[6] = (base >> 25) as u8;
        p[7] = (base >> 17) as u8;
        p[8] = (base >> 9) as u8;
        p[9] = (base >> 1) as u8;
        p[10] = (((base & 1) as u8) << 7) | 0x7e | ((extension >> 8) as u8 & 1);
        p[11] = extension as u8;
        p
    }

    fn pts_field(ts: u64) -> [u8; 5] {
        [
            0x21 | (((ts >> 30) as u8 & 0x07) << 1),
            (ts >> 22) as u8,
            (((ts >> 15) as u8) << 1) | 1,
            (ts >> 7) as u8,
            ((ts as u8) << 1) | 1,
        ]
    }

    #[test]
    fn test_header_fields() {
        let header = PacketHeader::parse(&[0x47, 0x41, 0x00, 0x35]);
        assert!(header.payload_unit_start_indicator);
        assert_eq!(header.pid, 0x100);
        assert!(header.has_adaptation_field());
        assert!(header.has_payload());
        assert_eq!(header.continuity_counter, 5);
    }

    #[test]
    fn test_pcr_value() {
        let mut clock = TimestampClock::default();
        let pcr = clock.update_pcr(&pcr_packet(900_000, 123));
        assert_eq!(pcr, 900_000 * 300 + 123);
        assert_eq!(clock.last_pcr(), Some(pcr));
    }

    #[test]
    fn test_timestamp_decoding() {
        let clock = TimestampClock::default();
        let ts = (1u64 << 32) + 12_345;
        assert_eq!(clock.timestamp(&pts_field(ts)), ts);
    }

    #[test]
    fn test_wrap_adds_offset() {
        let mut clock = TimestampClock::default();
        clock.update_pcr(&pcr_packet(WRAP_33_BITS - 90_000, 0));
        // counter wrapped to a small value
        let base = clock.update_pcr(&pcr_packet(45_000, 0)) / 300;
        assert_eq!(base, WRAP_33_BITS + 45_000);
        assert_eq!(clock.timestamp(&pts_field(90_000)), WRAP_33_BITS + 90_000);
    }

    #[test]
    fn test_pts_ahead_of_wrapped_pcr() {
        let mut clock = TimestampClock::default();
        clock.update_pcr(&pcr_packet(WRAP_33_BITS - 9_000, 0));
        // PTS already wrapped while the PCR has not
        assert_eq!(clock.timestamp(&pts_field(18_000)), WRAP_33_BITS + 18_000);
    }
}
