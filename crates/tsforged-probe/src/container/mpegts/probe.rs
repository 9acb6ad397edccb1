//! Transport stream sync detection

use super::{SYNC_BYTE, TS_PACKET_SIZE};

/// Packet strides tried in order
const CANDIDATE_PACKET_SIZES: [usize; 3] = [188, 192, 204];

/// Upper bound on the number of offsets scanned per stride
const PROBE_WINDOW: usize = 1000;

/// Outcome of [`probe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// Fewer bytes than three packets are available
    NeedMoreData,
    /// No stride produced three consecutive sync bytes
    NoMatch,
    Match {
        /// 188, 192 (M2TS) or 204 (Reed-Solomon)
        packet_size: usize,
        /// Offset of the first packet. For M2TS this points at the
        /// 4-byte timecode preceding the sync byte.
        sync_offset: usize,
    },
}

impl ProbeResult {
    pub fn is_match(&self) -> bool {
        matches!(self, ProbeResult::Match { .. })
    }
}

/// Look for the sync byte at a fixed stride across three consecutive packets.
pub fn probe(data: &[u8]) -> ProbeResult {
    if data.len() <= 3 * TS_PACKET_SIZE {
        return ProbeResult::NeedMoreData;
    }

    for packet_size in CANDIDATE_PACKET_SIZES {
        let window = PROBE_WINDOW.min(data.len().saturating_sub(3 * packet_size));
        let found = (0..window).find(|&i| {
            data[i] == SYNC_BYTE
                && data[i + packet_size] == SYNC_BYTE
                && data[i + 2 * packet_size] == SYNC_BYTE
        });

        if let Some(mut sync_offset) = found {
            match packet_size {
                192 if sync_offset >= 4 => {
                    tracing::debug!("ts_packet_size = 192, m2ts mode");
                    sync_offset -= 4;
                }
                204 => tracing::debug!("ts_packet_size = 204, RS encoded MPEG2-TS stream"),
                _ => {}
            }
            return ProbeResult::Match {
                packet_size,
                sync_offset,
            };
        }
    }

    ProbeResult::NoMatch
}
