//! Program Specific Information: PAT and PMT sections

use std::collections::HashMap;

use bytes::Bytes;

/// Elementary stream types recognised in a PMT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Mpeg1Audio,
    Mpeg2Audio,
    PesPrivateData,
    AdtsAac,
    LoasAac,
    Metadata,
    H264,
    H265,
    Scte35,
    Other(u8),
}

impl From<u8> for StreamType {
    fn from(value: u8) -> Self {
        match value {
            0x03 => StreamType::Mpeg1Audio,
            0x04 => StreamType::Mpeg2Audio,
            0x06 => StreamType::PesPrivateData,
            0x0f => StreamType::AdtsAac,
            0x11 => StreamType::LoasAac,
            0x15 => StreamType::Metadata,
            0x1b => StreamType::H264,
            0x24 => StreamType::H265,
            0x86 => StreamType::Scte35,
            other => StreamType::Other(other),
        }
    }
}

impl StreamType {
    pub fn as_u8(self) -> u8 {
        match self {
            StreamType::Mpeg1Audio => 0x03,
            StreamType::Mpeg2Audio => 0x04,
            StreamType::PesPrivateData => 0x06,
            StreamType::AdtsAac => 0x0f,
            StreamType::LoasAac => 0x11,
            StreamType::Metadata => 0x15,
            StreamType::H264 => 0x1b,
            StreamType::H265 => 0x24,
            StreamType::Scte35 => 0x86,
            StreamType::Other(v) => v,
        }
    }
}

/// Program Association Table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pat {
    pub version_number: u8,
    pub network_pid: Option<u16>,
    /// program_number -> PMT PID, in section order
    pub programs: Vec<(u16, u16)>,
}

impl Pat {
    /// First program listed, with its PMT PID
    pub fn first_program(&self) -> Option<(u16, u16)> {
        self.programs.first().copied()
    }
}

/// PIDs of the primary audio and video elementary streams
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommonPids {
    pub h264: Option<u16>,
    pub h265: Option<u16>,
    pub adts_aac: Option<u16>,
    pub loas_aac: Option<u16>,
    pub mp3: Option<u16>,
}

impl CommonPids {
    pub fn has_video(&self) -> bool {
        self.h264.is_some() || self.h265.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.adts_aac.is_some() || self.loas_aac.is_some() || self.mp3.is_some()
    }

    fn video_pid(&self) -> Option<u16> {
        self.h264.or(self.h265)
    }

    fn audio_pid(&self) -> Option<u16> {
        self.adts_aac.or(self.loas_aac).or(self.mp3)
    }

    /// True when `pid` carries the selected audio or video stream
    pub fn contains(&self, pid: u16) -> bool {
        self.video_pid() == Some(pid) || self.audio_pid() == Some(pid)
    }
}

/// Descriptor loop of a private data stream, reported as-is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateStreamDescriptor {
    pub pid: u16,
    pub stream_type: u8,
    pub descriptor: Bytes,
}

/// Program Map Table of the selected program
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pmt {
    pub program_number: u16,
    pub version_number: u8,
    pub pcr_pid: u16,
    pub pid_stream_type: HashMap<u16, StreamType>,
    pub common_pids: CommonPids,
    pub pes_private_data_pids: Vec<u16>,
    pub synchronous_klv_pids: Vec<u16>,
    pub asynchronous_klv_pids: Vec<u16>,
    pub smpte2038_pids: Vec<u16>,
    pub scte35_pids: Vec<u16>,
}

impl Pmt {
    pub fn stream_type(&self, pid: u16) -> Option<StreamType> {
        self.pid_stream_type.get(&pid).copied()
    }

    pub fn is_scte35(&self, pid: u16) -> bool {
        self.scte35_pids.contains(&pid)
    }

    /// True when the demuxer reassembles PES packets on `pid`
    pub fn is_demuxed(&self, pid: u16) -> bool {
        self.common_pids.contains(pid)
            || self.pes_private_data_pids.contains(&pid)
            || self.synchronous_klv_pids.contains(&pid)
            || self.asynchronous_klv_pids.contains(&pid)
    }
}

fn section_header(data: &[u8], table_id: u8, name: &str) -> Option<(usize, u16, u8, bool, u8)> {
    if data.len() < 8 {
        tracing::warn!("{name} section truncated: {} bytes", data.len());
        return None;
    }
    if data[0] != table_id {
        tracing::error!("table_id {} does not identify a {name}", data[0]);
        return None;
    }
    let section_length = (usize::from(data[1] & 0x0f) << 8) | usize::from(data[2]);
    let id = u16::from_be_bytes([data[3], data[4]]);
    let version_number = (data[5] & 0x3e) >> 1;
    let current_next_indicator = data[5] & 0x01 == 1;
    let section_number = data[6];
    Some((section_length, id, version_number, current_next_indicator, section_number))
}

/// Parse a complete PAT section. Only the current, first section is
/// returned; other sections are ignored.
pub fn parse_pat(data: &[u8]) -> Option<Pat> {
    let (section_length, _transport_stream_id, version_number, current_next, section_number) =
        section_header(data, 0x00, "PAT")?;
    if !current_next || section_number != 0 {
        return None;
    }

    let mut pat = Pat {
        version_number,
        ..Default::default()
    };

    // program loop between the 8-byte header and the CRC
    let end = (8 + section_length.saturating_sub(9)).min(data.len());
    let mut i = 8;
    while i + 4 <= end {
        let program_number = u16::from_be_bytes([data[i], data[i + 1]]);
        let pid = (u16::from(data[i + 2] & 0x1f) << 8) | u16::from(data[i + 3]);
        if program_number == 0 {
            pat.network_pid = Some(pid);
        } else {
            pat.programs.push((program_number, pid));
        }
        i += 4;
    }

    Some(pat)
}

fn registration(descriptors: &[u8], tag: u8) -> Option<[u8; 4]> {
    let mut i = 0;
    while i + 2 <= descriptors.len() {
        let descriptor_tag = descriptors[i];
        let length = usize::from(descriptors[i + 1]);
        if descriptor_tag == tag && length >= 4 && i + 6 <= descriptors.len() {
            return Some([
                descriptors[i + 2],
                descriptors[i + 3],
                descriptors[i + 4],
                descriptors[i + 5],
            ]);
        }
        i += 2 + length;
    }
    None
}

/// metadata_format_identifier of a metadata_descriptor (tag 38)
fn metadata_format(descriptors: &[u8]) -> Option<[u8; 4]> {
    let mut i = 0;
    while i + 2 <= descriptors.len() {
        let tag = descriptors[i];
        let length = usize::from(descriptors[i + 1]);
        if tag == 38 && i + 5 <= descriptors.len() {
            let application_format = u16::from_be_bytes([descriptors[i + 2], descriptors[i + 3]]);
            let mut at = i + 4;
            if application_format == 0xffff {
                at += 4;
            }
            if descriptors.get(at) == Some(&0xff) && at + 5 <= descriptors.len() {
                return Some([
                    descriptors[at + 1],
                    descriptors[at + 2],
                    descriptors[at + 3],
                    descriptors[at + 4],
                ]);
            }
        }
        i += 2 + length;
    }
    None
}

/// Parse a complete PMT section into a table plus the descriptor loops of
/// its private streams. Non-current and non-first sections yield `None`.
pub fn parse_pmt(data: &[u8]) -> Option<(Pmt, Vec<PrivateStreamDescriptor>)> {
    let (section_length, program_number, version_number, current_next, section_number) =
        section_header(data, 0x02, "PMT")?;
    if !current_next || section_number != 0 {
        return None;
    }
    if data.len() < 12 {
        tracing::warn!("PMT section truncated: {} bytes", data.len());
        return None;
    }

    let mut pmt = Pmt {
        program_number,
        version_number,
        pcr_pid: (u16::from(data[8] & 0x1f) << 8) | u16::from(data[9]),
        ..Default::default()
    };
    let mut descriptors = Vec::new();

    let program_info_length = (usize::from(data[10] & 0x0f) << 8) | usize::from(data[11]);
    let start = 12 + program_info_length;
    let end = (start + section_length.saturating_sub(9 + program_info_length + 4)).min(data.len());

    let mut i = start;
    while i + 5 <= end {
        let stream_type = data[i];
        let pid = (u16::from(data[i + 1] & 0x1f) << 8) | u16::from(data[i + 2]);
        let es_info_length = (usize::from(data[i + 3] & 0x0f) << 8) | usize::from(data[i + 4]);
        let es_info = &data[(i + 5).min(data.len())..(i + 5 + es_info_length).min(data.len())];

        let kind = StreamType::from(stream_type);
        pmt.pid_stream_type.insert(pid, kind);
        let common = &mut pmt.common_pids;

        match kind {
            StreamType::H264 if !common.has_video() => common.h264 = Some(pid),
            StreamType::H265 if !common.has_video() => common.h265 = Some(pid),
            StreamType::AdtsAac if !common.has_audio() => common.adts_aac = Some(pid),
            StreamType::LoasAac if !common.has_audio() => common.loas_aac = Some(pid),
            StreamType::Mpeg1Audio | StreamType::Mpeg2Audio if !common.has_audio() => {
                common.mp3 = Some(pid)
            }
            StreamType::PesPrivateData => {
                pmt.pes_private_data_pids.push(pid);
                match registration(es_info, 0x05).as_ref() {
                    Some(b"VANC") => pmt.smpte2038_pids.push(pid),
                    Some(b"KLVA") => pmt.asynchronous_klv_pids.push(pid),
                    _ => {}
                }
                descriptors.push(PrivateStreamDescriptor {
                    pid,
                    stream_type,
                    descriptor: Bytes::copy_from_slice(es_info),
                });
            }
            StreamType::Metadata => {
                if metadata_format(es_info).as_ref() == Some(b"KLVA") {
                    pmt.synchronous_klv_pids.push(pid);
                }
            }
            StreamType::Scte35 => pmt.scte35_pids.push(pid),
            _ => {}
        }

        i += 5 + es_info_length;
    }

    Some((pmt, descriptors))
}
