//! Transport stream demuxer

use std::collections::HashMap;

use bytes::Bytes;
use tsforged_common::{
    AacSignalling, AudioCodecConfig, AudioDecoder, AudioSample, AudioTrack, AudioTrackMetadata,
    FrameRate, MediaInfo, NalUnit, TrackMetadata, TransmuxConfig, Track, VideoCodecConfig,
    VideoSample, VideoTrack, VideoTrackMetadata,
};

use super::packet::{AdaptationField, PacketHeader, TimestampClock};
use super::pes::{parse_pes, start_code_prefix, PesPacket, SliceQueue};
use super::psi::{parse_pat, parse_pmt, Pat, Pmt, StreamType};
use super::sink::DemuxSink;
use super::{ProbeResult, SYNC_BYTE, TIMESCALE_90KHZ, TS_PACKET_SIZE};
use crate::codec::aac::{AacFrame, AdtsParser, AudioSpecificConfig, LoasParser, StreamMuxConfig};
use crate::codec::mpeg_audio::{self, MpegLayer};
use crate::codec::nal::{AnnexBReader, NalFlavor};
use crate::codec::{h264, hevc};
use crate::error::{ProbeError, Result};
use crate::metadata::{
    parse_access_units, parse_ancillaries, AsynchronousKlv, PrivateData, PrivateDataDescriptor,
    Scte35, Smpte2038, SynchronousKlv, TimedMetadata,
};

const VIDEO_TRACK_ID: u32 = 1;
const AUDIO_TRACK_ID: u32 = 2;

/// padding_stream carries nothing worth reporting
const PADDING_STREAM_ID: u8 = 0xbe;

#[derive(Debug, Default)]
struct AvcParameterSets {
    sps: Option<(NalUnit, h264::H264Sps)>,
    pps: Option<NalUnit>,
}

#[derive(Debug, Default)]
struct HevcParameterSets {
    vps: Option<(NalUnit, hevc::HevcVps)>,
    sps: Option<(NalUnit, hevc::HevcSps)>,
    pps: Option<(NalUnit, hevc::HevcPps)>,
}

/// Parameter sets collected for the next video init segment
#[derive(Debug)]
enum VideoParameterSets {
    Avc(AvcParameterSets),
    Hevc(HevcParameterSets),
}

/// Fields whose change forces a new video init segment
#[derive(Debug, PartialEq, Eq)]
struct VideoShape<'a> {
    codec: &'a str,
    codec_width: u32,
    codec_height: u32,
    present_width: u32,
}

impl VideoParameterSets {
    fn shape(&self) -> Option<VideoShape<'_>> {
        match self {
            VideoParameterSets::Avc(p) => p.sps.as_ref().map(|(_, s)| VideoShape {
                codec: &s.codec_mimetype,
                codec_width: s.codec_width,
                codec_height: s.codec_height,
                present_width: s.present_width,
            }),
            VideoParameterSets::Hevc(p) => p.sps.as_ref().map(|(_, s)| VideoShape {
                codec: &s.codec_mimetype,
                codec_width: s.codec_width,
                codec_height: s.codec_height,
                present_width: s.present_width,
            }),
        }
    }
}

/// Stream parameters of the audio track last announced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AudioParameters {
    Aac {
        audio_object_type: u8,
        sampling_freq_index: u8,
        sampling_frequency: u32,
        channel_config: u8,
    },
    Mp3 {
        object_type: u8,
        sample_rate: u32,
        channel_count: u8,
    },
}

impl AudioParameters {
    fn from_aac(frame: &AacFrame) -> Self {
        AudioParameters::Aac {
            audio_object_type: frame.audio_object_type,
            sampling_freq_index: frame.sampling_freq_index,
            sampling_frequency: frame.sampling_frequency,
            channel_config: frame.channel_config,
        }
    }

    fn from_mpeg(header: &mpeg_audio::MpegAudioHeader) -> Self {
        AudioParameters::Mp3 {
            object_type: header.object_type(),
            sample_rate: header.sample_rate,
            channel_count: header.channel_count,
        }
    }

    fn codec_name(&self) -> &'static str {
        match self {
            AudioParameters::Aac { .. } => "aac",
            AudioParameters::Mp3 { .. } => "mp3",
        }
    }
}

fn log_audio_change(old: &AudioParameters, new: &AudioParameters) {
    match (old, new) {
        (AudioParameters::Aac { .. }, AudioParameters::Aac { .. })
        | (AudioParameters::Mp3 { .. }, AudioParameters::Mp3 { .. }) => {
            tracing::debug!("{} stream parameters changed: {:?} -> {:?}", new.codec_name(), old, new)
        }
        _ => tracing::debug!(
            "audio codec changed from {} to {}",
            old.codec_name(),
            new.codec_name()
        ),
    }
}

/// Reference frame rate used when the bitstream carries no timing
fn effective_frame_rate(frame_rate: FrameRate) -> FrameRate {
    if frame_rate.fps_num == 0 || frame_rate.fps_den == 0 {
        FrameRate::default()
    } else {
        frame_rate
    }
}

fn ticks_to_ms(ticks: u64) -> i64 {
    (ticks / TIMESCALE_90KHZ) as i64
}

/// MPEG-TS demuxer.
///
/// Feed it with [`parse_chunks`](TsDemuxer::parse_chunks); output goes to a
/// [`DemuxSink`] passed with every call. Sample timestamps are integer
/// milliseconds offset by the timestamp base.
pub struct TsDemuxer {
    aac_signalling: AacSignalling,
    packet_size: usize,
    sync_offset: usize,
    first_parse: bool,

    clock: TimestampClock,
    timestamp_base: i64,
    duration: u64,

    pat: Option<Pat>,
    current_program: Option<u16>,
    current_pmt_pid: Option<u16>,
    pmt: Option<Pmt>,

    section_queues: HashMap<u16, SliceQueue>,
    pes_queues: HashMap<u16, SliceQueue>,

    has_video: bool,
    has_audio: bool,
    video_init_segment_dispatched: bool,
    audio_init_segment_dispatched: bool,
    video_metadata_changed: bool,

    video_parameters: Option<VideoParameterSets>,
    audio_parameters: Option<AudioParameters>,
    aac_incomplete_data: Option<Bytes>,
    loas_previous_config: Option<StreamMuxConfig>,
    /// Unrebased pts of the last audio frame, in fractional milliseconds
    audio_last_sample_pts: Option<f64>,

    audio_decoder: Option<Box<dyn AudioDecoder>>,
    soft_decode_audio: bool,

    video_track: VideoTrack,
    audio_track: AudioTrack,
    media_info: MediaInfo,

    malformed_count: u64,
}

impl TsDemuxer {
    /// Create a demuxer for a stream that [`probe`](super::probe) matched.
    pub fn new(probe: ProbeResult, config: &TransmuxConfig) -> Result<Self> {
        let ProbeResult::Match {
            packet_size,
            sync_offset,
        } = probe
        else {
            return Err(ProbeError::unsupported("not an MPEG transport stream"));
        };

        Ok(Self {
            aac_signalling: config.aac_signalling,
            packet_size,
            sync_offset,
            first_parse: true,
            clock: TimestampClock::default(),
            timestamp_base: 0,
            duration: 0,
            pat: None,
            current_program: None,
            current_pmt_pid: None,
            pmt: None,
            section_queues: HashMap::new(),
            pes_queues: HashMap::new(),
            has_video: false,
            has_audio: false,
            video_init_segment_dispatched: false,
            audio_init_segment_dispatched: false,
            video_metadata_changed: false,
            video_parameters: None,
            audio_parameters: None,
            aac_incomplete_data: None,
            loas_previous_config: None,
            audio_last_sample_pts: None,
            audio_decoder: None,
            soft_decode_audio: false,
            video_track: Track::new(VIDEO_TRACK_ID),
            audio_track: Track::new(AUDIO_TRACK_ID),
            media_info: MediaInfo::default(),
            malformed_count: 0,
        })
    }

    /// Attach a software decoder for MPEG audio Layer II streams.
    pub fn with_audio_decoder(mut self, decoder: Box<dyn AudioDecoder>) -> Self {
        self.audio_decoder = Some(decoder);
        self
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Milliseconds added to every emitted timestamp.
    pub fn set_timestamp_base(&mut self, base: i64) {
        self.timestamp_base = base;
    }

    pub fn timestamp_base(&self) -> i64 {
        self.timestamp_base
    }

    /// Duration in milliseconds reported in track metadata and MediaInfo.
    pub fn set_duration(&mut self, duration: u64) {
        self.duration = duration;
        self.media_info.duration = Some(duration);
    }

    pub fn media_info(&self) -> &MediaInfo {
        &self.media_info
    }

    /// Drop accumulated stream description, keeping what the PMT says
    /// about stream presence.
    pub fn reset_media_info(&mut self) {
        let known = self.pmt.is_some();
        self.media_info = MediaInfo {
            duration: Some(self.duration).filter(|_| self.duration > 0),
            has_audio: known.then_some(self.has_audio),
            has_video: known.then_some(self.has_video),
            ..Default::default()
        };
    }

    /// Number of PES packets and sections skipped as malformed.
    pub fn malformed_count(&self) -> u64 {
        self.malformed_count
    }

    /// Demux a chunk that starts at absolute offset `byte_start`.
    ///
    /// Returns the number of bytes consumed. A trailing partial packet is
    /// left for the caller to prepend to the next chunk.
    pub fn parse_chunks(
        &mut self,
        chunk: &[u8],
        byte_start: u64,
        sink: &mut dyn DemuxSink,
    ) -> Result<usize> {
        let mut offset = 0;
        if self.first_parse {
            self.first_parse = false;
            offset = self.sync_offset;
        }

        while offset + self.packet_size <= chunk.len() {
            let file_position = byte_start + offset as u64;
            if self.packet_size == 192 {
                // skip the M2TS timecode
                offset += 4;
            }

            let packet = &chunk[offset..offset + TS_PACKET_SIZE];
            if packet[0] != SYNC_BYTE {
                tracing::error!("sync_byte = {:#04x}, not 0x47", packet[0]);
                return Err(ProbeError::SyncLost {
                    position: byte_start + offset as u64,
                    found: packet[0],
                });
            }

            self.handle_packet(packet, file_position, sink);

            offset += TS_PACKET_SIZE;
            if self.packet_size == 204 {
                // skip the Reed-Solomon parity bytes
                offset += 16;
            }
        }

        self.dispatch_audio_video_media_segment(sink);
        Ok(offset)
    }

    /// Complete the PES packets of unbounded length still being collected
    /// and hand out pending samples. Called once the input has ended.
    pub fn flush(&mut self, sink: &mut dyn DemuxSink) {
        let mut pids: Vec<u16> = self
            .pes_queues
            .iter()
            .filter(|(_, q)| q.expected_length() == 0 && q.total_length() > 0)
            .map(|(&pid, _)| pid)
            .collect();
        pids.sort_unstable();

        for pid in pids {
            if let Some(mut queue) = self.pes_queues.remove(&pid) {
                let stream_type = self.pmt.as_ref().and_then(|pmt| pmt.stream_type(pid));
                if let Some(stream_type) = stream_type {
                    let data = queue.take();
                    self.emit_pes(pid, stream_type, data, &queue, sink);
                }
            }
        }

        self.dispatch_audio_video_media_segment(sink);
    }

    fn handle_packet(&mut self, packet: &[u8], file_position: u64, sink: &mut dyn DemuxSink) {
        let header = PacketHeader::parse(packet);
        let is_pcr_pid = self.pmt.as_ref().is_some_and(|pmt| pmt.pcr_pid == header.pid);

        let mut random_access_indicator = false;
        let mut payload_start = 4;

        if header.has_adaptation_field() {
            let field = AdaptationField::parse(packet);
            if field.length > 0 {
                random_access_indicator = field.random_access_indicator;
                if field.pcr_flag
                    && field.length >= 7
                    && (is_pcr_pid || header.adaptation_field_control == 3)
                {
                    self.clock.update_pcr(packet);
                }
            }
            if !header.has_payload() || 5 + field.length >= TS_PACKET_SIZE {
                return;
            }
            payload_start = 5 + field.length;
        }

        if !header.has_payload() {
            return;
        }

        let pid = header.pid;
        let payload = &packet[payload_start..];
        let is_section = pid == 0
            || Some(pid) == self.current_pmt_pid
            || self.pmt.as_ref().is_some_and(|pmt| pmt.is_scte35(pid));

        if is_section {
            self.handle_section_slice(
                payload,
                pid,
                file_position,
                header.payload_unit_start_indicator,
                random_access_indicator,
                sink,
            );
            return;
        }

        let stream_type = match &self.pmt {
            Some(pmt) if pmt.is_demuxed(pid) => pmt.stream_type(pid),
            _ => None,
        };
        if let Some(stream_type) = stream_type {
            self.handle_pes_slice(
                payload,
                pid,
                stream_type,
                file_position,
                header.payload_unit_start_indicator,
                random_access_indicator,
                sink,
            );
        }
    }

    fn handle_section_slice(
        &mut self,
        payload: &[u8],
        pid: u16,
        file_position: u64,
        payload_unit_start_indicator: bool,
        random_access_indicator: bool,
        sink: &mut dyn DemuxSink,
    ) {
        if !payload_unit_start_indicator {
            let Some(queue) = self.section_queues.get_mut(&pid) else {
                return;
            };
            let take = payload.len().min(queue.remaining());
            queue.push(&payload[..take]);
            if queue.is_complete() {
                if let Some(mut queue) = self.section_queues.remove(&pid) {
                    let data = queue.take();
                    self.parse_section(pid, &data, sink);
                }
            }
            return;
        }

        let pointer_field = usize::from(payload[0]);

        // tail of a section begun in earlier packets
        if let Some(mut queue) = self.section_queues.remove(&pid) {
            let end = (1 + pointer_field).min(payload.len());
            queue.push(&payload[1..end]);
            if queue.is_complete() {
                let data = queue.take();
                self.parse_section(pid, &data, sink);
            } else {
                tracing::debug!("incomplete section on PID {pid} dropped");
            }
        }

        let mut d = 1 + pointer_field;
        while d + 3 <= payload.len() && payload[d] != 0xff {
            let section_length =
                (usize::from(payload[d + 1] & 0x0f) << 8) | usize::from(payload[d + 2]);
            let mut queue = SliceQueue::new(file_position, random_access_indicator);
            queue.set_expected_length(section_length + 3);

            let take = (payload.len() - d).min(queue.remaining());
            queue.push(&payload[d..d + take]);
            d += take;

            if queue.is_complete() {
                let data = queue.take();
                self.parse_section(pid, &data, sink);
            } else {
                self.section_queues.insert(pid, queue);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_pes_slice(
        &mut self,
        payload: &[u8],
        pid: u16,
        stream_type: StreamType,
        file_position: u64,
        payload_unit_start_indicator: bool,
        random_access_indicator: bool,
        sink: &mut dyn DemuxSink,
    ) {
        if payload_unit_start_indicator {
            let prefix = start_code_prefix(payload);
            if prefix != Some(1) {
                tracing::warn!(
                    "PES on PID {pid}: packet_start_code_prefix should be 1 but with value {:?}",
                    prefix
                );
                self.malformed_count += 1;
                return;
            }

            if let Some(mut previous) = self.pes_queues.remove(&pid) {
                if previous.expected_length() == 0 && previous.total_length() > 0 {
                    let data = previous.take();
                    self.emit_pes(pid, stream_type, data, &previous, sink);
                } else if previous.total_length() > 0 {
                    tracing::debug!("incomplete PES on PID {pid} dropped");
                    self.malformed_count += 1;
                }
            }
            self.pes_queues
                .insert(pid, SliceQueue::new(file_position, random_access_indicator));
        }

        let Some(queue) = self.pes_queues.get_mut(&pid) else {
            return;
        };
        queue.push(payload);
        if payload_unit_start_indicator && payload.len() >= 6 {
            let pes_packet_length = usize::from(u16::from_be_bytes([payload[4], payload[5]]));
            if pes_packet_length != 0 {
                queue.set_expected_length(pes_packet_length + 6);
            }
        }

        if queue.is_complete() {
            if let Some(mut queue) = self.pes_queues.remove(&pid) {
                let data = queue.take();
                self.emit_pes(pid, stream_type, data, &queue, sink);
            }
        } else if queue.is_overrun() {
            tracing::debug!("PES on PID {pid} overran its declared length");
            self.malformed_count += 1;
            self.pes_queues.remove(&pid);
        }
    }

    fn emit_pes(
        &mut self,
        pid: u16,
        stream_type: StreamType,
        data: Bytes,
        queue: &SliceQueue,
        sink: &mut dyn DemuxSink,
    ) {
        match parse_pes(data, &self.clock) {
            Ok(pes) => self.parse_pes_payload(
                pid,
                stream_type,
                pes,
                queue.file_position,
                queue.random_access_indicator,
                sink,
            ),
            Err(e) => {
                tracing::warn!("malformed PES on PID {pid} skipped: {e}");
                self.malformed_count += 1;
            }
        }
    }

    fn parse_section(&mut self, pid: u16, data: &[u8], sink: &mut dyn DemuxSink) {
        if pid == 0 {
            self.on_pat(data);
        } else if Some(pid) == self.current_pmt_pid {
            self.on_pmt(data, sink);
        } else if self.pmt.as_ref().is_some_and(|pmt| pmt.is_scte35(pid)) {
            let event = Scte35 {
                pid,
                data: Bytes::copy_from_slice(data),
                nearest_pts: self.nearest_timestamp_ms(),
            };
            sink.on_timed_metadata(TimedMetadata::Scte35(event));
        }
    }

    fn on_pat(&mut self, data: &[u8]) {
        let Some(pat) = parse_pat(data) else {
            return;
        };
        if self.pat.is_none() {
            tracing::debug!("parsed first PAT: {:?}", pat);
        }
        let first = pat.first_program();
        self.current_program = first.map(|(program, _)| program);
        self.current_pmt_pid = first.map(|(_, pmt_pid)| pmt_pid);
        self.pat = Some(pat);
    }

    fn on_pmt(&mut self, data: &[u8], sink: &mut dyn DemuxSink) {
        let Some((pmt, descriptors)) = parse_pmt(data) else {
            return;
        };
        if Some(pmt.program_number) != self.current_program {
            return;
        }

        let is_new = self
            .pmt
            .as_ref()
            .map_or(true, |previous| previous.version_number != pmt.version_number);
        if self.pmt.is_none() {
            tracing::debug!("parsed first PMT: {:?}", pmt.common_pids);
        }
        if is_new {
            for descriptor in descriptors {
                sink.on_timed_metadata(TimedMetadata::PrivateDataDescriptor(
                    PrivateDataDescriptor {
                        pid: descriptor.pid,
                        stream_type: descriptor.stream_type,
                        descriptor: descriptor.descriptor,
                    },
                ));
            }
        }

        self.has_video |= pmt.common_pids.has_video();
        self.has_audio |= pmt.common_pids.has_audio();
        self.media_info.has_video = Some(self.has_video);
        self.media_info.has_audio = Some(self.has_audio);
        self.pmt = Some(pmt);
    }

    fn parse_pes_payload(
        &mut self,
        pid: u16,
        stream_type: StreamType,
        pes: PesPacket,
        file_position: u64,
        random_access_indicator: bool,
        sink: &mut dyn DemuxSink,
    ) {
        let PesPacket {
            stream_id,
            pts,
            dts,
            payload,
            headerless,
        } = pes;

        if headerless {
            if stream_type == StreamType::PesPrivateData && stream_id != PADDING_STREAM_ID {
                self.parse_private_data_payload(payload, None, None, pid, stream_id, sink);
            }
            return;
        }

        let Some(pmt) = self.pmt.as_ref() else {
            return;
        };
        let is_async_klv = pmt.asynchronous_klv_pids.contains(&pid);
        let is_smpte2038 = pmt.smpte2038_pids.contains(&pid);
        let is_sync_klv = pmt.synchronous_klv_pids.contains(&pid);

        match stream_type {
            StreamType::Mpeg1Audio | StreamType::Mpeg2Audio => {
                self.parse_mp3_payload(payload, pts, sink)
            }
            StreamType::PesPrivateData if is_async_klv => {
                sink.on_timed_metadata(TimedMetadata::AsynchronousKlv(AsynchronousKlv {
                    pid,
                    stream_id,
                    len: payload.len(),
                    data: payload,
                }));
            }
            StreamType::PesPrivateData if is_smpte2038 => {
                self.parse_smpte2038_payload(payload, pts, dts, pid, stream_id, sink)
            }
            StreamType::PesPrivateData => {
                self.parse_private_data_payload(payload, pts, dts, pid, stream_id, sink)
            }
            StreamType::AdtsAac => self.parse_aac_payload(payload, pts, false, sink),
            StreamType::LoasAac => self.parse_aac_payload(payload, pts, true, sink),
            StreamType::Metadata if is_sync_klv => {
                let base = self.timestamp_base;
                sink.on_timed_metadata(TimedMetadata::SynchronousKlv(SynchronousKlv {
                    pid,
                    stream_id,
                    len: payload.len(),
                    access_units: parse_access_units(&payload),
                    data: payload,
                    pts: pts.map(|p| ticks_to_ms(p) + base),
                    dts: dts.map(|d| ticks_to_ms(d) + base),
                }));
            }
            StreamType::H264 => self.parse_video_payload(
                &payload,
                NalFlavor::H264,
                pts,
                dts,
                file_position,
                random_access_indicator,
                sink,
            ),
            StreamType::H265 => self.parse_video_payload(
                &payload,
                NalFlavor::H265,
                pts,
                dts,
                file_position,
                random_access_indicator,
                sink,
            ),
            _ => {}
        }
    }

    // ---- video ----

    #[allow(clippy::too_many_arguments)]
    fn parse_video_payload(
        &mut self,
        payload: &[u8],
        flavor: NalFlavor,
        pts: Option<u64>,
        dts: Option<u64>,
        file_position: u64,
        random_access_indicator: bool,
        sink: &mut dyn DemuxSink,
    ) {
        let mut units = Vec::new();
        let mut length = 0;
        let mut is_keyframe = false;

        for unit in AnnexBReader::new(payload, flavor) {
            match flavor {
                NalFlavor::H264 => match unit.nal_type {
                    h264::nal_type::SPS => self.on_avc_sps(&unit),
                    h264::nal_type::PPS => self.on_avc_pps(&unit, sink),
                    h264::nal_type::IDR_SLICE => is_keyframe = true,
                    h264::nal_type::NON_IDR_SLICE if random_access_indicator => is_keyframe = true,
                    _ => {}
                },
                NalFlavor::H265 => match unit.nal_type {
                    hevc::nal_type::VPS => self.on_hevc_vps(&unit),
                    hevc::nal_type::SPS => self.on_hevc_sps(&unit),
                    hevc::nal_type::PPS => self.on_hevc_pps(&unit, sink),
                    t if hevc::is_keyframe(t) => is_keyframe = true,
                    _ => {}
                },
            }

            if self.video_init_segment_dispatched {
                length += unit.data.len();
                units.push(unit);
            }
        }

        let (Some(pts), Some(dts)) = (pts, dts) else {
            return;
        };
        if units.is_empty() {
            return;
        }

        let pts = ticks_to_ms(pts) + self.timestamp_base;
        let dts = ticks_to_ms(dts) + self.timestamp_base;
        self.video_track.samples.push(VideoSample {
            units,
            length,
            is_keyframe,
            dts,
            pts,
            cts: pts - dts,
            file_position: Some(file_position),
        });
        self.video_track.length += length;
    }

    /// True when `new` differs from the announced video in a way that needs
    /// a new init segment.
    fn video_shape_changed(&self, new: &VideoShape<'_>) -> bool {
        let Some(current) = self.video_parameters.as_ref().and_then(|p| p.shape()) else {
            return true;
        };
        if current.codec != new.codec {
            tracing::debug!("video codec changed from {} to {}", current.codec, new.codec);
            return true;
        }
        if current.codec_width != new.codec_width || current.codec_height != new.codec_height {
            tracing::debug!(
                "coded resolution changed from {}x{} to {}x{}",
                current.codec_width,
                current.codec_height,
                new.codec_width,
                new.codec_height
            );
            return true;
        }
        if current.present_width != new.present_width {
            tracing::debug!(
                "present width changed from {} to {}",
                current.present_width,
                new.present_width
            );
            return true;
        }
        false
    }

    fn avc_parameters(&mut self) -> &mut AvcParameterSets {
        if !matches!(self.video_parameters, Some(VideoParameterSets::Avc(_))) {
            self.video_parameters = Some(VideoParameterSets::Avc(AvcParameterSets::default()));
        }
        match self.video_parameters.as_mut() {
            Some(VideoParameterSets::Avc(p)) => p,
            _ => unreachable!("parameter sets replaced above"),
        }
    }

    fn hevc_parameters(&mut self) -> &mut HevcParameterSets {
        if !matches!(self.video_parameters, Some(VideoParameterSets::Hevc(_))) {
            self.video_parameters = Some(VideoParameterSets::Hevc(HevcParameterSets::default()));
        }
        match self.video_parameters.as_mut() {
            Some(VideoParameterSets::Hevc(p)) => p,
            _ => unreachable!("parameter sets replaced above"),
        }
    }

    fn on_avc_sps(&mut self, unit: &NalUnit) {
        let info = match h264::parse_sps(unit.payload()) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("H264: invalid SPS skipped: {e}");
                return;
            }
        };

        if self.video_init_segment_dispatched {
            let shape = VideoShape {
                codec: &info.codec_mimetype,
                codec_width: info.codec_width,
                codec_height: info.codec_height,
                present_width: info.present_width,
            };
            if self.video_shape_changed(&shape) {
                tracing::debug!("H264: critical metadata changed, regenerating init segment");
                self.video_metadata_changed = true;
                self.video_parameters = Some(VideoParameterSets::Avc(AvcParameterSets {
                    sps: Some((unit.clone(), info)),
                    pps: None,
                }));
            }
        } else {
            self.avc_parameters().sps = Some((unit.clone(), info));
        }
    }

    fn on_avc_pps(&mut self, unit: &NalUnit, sink: &mut dyn DemuxSink) {
        if self.video_init_segment_dispatched && !self.video_metadata_changed {
            return;
        }
        let params = self.avc_parameters();
        params.pps = Some(unit.clone());
        if params.sps.is_some() {
            if self.video_metadata_changed {
                self.dispatch_video_media_segment(sink);
            }
            self.dispatch_video_init_segment(sink);
        }
    }

    fn on_hevc_vps(&mut self, unit: &NalUnit) {
        if self.video_init_segment_dispatched && !self.video_metadata_changed {
            return;
        }
        match hevc::parse_vps(unit.payload()) {
            Ok(info) => self.hevc_parameters().vps = Some((unit.clone(), info)),
            Err(e) => tracing::warn!("H265: invalid VPS skipped: {e}"),
        }
    }

    fn on_hevc_sps(&mut self, unit: &NalUnit) {
        let info = match hevc::parse_sps(unit.payload()) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("H265: invalid SPS skipped: {e}");
                return;
            }
        };

        if self.video_init_segment_dispatched {
            let shape = VideoShape {
                codec: &info.codec_mimetype,
                codec_width: info.codec_width,
                codec_height: info.codec_height,
                present_width: info.present_width,
            };
            if self.video_shape_changed(&shape) {
                tracing::debug!("H265: critical metadata changed, regenerating init segment");
                self.video_metadata_changed = true;
                self.video_parameters = Some(VideoParameterSets::Hevc(HevcParameterSets {
                    vps: None,
                    sps: Some((unit.clone(), info)),
                    pps: None,
                }));
            }
        } else {
            self.hevc_parameters().sps = Some((unit.clone(), info));
        }
    }

    fn on_hevc_pps(&mut self, unit: &NalUnit, sink: &mut dyn DemuxSink) {
        if self.video_init_segment_dispatched && !self.video_metadata_changed {
            return;
        }
        let info = match hevc::parse_pps(unit.payload()) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("H265: invalid PPS skipped: {e}");
                return;
            }
        };
        let params = self.hevc_parameters();
        params.pps = Some((unit.clone(), info));
        if params.vps.is_some() && params.sps.is_some() {
            if self.video_metadata_changed {
                self.dispatch_video_media_segment(sink);
            }
            self.dispatch_video_init_segment(sink);
        }
    }

    fn build_video_metadata(&self) -> Option<VideoTrackMetadata> {
        let metadata = match self.video_parameters.as_ref()? {
            VideoParameterSets::Avc(p) => {
                let (sps, info) = p.sps.as_ref()?;
                let pps = p.pps.as_ref()?;
                let frame_rate = effective_frame_rate(info.frame_rate);
                VideoTrackMetadata {
                    id: self.video_track.id,
                    timescale: 1000,
                    duration: self.duration,
                    codec: info.codec_mimetype.clone(),
                    codec_width: info.codec_width,
                    codec_height: info.codec_height,
                    present_width: info.present_width,
                    present_height: info.present_height,
                    profile: info.profile_string.clone(),
                    level: info.level_string.clone(),
                    bit_depth: info.bit_depth(),
                    chroma_format: info.chroma_format_string.clone(),
                    ref_frames: info.ref_frames,
                    sar: info.sar,
                    frame_rate,
                    ref_sample_duration: 1000.0 * f64::from(frame_rate.fps_den)
                        / f64::from(frame_rate.fps_num),
                    config: VideoCodecConfig::Avc {
                        avcc: h264::build_avcc(sps.payload(), pps.payload(), info),
                    },
                }
            }
            VideoParameterSets::Hevc(p) => {
                let (vps, vps_info) = p.vps.as_ref()?;
                let (sps, info) = p.sps.as_ref()?;
                let (pps, pps_info) = p.pps.as_ref()?;
                let frame_rate = effective_frame_rate(info.frame_rate);
                VideoTrackMetadata {
                    id: self.video_track.id,
                    timescale: 1000,
                    duration: self.duration,
                    codec: info.codec_mimetype.clone(),
                    codec_width: info.codec_width,
                    codec_height: info.codec_height,
                    present_width: info.present_width,
                    present_height: info.present_height,
                    profile: info.profile_string.clone(),
                    level: info.level_string.clone(),
                    bit_depth: info.bit_depth(),
                    chroma_format: info.chroma_format_string.clone(),
                    ref_frames: info.ref_frames,
                    sar: info.sar,
                    frame_rate,
                    ref_sample_duration: 1000.0 * f64::from(frame_rate.fps_den)
                        / f64::from(frame_rate.fps_num),
                    config: VideoCodecConfig::Hevc {
                        hvcc: hevc::build_hvcc(
                            vps.payload(),
                            sps.payload(),
                            pps.payload(),
                            vps_info,
                            info,
                            pps_info,
                        ),
                    },
                }
            }
        };
        Some(metadata)
    }

    fn dispatch_video_init_segment(&mut self, sink: &mut dyn DemuxSink) {
        let Some(metadata) = self.build_video_metadata() else {
            return;
        };
        if !self.video_init_segment_dispatched {
            tracing::debug!("generated first decoder configuration for {}", metadata.codec);
        }

        let info = &mut self.media_info;
        info.has_video = Some(true);
        info.width = Some(metadata.codec_width);
        info.height = Some(metadata.codec_height);
        info.fps = Some(metadata.frame_rate.fps);
        info.profile = Some(metadata.profile.clone());
        info.level = Some(metadata.level.clone());
        info.ref_frames = Some(metadata.ref_frames);
        info.chroma_format = Some(metadata.chroma_format.clone());
        info.sar_num = Some(metadata.sar.width);
        info.sar_den = Some(metadata.sar.height);
        info.video_codec = Some(metadata.codec.clone());

        sink.on_track_metadata(TrackMetadata::Video(metadata));
        self.video_init_segment_dispatched = true;
        self.video_metadata_changed = false;
        self.publish_media_info(sink);
    }

    // ---- audio ----

    fn parse_aac_payload(
        &mut self,
        payload: Bytes,
        pts: Option<u64>,
        loas: bool,
        sink: &mut dyn DemuxSink,
    ) {
        if self.has_video && !self.video_init_segment_dispatched {
            return;
        }

        let had_incomplete = self.aac_incomplete_data.is_some();
        let data = match self.aac_incomplete_data.take() {
            Some(prefix) => {
                let mut joined = Vec::with_capacity(prefix.len() + payload.len());
                joined.extend_from_slice(&prefix);
                joined.extend_from_slice(&payload);
                Bytes::from(joined)
            }
            None => payload,
        };

        let Some(mut frame_pts) = self.aac_start_pts(pts, had_incomplete) else {
            return;
        };
        let mut last_pts = None;

        if loas {
            let mut parser = LoasParser::new(&data);
            while let Some((frame, config)) = parser.next_frame(self.loas_previous_config.as_ref())
            {
                self.loas_previous_config = Some(config);
                self.on_aac_frame(&frame, sink);
                last_pts = Some(frame_pts);
                let duration = frame.duration_ms();
                self.push_audio_sample(frame.data, frame_pts);
                frame_pts += duration;
            }
            self.aac_incomplete_data = parser.incomplete_data().map(Bytes::copy_from_slice);
        } else {
            let mut parser = AdtsParser::new(&data);
            while let Some(frame) = parser.next_frame() {
                self.on_aac_frame(&frame, sink);
                last_pts = Some(frame_pts);
                let duration = frame.duration_ms();
                self.push_audio_sample(frame.data, frame_pts);
                frame_pts += duration;
            }
            self.aac_incomplete_data = parser.incomplete_data().map(Bytes::copy_from_slice);
        }

        if last_pts.is_some() {
            self.audio_last_sample_pts = last_pts;
        }
    }

    /// Presentation time of the first frame in a payload, in milliseconds.
    fn aac_start_pts(&self, pts: Option<u64>, had_incomplete: bool) -> Option<f64> {
        let mut start = pts.map(|p| p as f64 / TIMESCALE_90KHZ as f64);

        if let Some(AudioParameters::Aac {
            sampling_frequency, ..
        }) = self.audio_parameters
        {
            let frame_duration = 1024.0 / f64::from(sampling_frequency.max(1)) * 1000.0;
            if start.is_none() {
                match self.audio_last_sample_pts {
                    Some(last) => start = Some(last + frame_duration),
                    None => {
                        tracing::warn!("AAC: unknown pts");
                        return None;
                    }
                }
            }
            if had_incomplete {
                if let (Some(last), Some(current)) = (self.audio_last_sample_pts, start) {
                    let expected = last + frame_duration;
                    if (expected - current).abs() > 1.0 {
                        tracing::warn!(
                            "AAC: detected pts overlapped, expected: {expected}ms, PES pts: {current}ms"
                        );
                        start = Some(expected);
                    }
                }
            }
        }

        if start.is_none() {
            tracing::warn!("audio PES without pts skipped");
        }
        start
    }

    fn on_aac_frame(&mut self, frame: &AacFrame, sink: &mut dyn DemuxSink) {
        let params = AudioParameters::from_aac(frame);
        if !self.audio_init_segment_dispatched {
            self.audio_parameters = Some(params);
            self.dispatch_audio_init_segment(Some(frame), sink);
        } else if self.audio_parameters != Some(params) {
            self.on_audio_parameters_changed(params, sink);
            self.dispatch_audio_init_segment(Some(frame), sink);
        }
    }

    fn on_audio_parameters_changed(&mut self, params: AudioParameters, sink: &mut dyn DemuxSink) {
        if let Some(old) = &self.audio_parameters {
            log_audio_change(old, &params);
            if old.codec_name() != params.codec_name() {
                if let Some(decoder) = self.audio_decoder.as_mut() {
                    decoder.reset();
                }
            }
        }
        if !self.soft_decode_audio {
            self.dispatch_audio_media_segment(sink);
        }
        self.audio_parameters = Some(params);
    }

    fn parse_mp3_payload(&mut self, payload: Bytes, pts: Option<u64>, sink: &mut dyn DemuxSink) {
        if self.has_video && !self.video_init_segment_dispatched {
            return;
        }
        let header = match mpeg_audio::parse_header(&payload) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!("MPEG audio payload skipped: {e}");
                self.malformed_count += 1;
                return;
            }
        };
        let params = AudioParameters::from_mpeg(&header);
        let soft_decode = header.layer == MpegLayer::Layer2 && self.audio_decoder.is_some();
        let switching = self.soft_decode_audio != soft_decode;

        if !self.audio_init_segment_dispatched {
            self.soft_decode_audio = soft_decode;
            self.audio_parameters = Some(params);
            self.dispatch_audio_init_segment(None, sink);
        } else if self.audio_parameters != Some(params) || switching {
            self.on_audio_parameters_changed(params, sink);
            self.soft_decode_audio = soft_decode;
            self.dispatch_audio_init_segment(None, sink);
        }

        let Some(pts) = pts else {
            tracing::warn!("MPEG audio PES without pts skipped");
            return;
        };

        if soft_decode {
            let base = self.timestamp_base as f64;
            if let Some(decoder) = self.audio_decoder.as_mut() {
                if let Some(mut decoded) = decoder.decode(&payload) {
                    decoded.pts = pts as f64 / TIMESCALE_90KHZ as f64 + base;
                    sink.on_decoded_audio(decoded);
                }
            }
            return;
        }

        self.push_audio_sample(payload, pts as f64 / TIMESCALE_90KHZ as f64);
    }

    fn push_audio_sample(&mut self, unit: Bytes, pts: f64) {
        let ms = pts.floor() as i64 + self.timestamp_base;
        self.audio_track.length += unit.len();
        self.audio_track.samples.push(AudioSample {
            unit,
            dts: ms,
            pts: ms,
        });
    }

    fn dispatch_audio_init_segment(&mut self, frame: Option<&AacFrame>, sink: &mut dyn DemuxSink) {
        let metadata = match self.audio_parameters {
            Some(AudioParameters::Aac { .. }) => {
                let Some(frame) = frame else {
                    return;
                };
                let asc = AudioSpecificConfig::new(frame, self.aac_signalling);
                AudioTrackMetadata {
                    id: self.audio_track.id,
                    timescale: 1000,
                    duration: self.duration,
                    codec: asc.codec_mimetype,
                    sample_rate: asc.sampling_rate,
                    channel_count: asc.channel_count,
                    ref_sample_duration: Some(1024.0 / f64::from(asc.sampling_rate.max(1)) * 1000.0),
                    config: AudioCodecConfig::Aac {
                        config: asc.config,
                        original_codec: asc.original_codec_mimetype,
                    },
                }
            }
            Some(AudioParameters::Mp3 {
                sample_rate,
                channel_count,
                ..
            }) => AudioTrackMetadata {
                id: self.audio_track.id,
                timescale: 1000,
                duration: self.duration,
                codec: "mp3".to_string(),
                sample_rate,
                channel_count,
                ref_sample_duration: None,
                config: AudioCodecConfig::Mp3,
            },
            None => return,
        };

        if !self.audio_init_segment_dispatched {
            tracing::debug!("generated first audio configuration for {}", metadata.codec);
        }

        let info = &mut self.media_info;
        info.has_audio = Some(true);
        info.audio_codec = Some(metadata.original_codec().to_string());
        info.audio_sample_rate = Some(metadata.sample_rate);
        info.audio_channel_count = Some(metadata.channel_count);

        if !self.soft_decode_audio {
            sink.on_track_metadata(TrackMetadata::Audio(metadata));
        }
        self.audio_init_segment_dispatched = true;
        self.publish_media_info(sink);
    }

    // ---- metadata ----

    fn nearest_timestamp_ms(&self) -> Option<i64> {
        let nearest = match self.audio_last_sample_pts {
            Some(pts) => Some(pts.floor() as i64),
            None => self
                .clock
                .last_pcr()
                .map(|pcr| (pcr / 300 / TIMESCALE_90KHZ) as i64),
        };
        nearest.map(|ms| ms + self.timestamp_base)
    }

    fn parse_private_data_payload(
        &mut self,
        payload: Bytes,
        pts: Option<u64>,
        dts: Option<u64>,
        pid: u16,
        stream_id: u8,
        sink: &mut dyn DemuxSink,
    ) {
        let base = self.timestamp_base;
        let event = PrivateData {
            pid,
            stream_id,
            len: payload.len(),
            data: payload,
            pts: pts
                .map(|p| ticks_to_ms(p) + base)
                .or_else(|| self.nearest_timestamp_ms()),
            dts: dts.map(|d| ticks_to_ms(d) + base),
        };
        sink.on_timed_metadata(TimedMetadata::PrivateData(event));
    }

    fn parse_smpte2038_payload(
        &mut self,
        payload: Bytes,
        pts: Option<u64>,
        dts: Option<u64>,
        pid: u16,
        stream_id: u8,
        sink: &mut dyn DemuxSink,
    ) {
        let base = self.timestamp_base;
        let event = Smpte2038 {
            pid,
            stream_id,
            pts: pts.map(|p| ticks_to_ms(p) + base),
            dts: dts.map(|d| ticks_to_ms(d) + base),
            nearest_pts: self.nearest_timestamp_ms(),
            ancillaries: parse_ancillaries(&payload),
            len: payload.len(),
            data: payload,
        };
        sink.on_timed_metadata(TimedMetadata::Smpte2038(event));
    }

    // ---- dispatch ----

    fn is_init_segment_dispatched(&self) -> bool {
        match (self.has_video, self.has_audio) {
            (true, true) => self.video_init_segment_dispatched && self.audio_init_segment_dispatched,
            (true, false) => self.video_init_segment_dispatched,
            (false, true) => self.audio_init_segment_dispatched,
            (false, false) => false,
        }
    }

    fn publish_media_info(&mut self, sink: &mut dyn DemuxSink) {
        let info = &mut self.media_info;
        let codecs = match (&info.video_codec, &info.audio_codec) {
            (Some(video), Some(audio)) if info.has_audio == Some(true) => {
                format!("{video},{audio}")
            }
            (Some(video), _) => video.clone(),
            (None, Some(audio)) => audio.clone(),
            (None, None) => return,
        };
        info.mime_type = Some(format!("video/mp2t; codecs=\"{codecs}\""));
        if self.duration > 0 {
            info.duration = Some(self.duration);
        }

        if info.is_complete() {
            sink.on_media_info(&self.media_info);
        }
    }

    fn dispatch_video_media_segment(&mut self, sink: &mut dyn DemuxSink) {
        if self.is_init_segment_dispatched() && !self.video_track.is_empty() {
            sink.on_data_available(None, Some(&mut self.video_track));
        }
    }

    fn dispatch_audio_media_segment(&mut self, sink: &mut dyn DemuxSink) {
        if self.is_init_segment_dispatched() && !self.audio_track.is_empty() {
            sink.on_data_available(Some(&mut self.audio_track), None);
        }
    }

    fn dispatch_audio_video_media_segment(&mut self, sink: &mut dyn DemuxSink) {
        if self.is_init_segment_dispatched()
            && (!self.audio_track.is_empty() || !self.video_track.is_empty())
        {
            sink.on_data_available(Some(&mut self.audio_track), Some(&mut self.video_track));
        }
    }
}

impl std::fmt::Debug for TsDemuxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TsDemuxer")
            .field("packet_size", &self.packet_size)
            .field("current_program", &self.current_program)
            .field("has_video", &self.has_video)
            .field("has_audio", &self.has_audio)
            .field("timestamp_base", &self.timestamp_base)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::mpegts::pes::tests::pes_packet;
    use crate::container::mpegts::psi::tests::{pat_section, pmt_section};

    const BASELINE_SPS: [u8; 8] = [0x67, 0x42, 0xc0, 0x1e, 0xf4, 0x0a, 0x0f, 0xc8];
    const PPS: [u8; 4] = [0x68, 0xce, 0x3c, 0x80];
    const IDR: [u8; 5] = [0x65, 0x88, 0x84, 0x00, 0x33];
    const NON_IDR: [u8; 4] = [0x41, 0x9a, 0x02, 0x10];

    const PMT_PID: u16 = 0x1000;
    const VIDEO_PID: u16 = 0x100;
    const AUDIO_PID: u16 = 0x101;

    #[derive(Default)]
    struct RecordingSink {
        metadata: Vec<TrackMetadata>,
        media_info: Vec<MediaInfo>,
        audio: Vec<AudioSample>,
        video: Vec<VideoSample>,
        timed: Vec<TimedMetadata>,
    }

    impl DemuxSink for RecordingSink {
        fn on_track_metadata(&mut self, metadata: TrackMetadata) {
            self.metadata.push(metadata);
        }

        fn on_media_info(&mut self, info: &MediaInfo) {
            self.media_info.push(info.clone());
        }

        fn on_data_available(
            &mut self,
            audio: Option<&mut AudioTrack>,
            video: Option<&mut VideoTrack>,
        ) {
            if let Some(audio) = audio {
                self.audio.extend(audio.take().samples);
            }
            if let Some(video) = video {
                self.video.extend(video.take().samples);
            }
        }

        fn on_timed_metadata(&mut self, metadata: TimedMetadata) {
            self.timed.push(metadata);
        }
    }

    /// Split a payload into 188-byte packets, padding the last one with
    /// adaptation field stuffing.
    fn packetize(pid: u16, payload: &[u8], random_access: bool) -> Vec<u8> {
        let mut out = Vec::new();
        let mut offset = 0;
        let mut cc = 0u8;
        while offset < payload.len() {
            let first = offset == 0;
            let flagged = first && random_access;
            let capacity = if flagged { 182 } else { 184 };
            let n = capacity.min(payload.len() - offset);
            let af_total = 184 - n;

            let pusi = if first { 0x40 } else { 0x00 };
            let afc = if af_total > 0 { 0x30 } else { 0x10 };
            let mut packet = vec![SYNC_BYTE, pusi | (pid >> 8) as u8, pid as u8, afc | cc];
            if af_total > 0 {
                let af_length = af_total - 1;
                packet.push(af_length as u8);
                if af_length > 0 {
                    packet.push(if flagged { 0x40 } else { 0x00 });
                    packet.extend(std::iter::repeat(0xff).take(af_length - 1));
                }
            }
            packet.extend_from_slice(&payload[offset..offset + n]);
            assert_eq!(packet.len(), TS_PACKET_SIZE);

            out.extend(packet);
            offset += n;
            cc = (cc + 1) & 0x0f;
        }
        out
    }

    fn section_packet(pid: u16, section: &[u8]) -> Vec<u8> {
        let mut payload = vec![0x00];
        payload.extend_from_slice(section);
        payload.resize(184, 0xff);
        packetize(pid, &payload, false)
    }

    fn annexb(units: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for unit in units {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(unit);
        }
        out
    }

    /// ADTS frame without CRC: LC, 48 kHz, stereo
    fn adts_frame(payload: &[u8]) -> Vec<u8> {
        let len = payload.len() + 7;
        let mut frame = vec![
            0xff,
            0xf1,
            0x4c,
            0x80 | ((len >> 11) as u8 & 0x03),
            (len >> 3) as u8,
            ((len as u8 & 0x07) << 5) | 0x1f,
            0xfc,
        ];
        frame.extend_from_slice(payload);
        frame
    }

    fn program(streams: &[(u8, u16, &[u8])]) -> Vec<u8> {
        let mut ts = section_packet(0, &pat_section(1, PMT_PID));
        ts.extend(section_packet(PMT_PID, &pmt_section(1, VIDEO_PID, streams)));
        ts
    }

    fn demuxer() -> TsDemuxer {
        let probe = ProbeResult::Match {
            packet_size: 188,
            sync_offset: 0,
        };
        TsDemuxer::new(probe, &TransmuxConfig::default()).unwrap()
    }

    fn av_stream() -> Vec<u8> {
        let mut ts = program(&[(0x1b, VIDEO_PID, &[]), (0x0f, AUDIO_PID, &[])]);
        let video = annexb(&[&BASELINE_SPS, &PPS, &IDR]);
        ts.extend(packetize(
            VIDEO_PID,
            &pes_packet(0xe0, Some(93_600), Some(90_000), &video, true),
            true,
        ));
        let mut audio = adts_frame(&[0x11; 10]);
        audio.extend(adts_frame(&[0x22; 10]));
        ts.extend(packetize(
            AUDIO_PID,
            &pes_packet(0xc0, Some(90_000), None, &audio, true),
            false,
        ));
        ts
    }

    #[test]
    fn test_rejects_non_match() {
        assert!(TsDemuxer::new(ProbeResult::NoMatch, &TransmuxConfig::default()).is_err());
    }

    #[test]
    fn test_audio_video_program() {
        let ts = av_stream();
        let mut demuxer = demuxer();
        let mut sink = RecordingSink::default();

        let consumed = demuxer.parse_chunks(&ts, 0, &mut sink).unwrap();
        assert_eq!(consumed, ts.len());

        assert_eq!(sink.metadata.len(), 2);
        let TrackMetadata::Video(video) = &sink.metadata[0] else {
            panic!("expected video metadata first");
        };
        assert_eq!(video.codec, "avc1.42c01e");
        assert_eq!(video.codec_width, 320);
        assert_eq!(video.frame_rate, FrameRate::default());
        let TrackMetadata::Audio(audio) = &sink.metadata[1] else {
            panic!("expected audio metadata second");
        };
        assert_eq!(audio.sample_rate, 48000);
        assert_eq!(audio.channel_count, 2);
        assert_eq!(audio.original_codec(), "mp4a.40.2");

        let info = sink.media_info.last().unwrap();
        assert!(info.is_complete());
        assert_eq!(
            info.mime_type.as_deref(),
            Some("video/mp2t; codecs=\"avc1.42c01e,mp4a.40.2\"")
        );

        assert_eq!(sink.video.len(), 1);
        let sample = &sink.video[0];
        assert!(sample.is_keyframe);
        assert_eq!(sample.dts, 1000);
        assert_eq!(sample.pts, 1040);
        assert_eq!(sample.cts, 40);
        assert_eq!(sample.file_position, Some(2 * 188));
        // PPS (which completed the configuration) and the IDR slice
        assert_eq!(sample.units.len(), 2);
        assert_eq!(sample.length, 4 + PPS.len() + 4 + IDR.len());

        let audio_dts: Vec<i64> = sink.audio.iter().map(|s| s.dts).collect();
        assert_eq!(audio_dts, vec![1000, 1021]);
        assert_eq!(&sink.audio[1].unit[..], &[0x22; 10]);
    }

    #[test]
    fn test_timestamp_base_offsets_samples() {
        let ts = av_stream();
        let mut demuxer = demuxer();
        demuxer.set_timestamp_base(5000);
        let mut sink = RecordingSink::default();
        demuxer.parse_chunks(&ts, 0, &mut sink).unwrap();

        assert_eq!(sink.video[0].dts, 6000);
        assert_eq!(sink.audio[0].dts, 6000);
    }

    #[test]
    fn test_partial_packet_is_not_consumed() {
        let ts = av_stream();
        let mut demuxer = demuxer();
        let mut sink = RecordingSink::default();

        let split = 3 * 188 + 100;
        let consumed = demuxer.parse_chunks(&ts[..split], 0, &mut sink).unwrap();
        assert_eq!(consumed, 3 * 188);

        let consumed = demuxer
            .parse_chunks(&ts[consumed..], consumed as u64, &mut sink)
            .unwrap();
        assert_eq!(consumed, ts.len() - 3 * 188);
        assert_eq!(sink.video.len(), 1);
        assert_eq!(sink.audio.len(), 2);
    }

    #[test]
    fn test_sync_loss() {
        let mut ts = av_stream();
        ts[188] = 0x00;
        let mut demuxer = demuxer();
        let mut sink = RecordingSink::default();
        let err = demuxer.parse_chunks(&ts, 1000, &mut sink).unwrap_err();
        assert!(matches!(
            err,
            ProbeError::SyncLost {
                position: 1188,
                found: 0x00
            }
        ));
    }

    #[test]
    fn test_audio_waits_for_video_configuration() {
        let mut ts = program(&[(0x1b, VIDEO_PID, &[]), (0x0f, AUDIO_PID, &[])]);
        ts.extend(packetize(
            AUDIO_PID,
            &pes_packet(0xc0, Some(90_000), None, &adts_frame(&[1; 8]), true),
            false,
        ));
        let mut demuxer = demuxer();
        let mut sink = RecordingSink::default();
        demuxer.parse_chunks(&ts, 0, &mut sink).unwrap();

        assert!(sink.metadata.is_empty());
        assert!(sink.audio.is_empty());
    }

    #[test]
    fn test_audio_only_program_completes_media_info() {
        let mut ts = program(&[(0x0f, AUDIO_PID, &[])]);
        ts.extend(packetize(
            AUDIO_PID,
            &pes_packet(0xc0, Some(90_000), None, &adts_frame(&[1; 8]), true),
            false,
        ));
        let mut demuxer = demuxer();
        let mut sink = RecordingSink::default();
        demuxer.parse_chunks(&ts, 0, &mut sink).unwrap();

        let info = sink.media_info.last().unwrap();
        assert_eq!(info.has_video, Some(false));
        assert_eq!(info.mime_type.as_deref(), Some("video/mp2t; codecs=\"mp4a.40.2\""));
        assert_eq!(sink.audio.len(), 1);
    }

    #[test]
    fn test_random_access_marks_non_idr_keyframe() {
        let mut ts = program(&[(0x1b, VIDEO_PID, &[])]);
        let first = annexb(&[&BASELINE_SPS, &PPS, &IDR]);
        ts.extend(packetize(
            VIDEO_PID,
            &pes_packet(0xe0, Some(90_000), None, &first, true),
            true,
        ));
        let flagged = annexb(&[&NON_IDR]);
        ts.extend(packetize(
            VIDEO_PID,
            &pes_packet(0xe0, Some(93_750), None, &flagged, true),
            true,
        ));
        ts.extend(packetize(
            VIDEO_PID,
            &pes_packet(0xe0, Some(97_500), None, &flagged, true),
            false,
        ));

        let mut demuxer = demuxer();
        let mut sink = RecordingSink::default();
        demuxer.parse_chunks(&ts, 0, &mut sink).unwrap();

        let keyframes: Vec<bool> = sink.video.iter().map(|s| s.is_keyframe).collect();
        assert_eq!(keyframes, vec![true, true, false]);
    }

    #[test]
    fn test_unbounded_pes_is_emitted_on_flush() {
        let mut ts = program(&[(0x1b, VIDEO_PID, &[])]);
        let video = annexb(&[&BASELINE_SPS, &PPS, &IDR]);
        ts.extend(packetize(
            VIDEO_PID,
            &pes_packet(0xe0, Some(90_000), None, &video, false),
            true,
        ));

        let mut demuxer = demuxer();
        let mut sink = RecordingSink::default();
        demuxer.parse_chunks(&ts, 0, &mut sink).unwrap();
        assert!(sink.metadata.is_empty());

        demuxer.flush(&mut sink);
        assert_eq!(sink.metadata.len(), 1);
        assert_eq!(sink.video.len(), 1);
    }

    #[test]
    fn test_resolution_change_emits_new_configuration() {
        // Main 720x576
        const MAIN_PAL_SPS: [u8; 11] = [
            0x67, 0x4d, 0x40, 0x1e, 0xec, 0x80, 0x5a, 0x09, 0x36, 0x04, 0x02,
        ];
        let mut ts = program(&[(0x1b, VIDEO_PID, &[])]);
        for (pts, sps) in [(90_000u64, &BASELINE_SPS[..]), (93_750, &MAIN_PAL_SPS[..])] {
            let video = annexb(&[sps, &PPS, &IDR]);
            ts.extend(packetize(
                VIDEO_PID,
                &pes_packet(0xe0, Some(pts), None, &video, true),
                true,
            ));
        }

        let mut demuxer = demuxer();
        let mut sink = RecordingSink::default();
        demuxer.parse_chunks(&ts, 0, &mut sink).unwrap();

        let widths: Vec<u32> = sink
            .metadata
            .iter()
            .filter_map(|m| match m {
                TrackMetadata::Video(v) => Some(v.codec_width),
                TrackMetadata::Audio(_) => None,
            })
            .collect();
        assert_eq!(widths, vec![320, 720]);
        assert_eq!(sink.video.len(), 2);
    }

    #[test]
    fn test_private_descriptor_reported_once() {
        let klva_registration: &[u8] = &[0x05, 0x04, b'K', b'L', b'V', b'A'];
        let ts = program(&[(0x06, 0x102, klva_registration)]);
        let mut twice = ts.clone();
        twice.extend(ts);

        let mut demuxer = demuxer();
        let mut sink = RecordingSink::default();
        demuxer.parse_chunks(&twice, 0, &mut sink).unwrap();

        assert_eq!(sink.timed.len(), 1);
        assert_matches::assert_matches!(
            &sink.timed[0],
            TimedMetadata::PrivateDataDescriptor(d) if d.pid == 0x102 && d.stream_type == 0x06
        );
    }

    #[test]
    fn test_malformed_pes_is_counted() {
        let mut ts = program(&[(0x1b, VIDEO_PID, &[])]);
        let mut bogus = vec![0x00, 0x00, 0x02, 0xe0, 0x00, 0x00];
        bogus.resize(50, 0xaa);
        ts.extend(packetize(VIDEO_PID, &bogus, false));

        let mut demuxer = demuxer();
        let mut sink = RecordingSink::default();
        demuxer.parse_chunks(&ts, 0, &mut sink).unwrap();
        assert_eq!(demuxer.malformed_count(), 1);
    }
}
