//! Sample batch to fMP4 fragment conversion.

use bytes::{BufMut, Bytes};
use tsforged_common::{
    AudioCodecConfig, AudioSample, AudioTrack, AudioTrackMetadata, TrackMetadata, TrackType,
    TransmuxConfig, VideoSample, VideoTrack, VideoTrackMetadata,
};

use super::segment_info::{MediaSegmentInfo, MediaSegmentInfoList, SampleInfo};
use super::silent::silent_frame;
use crate::error::Result;
use crate::fmp4::{Fmp4Sample, InitSegment, MoofBuilder, SampleFlags};

/// One moof + mdat pair.
#[derive(Debug, Clone)]
pub struct MediaSegment {
    pub track_type: TrackType,
    /// `mfhd` sequence number, starting at 1 per track.
    pub sequence_number: u32,
    pub data: Bytes,
    pub sample_count: usize,
    pub info: MediaSegmentInfo,
}

/// A sample with corrected timing, ready to be written.
struct RemuxedSample {
    dts: i64,
    pts: i64,
    duration: i64,
    original_dts: i64,
    is_keyframe: bool,
    flags: SampleFlags,
    payload: Vec<Bytes>,
    size: usize,
}

impl RemuxedSample {
    fn audio(unit: Bytes, dts: i64, duration: i64, original_dts: i64) -> Self {
        Self {
            dts,
            pts: dts,
            duration,
            original_dts,
            is_keyframe: false,
            flags: SampleFlags::audio(),
            size: unit.len(),
            payload: vec![unit],
        }
    }

    fn info(&self) -> SampleInfo {
        SampleInfo::new(
            self.dts,
            self.pts,
            self.duration,
            self.original_dts,
            self.is_keyframe,
        )
    }

    fn entry(&self) -> Fmp4Sample {
        Fmp4Sample {
            duration: self.duration.max(0) as u32,
            size: self.size as u32,
            cts: (self.pts - self.dts) as i32,
            flags: self.flags,
        }
    }
}

/// Turns demuxed sample batches into fMP4 fragments on a continuous
/// millisecond timeline.
///
/// The remuxer holds back the last sample of every batch until the next
/// batch supplies its duration, and corrects the first timestamp of each
/// batch so it continues the previous segment of the same track.
#[derive(Debug)]
pub struct Remuxer {
    is_live: bool,
    fill_audio_timestamp_gap: bool,
    fill_silent_after_seek: bool,
    max_audio_frames_drift: f64,
    zero_distance_tolerance: i64,

    dts_base: Option<i64>,
    audio_meta: Option<AudioTrackMetadata>,
    video_meta: Option<VideoTrackMetadata>,
    // AAC timestamps accumulate fractional frame durations
    audio_next_dts: Option<f64>,
    video_next_dts: Option<i64>,
    audio_stashed_last_sample: Option<AudioSample>,
    video_stashed_last_sample: Option<VideoSample>,
    audio_segment_info_list: MediaSegmentInfoList,
    video_segment_info_list: MediaSegmentInfoList,
    audio_sequence_number: u32,
    video_sequence_number: u32,
}

impl Remuxer {
    pub fn new(config: &TransmuxConfig) -> Self {
        Self {
            is_live: config.is_live,
            fill_audio_timestamp_gap: config.fix_audio_timestamp_gap,
            fill_silent_after_seek: config.fill_silent_after_seek,
            max_audio_frames_drift: f64::from(config.max_audio_frames_drift),
            zero_distance_tolerance: config.zero_distance_tolerance_ms,
            dts_base: None,
            audio_meta: None,
            video_meta: None,
            audio_next_dts: None,
            video_next_dts: None,
            audio_stashed_last_sample: None,
            video_stashed_last_sample: None,
            audio_segment_info_list: MediaSegmentInfoList::new(TrackType::Audio),
            video_segment_info_list: MediaSegmentInfoList::new(TrackType::Video),
            audio_sequence_number: 0,
            video_sequence_number: 0,
        }
    }

    /// Adopt new track parameters and serialize the matching init segment.
    pub fn on_track_metadata(&mut self, metadata: TrackMetadata) -> Result<InitSegment> {
        let init = InitSegment::from_metadata(&metadata)?;
        tracing::debug!(
            track = %init.track_type,
            codec = %init.codec,
            "init segment generated"
        );
        match metadata {
            TrackMetadata::Video(meta) => self.video_meta = Some(meta),
            TrackMetadata::Audio(meta) => self.audio_meta = Some(meta),
        }
        Ok(init)
    }

    /// Smallest first DTS seen across both tracks, once known.
    pub fn timestamp_base(&self) -> Option<i64> {
        self.dts_base
    }

    /// Forget the expected next timestamps so the next batch is placed from
    /// segment history instead.
    pub fn insert_discontinuity(&mut self) {
        self.audio_next_dts = None;
        self.video_next_dts = None;
    }

    /// Drop stashed samples and segment history.
    pub fn seek(&mut self) {
        self.audio_stashed_last_sample = None;
        self.video_stashed_last_sample = None;
        self.video_segment_info_list.clear();
        self.audio_segment_info_list.clear();
    }

    pub fn video_segment_info(&self) -> &MediaSegmentInfoList {
        &self.video_segment_info_list
    }

    pub fn audio_segment_info(&self) -> &MediaSegmentInfoList {
        &self.audio_segment_info_list
    }

    /// Remux the pending samples of both tracks, video first.
    ///
    /// A track holding a single sample is left queued until more samples
    /// arrive.
    pub fn remux(
        &mut self,
        audio: Option<&mut AudioTrack>,
        video: Option<&mut VideoTrack>,
    ) -> Vec<MediaSegment> {
        if self.dts_base.is_none() {
            self.calculate_dts_base(audio.as_deref(), video.as_deref());
        }

        let mut segments = Vec::with_capacity(2);
        if let Some(track) = video {
            if self.video_meta.is_some() && track.samples.len() > 1 {
                segments.extend(self.remux_video(track.take().samples));
            }
        }
        if let Some(track) = audio {
            if self.audio_meta.is_some() && track.samples.len() > 1 {
                segments.extend(self.remux_audio(track.take().samples));
            }
        }
        segments
    }

    /// Emit the stashed last samples at end of input.
    pub fn flush_stashed_samples(&mut self) -> Vec<MediaSegment> {
        let mut segments = Vec::with_capacity(2);
        if let Some(sample) = self.video_stashed_last_sample.take() {
            segments.extend(self.remux_video(vec![sample]));
        }
        if let Some(sample) = self.audio_stashed_last_sample.take() {
            segments.extend(self.remux_audio(vec![sample]));
        }
        segments
    }

    fn calculate_dts_base(&mut self, audio: Option<&AudioTrack>, video: Option<&VideoTrack>) {
        let audio_base = audio.and_then(|t| t.samples.first()).map(|s| s.dts);
        let video_base = video.and_then(|t| t.samples.first()).map(|s| s.dts);
        self.dts_base = match (audio_base, video_base) {
            (Some(a), Some(v)) => Some(a.min(v)),
            (a, v) => a.or(v),
        };
        if let Some(base) = self.dts_base {
            tracing::debug!(dts_base = base, "timestamp base established");
        }
    }

    fn remux_video(&mut self, mut samples: Vec<VideoSample>) -> Option<MediaSegment> {
        let (track_id, ref_sample_duration) = {
            let meta = self.video_meta.as_ref()?;
            (meta.id, meta.ref_sample_duration)
        };
        if samples.is_empty() {
            return None;
        }

        // Hold back the last sample until its successor arrives
        let last_sample = if samples.len() > 1 { samples.pop() } else { None };
        if let Some(stashed) = self.video_stashed_last_sample.take() {
            samples.insert(0, stashed);
        }
        let stashed_dts = last_sample.as_ref().map(|s| s.dts);
        self.video_stashed_last_sample = last_sample;

        let dts_base = self.dts_base.unwrap_or(0);
        let first_original_dts = samples[0].dts - dts_base;
        let correction = match self.video_next_dts {
            Some(next_dts) => first_original_dts - next_dts,
            None => self
                .video_segment_info_list
                .continuity_correction(first_original_dts, self.zero_distance_tolerance),
        };

        let mut sync_points = Vec::new();
        let mut remuxed: Vec<RemuxedSample> = Vec::with_capacity(samples.len());

        for (i, sample) in samples.iter().enumerate() {
            let original_dts = sample.dts - dts_base;
            let dts = original_dts - correction;
            let pts = dts + sample.cts;

            let next_dts = samples.get(i + 1).map(|s| s.dts).or(stashed_dts);
            let duration = match next_dts {
                Some(next) => next - dts_base - correction - dts,
                None => remuxed
                    .last()
                    .map_or(ref_sample_duration.floor() as i64, |prev| prev.duration),
            };

            if sample.is_keyframe {
                let mut sync_point = SampleInfo::new(dts, pts, duration, sample.dts, true);
                sync_point.file_position = sample.file_position;
                sync_points.push(sync_point);
            }

            remuxed.push(RemuxedSample {
                dts,
                pts,
                duration,
                original_dts,
                is_keyframe: sample.is_keyframe,
                flags: SampleFlags::video(sample.is_keyframe),
                payload: sample.units.iter().map(|unit| unit.data.clone()).collect(),
                size: sample.length,
            });
        }

        let latest = remuxed.last()?;
        self.video_next_dts = Some(latest.dts + latest.duration);

        let first = &remuxed[0];
        let mut info = MediaSegmentInfo {
            begin_dts: first.dts,
            end_dts: latest.dts + latest.duration,
            begin_pts: first.pts,
            end_pts: latest.pts + latest.duration,
            original_begin_dts: first.original_dts,
            original_end_dts: latest.original_dts + latest.duration,
            sync_points: Vec::with_capacity(sync_points.len()),
            first_sample: first.info(),
            last_sample: latest.info(),
        };
        for sync_point in sync_points {
            info.append_sync_point(sync_point);
        }
        if !self.is_live {
            self.video_segment_info_list.append(info.clone());
        }

        self.video_sequence_number += 1;
        Some(MediaSegment {
            track_type: TrackType::Video,
            sequence_number: self.video_sequence_number,
            data: write_fragment(track_id, self.video_sequence_number, &remuxed),
            sample_count: remuxed.len(),
            info,
        })
    }

    fn remux_audio(&mut self, mut samples: Vec<AudioSample>) -> Option<MediaSegment> {
        let (track_id, ref_sample_duration, original_codec, channel_count, is_mp3) = {
            let meta = self.audio_meta.as_ref()?;
            (
                meta.id,
                meta.ref_sample_duration,
                meta.original_codec().to_string(),
                meta.channel_count,
                matches!(meta.config, AudioCodecConfig::Mp3),
            )
        };
        if samples.is_empty() {
            return None;
        }

        let last_sample = if samples.len() > 1 { samples.pop() } else { None };
        if let Some(stashed) = self.audio_stashed_last_sample.take() {
            samples.insert(0, stashed);
        }
        let stashed_dts = last_sample.as_ref().map(|s| s.dts);
        self.audio_stashed_last_sample = last_sample;

        let dts_base = self.dts_base.unwrap_or(0);
        let first_original_dts = samples[0].dts - dts_base;
        let mut insert_prefix_silent_frame = false;
        let correction = match self.audio_next_dts {
            Some(next_dts) => first_original_dts as f64 - next_dts,
            None if self.audio_segment_info_list.is_empty() => {
                insert_prefix_silent_frame = self.fill_silent_after_seek
                    && !self.video_segment_info_list.is_empty()
                    && original_codec != "mp3";
                0.0
            }
            None => self
                .audio_segment_info_list
                .continuity_correction(first_original_dts, self.zero_distance_tolerance)
                as f64,
        };

        if insert_prefix_silent_frame {
            // Start audio together with the video segment it lands in
            let first_sample_dts = first_original_dts as f64 - correction;
            let video_begin = self
                .video_segment_info_list
                .last_segment_before(first_original_dts)
                .map(|segment| segment.begin_dts)
                .filter(|&begin| (begin as f64) < first_sample_dts);
            if let Some(begin) = video_begin {
                if let Some(unit) = silent_frame(&original_codec, channel_count) {
                    tracing::debug!(
                        dts = begin,
                        duration = first_sample_dts - begin as f64,
                        "inserting prefix silent audio frame"
                    );
                    let dts = begin + dts_base;
                    samples.insert(0, AudioSample { unit, dts, pts: dts });
                }
            }
        }

        let aac_ref_duration = ref_sample_duration.filter(|_| !is_mp3);
        let drift_limit = aac_ref_duration.map(|d| self.max_audio_frames_drift * d);
        let mut remuxed: Vec<RemuxedSample> = Vec::with_capacity(samples.len());

        for (i, sample) in samples.iter().enumerate() {
            let original_dts = sample.dts - dts_base;
            if original_dts < 0 {
                continue;
            }

            match (aac_ref_duration, drift_limit) {
                (Some(ref_duration), Some(drift_limit)) => {
                    // Requantize to whole frame durations on a running clock
                    let mut cur_ref_dts = self.audio_next_dts.unwrap_or(original_dts as f64);
                    let gap = original_dts as f64 - cur_ref_dts;

                    if gap <= -drift_limit {
                        tracing::warn!(
                            original_dts,
                            cur_ref_dts,
                            overlap_ms = gap,
                            "dropping 1 audio frame due to timestamp overlap"
                        );
                        continue;
                    }

                    let dts = cur_ref_dts.floor() as i64;
                    let duration = (cur_ref_dts + ref_duration).floor() as i64 - dts;
                    remuxed.push(RemuxedSample::audio(
                        sample.unit.clone(),
                        dts,
                        duration,
                        original_dts,
                    ));

                    if gap >= drift_limit && self.fill_audio_timestamp_gap {
                        let frame_count = (gap / ref_duration).floor() as usize;
                        tracing::warn!(
                            original_dts,
                            cur_ref_dts,
                            gap_ms = gap.round(),
                            frame_count,
                            "large audio timestamp gap, generating silent frames"
                        );

                        let unit = silent_frame(&original_codec, channel_count).unwrap_or_else(|| {
                            tracing::warn!(
                                codec = %original_codec,
                                channel_count,
                                "no silent frame for this layout, repeating last frame"
                            );
                            sample.unit.clone()
                        });

                        for _ in 0..frame_count {
                            cur_ref_dts += ref_duration;
                            let int_dts = cur_ref_dts.floor() as i64;
                            let int_duration = (cur_ref_dts + ref_duration).floor() as i64 - int_dts;
                            remuxed.push(RemuxedSample::audio(
                                unit.clone(),
                                int_dts,
                                int_duration,
                                original_dts,
                            ));
                        }
                    }

                    self.audio_next_dts = Some(cur_ref_dts + ref_duration);
                }
                _ => {
                    // Timed by the stream's own timestamps
                    let correction = correction as i64;
                    let dts = original_dts - correction;
                    let next_dts = samples.get(i + 1).map(|s| s.dts).or(stashed_dts);
                    let duration = match next_dts {
                        Some(next) => next - dts_base - correction - dts,
                        None => remuxed.last().map_or(
                            ref_sample_duration.map_or(0, |d| d.floor() as i64),
                            |prev| prev.duration,
                        ),
                    };
                    remuxed.push(RemuxedSample::audio(
                        sample.unit.clone(),
                        dts,
                        duration,
                        original_dts,
                    ));
                    self.audio_next_dts = Some((dts + duration) as f64);
                }
            }
        }

        let first = remuxed.first()?;
        let latest = remuxed.last()?;

        let info = MediaSegmentInfo {
            begin_dts: first.dts,
            end_dts: latest.dts + latest.duration,
            begin_pts: first.dts,
            end_pts: latest.dts + latest.duration,
            original_begin_dts: first.original_dts,
            original_end_dts: latest.original_dts + latest.duration,
            sync_points: Vec::new(),
            first_sample: first.info(),
            last_sample: latest.info(),
        };
        if !self.is_live {
            self.audio_segment_info_list.append(info.clone());
        }

        self.audio_sequence_number += 1;
        Some(MediaSegment {
            track_type: TrackType::Audio,
            sequence_number: self.audio_sequence_number,
            data: write_fragment(track_id, self.audio_sequence_number, &remuxed),
            sample_count: remuxed.len(),
            info,
        })
    }
}

fn write_fragment(track_id: u32, sequence_number: u32, samples: &[RemuxedSample]) -> Bytes {
    let entries: Vec<Fmp4Sample> = samples.iter().map(RemuxedSample::entry).collect();
    let base_media_decode_time = samples.first().map_or(0, |s| s.dts.max(0) as u64);

    let mut buf = MoofBuilder::new(sequence_number, track_id)
        .base_media_decode_time(base_media_decode_time)
        .build(&entries);
    for sample in samples {
        for unit in &sample.payload {
            buf.put_slice(unit);
        }
    }
    buf.freeze()
}
