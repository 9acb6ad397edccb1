//! Timeline behavior of the remuxer across consecutive batches.

use bytes::Bytes;
use tsforged_common::{
    AudioCodecConfig, AudioSample, AudioTrack, AudioTrackMetadata, FrameRate, NalUnit,
    SampleAspectRatio, Track, TrackMetadata, TransmuxConfig, VideoCodecConfig, VideoSample,
    VideoTrack, VideoTrackMetadata,
};
use tsforged_media::{MediaSegment, Remuxer};

const REF_MS: f64 = 21.33;

fn remuxer() -> Remuxer {
    let mut remuxer = Remuxer::new(&TransmuxConfig::default());
    remuxer
        .on_track_metadata(TrackMetadata::Video(VideoTrackMetadata {
            id: 1,
            timescale: 1000,
            duration: 0,
            codec: "avc1.640028".to_string(),
            codec_width: 1920,
            codec_height: 1080,
            present_width: 1920,
            present_height: 1080,
            profile: "High".to_string(),
            level: "4.0".to_string(),
            bit_depth: 8,
            chroma_format: "4:2:0".to_string(),
            ref_frames: 2,
            sar: SampleAspectRatio::default(),
            frame_rate: FrameRate {
                fixed: true,
                fps: 25.0,
                fps_num: 25,
                fps_den: 1,
            },
            ref_sample_duration: 40.0,
            config: VideoCodecConfig::Avc {
                avcc: Bytes::from_static(&[0x01, 0x64, 0x00, 0x28, 0xff, 0xe0, 0x00]),
            },
        }))
        .unwrap();
    remuxer
        .on_track_metadata(TrackMetadata::Audio(AudioTrackMetadata {
            id: 2,
            timescale: 1000,
            duration: 0,
            codec: "mp4a.40.2".to_string(),
            sample_rate: 48000,
            channel_count: 2,
            ref_sample_duration: Some(REF_MS),
            config: AudioCodecConfig::Aac {
                config: Bytes::from_static(&[0x11, 0x90]),
                original_codec: "mp4a.40.2".to_string(),
            },
        }))
        .unwrap();
    remuxer
}

fn video(dts: impl IntoIterator<Item = i64>) -> VideoTrack {
    let mut track = Track::new(1);
    for (i, dts) in dts.into_iter().enumerate() {
        let unit = NalUnit::length_prefixed(1, &[0x41, 0x9a]);
        track.length += unit.data.len();
        track.samples.push(VideoSample {
            length: unit.data.len(),
            units: vec![unit],
            is_keyframe: i == 0,
            dts,
            pts: dts,
            cts: 0,
            file_position: None,
        });
    }
    track
}

fn audio(dts: impl IntoIterator<Item = i64>) -> AudioTrack {
    let mut track = Track::new(2);
    for dts in dts {
        track.length += 4;
        track.samples.push(AudioSample {
            unit: Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]),
            dts,
            pts: dts,
        });
    }
    track
}

/// Frame-aligned AAC timestamps for frame indices `range`, shifted by `offset` ms.
fn aac_dts(range: std::ops::Range<i64>, offset: i64) -> Vec<i64> {
    range
        .map(|i| (i as f64 * REF_MS).floor() as i64 + offset)
        .collect()
}

fn read_u32(data: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap())
}

/// `(dts, duration, size)` of every sample in a fragment.
fn fragment_samples(segment: &MediaSegment) -> Vec<(u64, u32, u32)> {
    let data = &segment.data[..];
    let tfdt = data.windows(4).position(|w| w == b"tfdt").unwrap() - 4;
    let mut dts = u64::from_be_bytes(data[tfdt + 12..tfdt + 20].try_into().unwrap());
    let trun = data.windows(4).position(|w| w == b"trun").unwrap() - 4;
    let count = read_u32(data, trun + 12) as usize;

    let mut samples = Vec::with_capacity(count);
    for i in 0..count {
        let entry = trun + 20 + i * 16;
        let duration = read_u32(data, entry);
        samples.push((dts, duration, read_u32(data, entry + 4)));
        dts += u64::from(duration);
    }
    samples
}

#[test]
fn batches_continue_the_previous_segment() {
    let mut remuxer = remuxer();

    // 25 fps video with a slow clock drift, three batches
    let mut segments = Vec::new();
    for batch in 0..3i64 {
        let mut track = video((0..10).map(|i| 5000 + batch * 401 + i * 40));
        segments.extend(remuxer.remux(None, Some(&mut track)));
    }
    assert_eq!(segments.len(), 3);

    for pair in segments.windows(2) {
        let previous = &pair[0].info.last_sample;
        assert_eq!(
            pair[1].info.first_sample.dts,
            previous.dts + previous.duration
        );
        assert_eq!(pair[1].sequence_number, pair[0].sequence_number + 1);
    }

    let mut last_dts = None;
    for segment in &segments {
        for (dts, duration, _) in fragment_samples(segment) {
            assert!(duration > 0);
            assert!(last_dts.map_or(true, |last| dts > last));
            last_dts = Some(dts);
        }
    }
}

#[test]
fn audio_batches_stay_continuous() {
    let mut remuxer = remuxer();

    let mut segments = Vec::new();
    for batch in 0..3 {
        let mut track = audio(aac_dts(batch * 8..batch * 8 + 8, 0));
        segments.extend(remuxer.remux(Some(&mut track), None));
    }
    assert_eq!(segments.len(), 3);

    for pair in segments.windows(2) {
        let previous = &pair[0].info.last_sample;
        assert_eq!(
            pair[1].info.first_sample.dts,
            previous.dts + previous.duration
        );
    }
}

#[test]
fn discontinuity_disables_correction() {
    let mut remuxer = remuxer();

    let mut track = video((0..10).map(|i| i * 40));
    remuxer.remux(None, Some(&mut track));
    let mut track = video((10..20).map(|i| i * 40));
    remuxer.remux(None, Some(&mut track));

    remuxer.insert_discontinuity();

    let mut track = video((0..10).map(|i| 60_000 + i * 40));
    let segment = remuxer.remux(None, Some(&mut track)).remove(0);
    let first = segment.info.first_sample;
    // The stashed sample from before the jump leads the batch at its own time
    assert_eq!(first.original_dts, 760);
    assert_eq!(first.dts, first.original_dts);

    let mut track = audio(aac_dts(0..8, 0));
    remuxer.remux(Some(&mut track), None);
    remuxer.insert_discontinuity();
    let mut track = audio(aac_dts(0..8, 30_000));
    let segment = remuxer.remux(Some(&mut track), None).remove(0);
    let first = segment.info.first_sample;
    assert_eq!(first.dts, first.original_dts);
}

#[test]
fn jump_without_discontinuity_keeps_timeline_contiguous() {
    let mut remuxer = remuxer();

    let mut track = video((0..10).map(|i| i * 40));
    let first = remuxer.remux(None, Some(&mut track)).remove(0);
    let mut track = video((0..10).map(|i| 90_000 + i * 40));
    let second = remuxer.remux(None, Some(&mut track)).remove(0);

    assert_eq!(second.info.begin_dts, first.info.end_dts);
}

#[test]
fn audio_gap_is_filled_with_silent_frames() {
    let mut remuxer = remuxer();

    let mut track = audio(aac_dts(0..6, 0));
    let first = remuxer.remux(Some(&mut track), None).remove(0);
    let mut track = audio(aac_dts(6..12, 0));
    let second = remuxer.remux(Some(&mut track), None).remove(0);
    // Batch 3 arrives 100 ms late
    let mut track = audio(aac_dts(12..16, 100));
    let third = remuxer.remux(Some(&mut track), None).remove(0);

    assert_eq!(first.sample_count, 5);
    assert_eq!(second.sample_count, 6);

    let expected_silent = (100.0 / REF_MS).floor() as usize;
    assert_eq!(expected_silent, 4);

    let samples = fragment_samples(&third);
    // Stashed frame, three real frames ahead of the new stash, four fillers
    assert_eq!(samples.len(), 4 + expected_silent);
    let silent_len = tsforged_media::remux::silent_frame("mp4a.40.2", 2)
        .unwrap()
        .len() as u32;
    let silent: Vec<usize> = samples
        .iter()
        .enumerate()
        .filter(|(_, (_, _, size))| *size == silent_len)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(silent, vec![2, 3, 4, 5]);

    for pair in samples.windows(2) {
        assert!(pair[1].0 > pair[0].0);
    }
    // The timeline stays contiguous with the previous batch
    assert_eq!(
        samples[0].0 as i64,
        second.info.last_sample.dts + second.info.last_sample.duration
    );
}

#[test]
fn gap_fill_can_be_disabled() {
    let mut config = TransmuxConfig::default();
    config.fix_audio_timestamp_gap = false;
    let mut remuxer = Remuxer::new(&config);
    remuxer
        .on_track_metadata(TrackMetadata::Audio(AudioTrackMetadata {
            id: 2,
            timescale: 1000,
            duration: 0,
            codec: "mp4a.40.2".to_string(),
            sample_rate: 48000,
            channel_count: 2,
            ref_sample_duration: Some(REF_MS),
            config: AudioCodecConfig::Aac {
                config: Bytes::from_static(&[0x11, 0x90]),
                original_codec: "mp4a.40.2".to_string(),
            },
        }))
        .unwrap();

    let mut track = audio(aac_dts(0..6, 0));
    remuxer.remux(Some(&mut track), None);
    let mut track = audio(aac_dts(6..10, 100));
    let segment = remuxer.remux(Some(&mut track), None).remove(0);
    assert_eq!(segment.sample_count, 4);
}
