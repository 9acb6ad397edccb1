//! Synthesized transport streams through loader, demuxer and remuxer.

mod common;

use assert_matches::assert_matches;
use std::sync::Arc;
use std::time::Duration;
use tsforged::io::{FileLoader, Loader};
use tsforged::transmux::{
    drain_into_sink, DemuxErrorKind, DrainSummary, MediaDataSource, MediaSegmentSource,
    MediaSink, TransmuxCommand, TransmuxError, TransmuxEvent, TransmuxingController,
};
use tsforged_common::{MediaInfo, TrackType, TransmuxConfig};
use tsforged_media::{InitSegment, MediaSegment};

#[derive(Default)]
struct CollectingSink {
    init: Vec<InitSegment>,
    media: Vec<MediaSegment>,
    media_info: Vec<MediaInfo>,
    ended: bool,
}

impl MediaSink for CollectingSink {
    fn append_init_segment(&mut self, segment: &InitSegment) -> std::io::Result<()> {
        self.init.push(segment.clone());
        Ok(())
    }

    fn append_media_segment(&mut self, segment: &MediaSegment) -> std::io::Result<()> {
        self.media.push(segment.clone());
        Ok(())
    }

    fn end_of_stream(&mut self) -> std::io::Result<()> {
        self.ended = true;
        Ok(())
    }

    fn on_event(&mut self, event: &TransmuxEvent) {
        if let TransmuxEvent::MediaInfo(info) = event {
            self.media_info.push(info.clone());
        }
    }
}

fn write_input(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> MediaSegmentSource {
    let path = dir.path().join(name);
    std::fs::write(&path, data).unwrap();
    MediaSegmentSource::new(path.to_string_lossy()).with_filesize(data.len() as u64)
}

fn file_loader() -> Arc<dyn Loader> {
    Arc::new(FileLoader::new())
}

async fn run_to_end(
    source: MediaDataSource,
    sink: &mut CollectingSink,
) -> Result<DrainSummary, TransmuxError> {
    let (controller, mut events) =
        TransmuxingController::new(source, TransmuxConfig::default(), file_loader()).unwrap();
    let handle = controller.spawn();
    assert!(handle.send(TransmuxCommand::Start).await);

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        drain_into_sink(&mut events, sink),
    )
    .await
    .expect("transmux timed out");
    handle.shutdown().await;
    result
}

#[tokio::test]
async fn audio_only_file_becomes_fmp4() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(&dir, "audio.ts", &common::adts_program(40));
    let mut sink = CollectingSink::default();

    let summary = run_to_end(MediaDataSource::single(input), &mut sink)
        .await
        .unwrap();

    assert!(sink.ended);
    assert_eq!(summary.video_segments, 0);
    assert!(summary.audio_segments >= 1);
    assert!(summary.init_segments >= 1);

    let init = &sink.init[0];
    assert_eq!(init.track_type, TrackType::Audio);
    assert_eq!(&init.data[4..8], b"ftyp");

    for segment in &sink.media {
        assert_eq!(segment.track_type, TrackType::Audio);
        assert_eq!(&segment.data[4..8], b"moof");
    }
    for pair in sink.media.windows(2) {
        assert!(pair[1].sequence_number > pair[0].sequence_number);
    }

    let info = &sink.media_info[0];
    assert_eq!(info.has_audio, Some(true));
    assert_eq!(info.has_video, Some(false));
    assert_eq!(info.audio_sample_rate, Some(44100));
    assert_eq!(info.segment_count, Some(1));
}

#[tokio::test]
async fn non_transport_stream_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(&dir, "noise.bin", &[0u8; 2000]);
    let mut sink = CollectingSink::default();

    let result = run_to_end(MediaDataSource::single(input), &mut sink).await;

    assert_matches!(
        result,
        Err(TransmuxError::Demux {
            kind: DemuxErrorKind::FormatUnsupported,
            ..
        })
    );
    assert!(!sink.ended);
    assert!(sink.init.is_empty());
}

#[tokio::test]
async fn segments_load_back_to_back() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_input(&dir, "a.ts", &common::adts_program(30)).with_duration(1000);
    let second = write_input(&dir, "b.ts", &common::adts_program(30)).with_duration(1000);
    let source = MediaDataSource::from_segments(vec![first, second]);
    assert_eq!(source.segments[1].timestamp_base, 1000);

    let mut sink = CollectingSink::default();
    let summary = run_to_end(source, &mut sink).await.unwrap();

    assert!(sink.ended);
    assert!(summary.audio_segments >= 2);
    assert_eq!(sink.media_info.len(), 2);
    for info in &sink.media_info {
        assert_eq!(info.segment_count, Some(2));
        assert_eq!(info.duration, Some(2000));
    }
    for pair in sink.media.windows(2) {
        assert!(pair[1].sequence_number > pair[0].sequence_number);
    }
}

#[tokio::test]
async fn missing_file_reports_io_error() {
    let source = MediaDataSource::single(MediaSegmentSource::new("/nonexistent/input.ts"));
    let mut sink = CollectingSink::default();

    let result = run_to_end(source, &mut sink).await;
    assert_matches!(result, Err(TransmuxError::Io(_)));
}

#[tokio::test]
async fn statistics_describe_the_current_segment() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(&dir, "audio.ts", &common::adts_program(10));
    let (mut controller, mut events) = TransmuxingController::new(
        MediaDataSource::single(input.clone()),
        TransmuxConfig::default(),
        file_loader(),
    )
    .unwrap();

    controller.start();
    controller.report_statistics();

    let stats = controller.statistics().unwrap();
    assert_eq!(stats.url, input.url);
    assert_eq!(stats.loader_type, "file-loader");
    assert_eq!(stats.current_segment_index, 0);
    assert_eq!(stats.total_segment_count, 1);
    assert!(!stats.has_redirect);

    assert_matches!(events.try_recv(), Ok(TransmuxEvent::StatisticsInfo(_)));
}

#[tokio::test]
async fn pause_and_resume_toggle_loading() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(&dir, "audio.ts", &common::adts_program(10));
    let (mut controller, _events) = TransmuxingController::new(
        MediaDataSource::single(input),
        TransmuxConfig::default(),
        file_loader(),
    )
    .unwrap();

    assert!(!controller.is_loading());
    controller.start();
    assert!(controller.is_loading());

    controller.step().await;
    controller.pause();
    assert!(!controller.is_loading());

    controller.resume();
    assert!(controller.is_loading());
}

#[test]
fn empty_source_is_rejected() {
    let result = TransmuxingController::new(
        MediaDataSource::default(),
        TransmuxConfig::default(),
        file_loader(),
    );
    assert_matches!(result.err(), Some(TransmuxError::Config(_)));
}
