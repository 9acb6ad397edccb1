//! Commands into and events out of a transmuxing session.

use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tsforged_common::{DecodedAudio, MediaInfo, TrackType};
use tsforged_media::{InitSegment, MediaSegment};
use tsforged_probe::TimedMetadata;

use super::error::{DemuxErrorKind, TransmuxError};
use crate::io::LoaderError;

/// Requests accepted by a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmuxCommand {
    Start,
    Pause,
    Resume,
    /// Seek to a position in milliseconds.
    Seek(i64),
    Stop,
}

/// Periodic transfer statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsInfo {
    pub url: String,
    pub has_redirect: bool,
    pub redirected_url: Option<String>,
    /// Throughput in KB/s.
    pub speed: f64,
    pub loader_type: String,
    pub current_segment_index: usize,
    pub total_segment_count: usize,
}

#[derive(Debug, Clone)]
pub enum TransmuxEvent {
    InitSegment(TrackType, InitSegment),
    MediaSegment(TrackType, MediaSegment),
    MediaInfo(MediaInfo),
    Metadata(TimedMetadata),
    DecodedAudio(DecodedAudio),
    StatisticsInfo(StatisticsInfo),
    /// Position in milliseconds the player should seek to after a keyframe seek.
    RecommendSeekpoint(i64),
    RecoveredEarlyEof,
    LoadingComplete,
    IoError(LoaderError),
    DemuxError(DemuxErrorKind, String),
}

/// Host rendering sink fed with the produced segments.
pub trait MediaSink {
    fn append_init_segment(&mut self, segment: &InitSegment) -> std::io::Result<()>;

    fn append_media_segment(&mut self, segment: &MediaSegment) -> std::io::Result<()>;

    /// Backpressure signal; media appends are held back while true.
    fn is_full(&self) -> bool {
        false
    }

    fn end_of_stream(&mut self) -> std::io::Result<()>;

    /// Informational events: media info, metadata, statistics.
    fn on_event(&mut self, event: &TransmuxEvent) {
        let _ = event;
    }
}

/// Segment counts of a drained session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub init_segments: usize,
    pub video_segments: usize,
    pub audio_segments: usize,
}

struct Drain<'a> {
    sink: &'a mut dyn MediaSink,
    held: VecDeque<MediaSegment>,
    summary: DrainSummary,
}

impl Drain<'_> {
    fn append(&mut self, segment: &MediaSegment) -> std::io::Result<()> {
        self.sink.append_media_segment(segment)?;
        match segment.track_type {
            TrackType::Video => self.summary.video_segments += 1,
            TrackType::Audio => self.summary.audio_segments += 1,
        }
        Ok(())
    }

    fn release_held(&mut self, force: bool) -> std::io::Result<()> {
        while force || !self.sink.is_full() {
            let Some(segment) = self.held.pop_front() else {
                break;
            };
            self.append(&segment)?;
        }
        Ok(())
    }
}

fn sink_error(error: std::io::Error) -> TransmuxError {
    TransmuxError::Io(LoaderError::exception(
        error.raw_os_error().unwrap_or(-1),
        format!("sink: {}", error),
    ))
}

/// Forward events into `sink` until loading completes or fails.
///
/// Media segments arriving while the sink reports full are held back and
/// appended in order once it has room; held segments are appended before
/// `end_of_stream`. IO and demux errors end the drain with an error.
pub async fn drain_into_sink(
    events: &mut mpsc::UnboundedReceiver<TransmuxEvent>,
    sink: &mut dyn MediaSink,
) -> Result<DrainSummary, TransmuxError> {
    let mut drain = Drain {
        sink,
        held: VecDeque::new(),
        summary: DrainSummary::default(),
    };

    while let Some(event) = events.recv().await {
        drain.release_held(false).map_err(sink_error)?;

        match event {
            TransmuxEvent::InitSegment(_, ref segment) => {
                drain.release_held(true).map_err(sink_error)?;
                drain.sink.append_init_segment(segment).map_err(sink_error)?;
                drain.summary.init_segments += 1;
            }
            TransmuxEvent::MediaSegment(_, segment) => {
                if drain.sink.is_full() || !drain.held.is_empty() {
                    tracing::trace!(seq = segment.sequence_number, "Sink full, holding segment");
                    drain.held.push_back(segment);
                } else {
                    drain.append(&segment).map_err(sink_error)?;
                }
            }
            TransmuxEvent::LoadingComplete => {
                drain.release_held(true).map_err(sink_error)?;
                drain.sink.end_of_stream().map_err(sink_error)?;
                return Ok(drain.summary);
            }
            TransmuxEvent::IoError(error) => return Err(TransmuxError::Io(error)),
            TransmuxEvent::DemuxError(kind, message) => {
                return Err(TransmuxError::demux(kind, message))
            }
            other => drain.sink.on_event(&other),
        }
    }

    // session dropped its sender without completing
    drain.release_held(true).map_err(sink_error)?;
    Ok(drain.summary)
}
