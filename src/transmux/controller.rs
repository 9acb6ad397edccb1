//! Multi-segment transmuxing session.
//!
//! A [`TransmuxingController`] owns one [`IoController`] per source segment,
//! the demuxer and the remuxer. Data flows synchronously from the loader
//! through the demuxer into the remuxer inside [`TransmuxingController::step`];
//! the only suspension point is the loader waiting for the next chunk.
//!
//! Results leave as [`TransmuxEvent`]s on an unbounded channel. Spawned with
//! [`TransmuxingController::spawn`], the session is driven by
//! [`TransmuxCommand`]s sent through the returned [`TransmuxHandle`].

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tsforged_common::{
    AudioDecoder, AudioTrack, DecodedAudio, KeyframeIndex, MediaInfo, TrackMetadata,
    TrackType, TransmuxConfig, VideoTrack,
};
use tsforged_media::{MediaSegment, Remuxer};
use tsforged_probe::{probe, DemuxSink, ProbeResult, TimedMetadata, TsDemuxer};

use super::error::{DemuxErrorKind, Result, TransmuxError};
use super::events::{StatisticsInfo, TransmuxCommand, TransmuxEvent};
use crate::io::{ChunkConsumer, DataSource, IoController, IoStatus, Loader, LoaderError};

/// Capacity of the command channel of a spawned session.
const COMMAND_CAPACITY: usize = 16;

/// One independently loadable part of a source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaSegmentSource {
    pub url: String,
    /// Duration in milliseconds.
    pub duration: Option<u64>,
    pub filesize: Option<u64>,
    /// Sum of the durations of the preceding segments.
    pub timestamp_base: i64,
    pub redirected_url: Option<String>,
}

impl MediaSegmentSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_duration(mut self, duration: u64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_filesize(mut self, filesize: u64) -> Self {
        self.filesize = Some(filesize);
        self
    }
}

/// A logical source made of one or more segments played back to back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaDataSource {
    /// Total duration in milliseconds.
    pub duration: Option<u64>,
    pub segments: Vec<MediaSegmentSource>,
}

impl MediaDataSource {
    pub fn single(segment: MediaSegmentSource) -> Self {
        Self::from_segments(vec![segment])
    }

    /// Assign each segment the cumulative duration of its predecessors.
    pub fn from_segments(mut segments: Vec<MediaSegmentSource>) -> Self {
        let mut total: u64 = 0;
        for segment in &mut segments {
            segment.timestamp_base = total as i64;
            total += segment.duration.unwrap_or(0);
        }
        let known = segments.iter().any(|s| s.duration.is_some());
        Self {
            duration: known.then_some(total),
            segments,
        }
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Index of the segment whose time range contains `milliseconds`.
    pub fn segment_index_containing(&self, milliseconds: i64) -> usize {
        self.segments
            .partition_point(|s| s.timestamp_base <= milliseconds)
            .saturating_sub(1)
    }

    fn data_source(&self, index: usize) -> DataSource {
        let segment = &self.segments[index];
        DataSource {
            url: segment.url.clone(),
            filesize: segment.filesize,
            redirected_url: segment.redirected_url.clone(),
        }
    }
}

type AudioDecoderFactory = Box<dyn Fn() -> Box<dyn AudioDecoder> + Send>;

/// Demuxer output side: remuxes samples and turns them into events.
struct RemuxStage {
    remuxer: Remuxer,
    events: mpsc::UnboundedSender<TransmuxEvent>,

    segment_index: usize,
    segment_count: usize,
    duration: Option<u64>,

    media_info: Option<MediaInfo>,
    segment_infos: Vec<Option<MediaInfo>>,
    keyframes: Vec<KeyframeIndex>,

    /// Seek waiting for the target segment's media info; media segments are
    /// dropped meanwhile.
    pending_seek_time: Option<i64>,
    /// Keyframe time to recommend with the first video segment after a seek.
    pending_resolve_seek_point: Option<i64>,
    /// Pending seek whose media info just arrived, for the controller to run.
    deferred_seek: Option<i64>,
    fatal: Option<TransmuxError>,
}

impl RemuxStage {
    fn emit(&self, event: TransmuxEvent) {
        // a dropped receiver only means nobody listens anymore
        let _ = self.events.send(event);
    }

    fn fail(&mut self, error: TransmuxError) {
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
    }

    fn is_seekable(&self) -> bool {
        self.media_info.is_some() && self.keyframes.iter().any(|k| !k.is_empty())
    }

    fn report_segment_media_info(&self, index: usize) {
        let (Some(aggregate), Some(Some(segment))) =
            (self.media_info.as_ref(), self.segment_infos.get(index))
        else {
            return;
        };
        let info = segment.segment_view(aggregate.duration, aggregate.segment_count);
        self.emit(TransmuxEvent::MediaInfo(info));
    }

    fn on_media_segment(&mut self, segment: MediaSegment) {
        if segment.track_type == TrackType::Video {
            let index = &mut self.keyframes[self.segment_index];
            for sync_point in &segment.info.sync_points {
                if let Some(position) = sync_point.file_position {
                    index.push(sync_point.original_dts, position);
                }
            }
        }

        if self.pending_seek_time.is_some() {
            return;
        }

        let resolve = match segment.track_type {
            TrackType::Video => self.pending_resolve_seek_point.take(),
            TrackType::Audio => None,
        };
        self.emit(TransmuxEvent::MediaSegment(segment.track_type, segment));
        if let Some(seekpoint) = resolve {
            self.emit(TransmuxEvent::RecommendSeekpoint(seekpoint));
        }
    }

    fn emit_segments(&mut self, segments: Vec<MediaSegment>) {
        for segment in segments {
            self.on_media_segment(segment);
        }
    }
}

impl DemuxSink for RemuxStage {
    fn on_track_metadata(&mut self, metadata: TrackMetadata) {
        let track_type = metadata.track_type();
        match self.remuxer.on_track_metadata(metadata) {
            Ok(init) => self.emit(TransmuxEvent::InitSegment(track_type, init)),
            Err(error) => {
                tracing::error!(track = %track_type, "Cannot build init segment: {}", error);
                self.fail(TransmuxError::demux(
                    DemuxErrorKind::CodecUnsupported,
                    error.to_string(),
                ));
            }
        }
    }

    fn on_media_info(&mut self, info: &MediaInfo) {
        if self.media_info.is_none() {
            let mut aggregate = info.clone();
            aggregate.keyframes = None;
            aggregate.segments.clear();
            aggregate.segment_count = Some(self.segment_count);
            aggregate.duration = self.duration.or(info.duration);
            self.media_info = Some(aggregate);
        }

        let mut segment = info.clone();
        segment.keyframes = None;
        segment.segments.clear();
        self.segment_infos[self.segment_index] = Some(segment);
        self.report_segment_media_info(self.segment_index);

        if let Some(target) = self.pending_seek_time {
            self.deferred_seek = Some(target);
        }
    }

    fn on_data_available(&mut self, audio: Option<&mut AudioTrack>, video: Option<&mut VideoTrack>) {
        let segments = self.remuxer.remux(audio, video);
        self.emit_segments(segments);
    }

    fn on_timed_metadata(&mut self, mut metadata: TimedMetadata) {
        match metadata {
            TimedMetadata::AsynchronousKlv(_) | TimedMetadata::PrivateDataDescriptor(_) => {}
            _ => {
                // timed events wait for the media timeline to be anchored
                let Some(base) = self.remuxer.timestamp_base() else {
                    return;
                };
                metadata.rebase(base);
            }
        }
        self.emit(TransmuxEvent::Metadata(metadata));
    }

    fn on_decoded_audio(&mut self, audio: DecodedAudio) {
        self.emit(TransmuxEvent::DecodedAudio(audio));
    }
}

/// Loader output side: probes, demuxes and feeds the remux stage.
struct Session {
    config: TransmuxConfig,
    source: MediaDataSource,
    demuxer: Option<TsDemuxer>,
    /// The next chunk starting at byte 0 is probed and gets a fresh demuxer.
    needs_probe: bool,
    audio_decoder: Option<AudioDecoderFactory>,
    stage: RemuxStage,
}

impl Session {
    fn current_segment(&self) -> &MediaSegmentSource {
        &self.source.segments[self.stage.segment_index]
    }

    /// Probe `chunk` and create a demuxer. `Ok(false)` asks for more data.
    fn setup_demuxer(&mut self, chunk: &[u8]) -> Result<bool> {
        let result = probe(chunk);
        match result {
            ProbeResult::NeedMoreData => return Ok(false),
            ProbeResult::NoMatch => {
                return Err(TransmuxError::demux(
                    DemuxErrorKind::FormatUnsupported,
                    "Non MPEG-TS, Unsupported media type!",
                ))
            }
            ProbeResult::Match { .. } => {}
        }

        let mut demuxer = TsDemuxer::new(result, &self.config)
            .map_err(|e| TransmuxError::demux(DemuxErrorKind::FormatUnsupported, e.to_string()))?;
        if let Some(factory) = &self.audio_decoder {
            demuxer = demuxer.with_audio_decoder(factory());
        }

        let segment = self.current_segment();
        demuxer.set_timestamp_base(segment.timestamp_base);
        if let Some(duration) = segment.duration {
            demuxer.set_duration(duration);
        }
        tracing::debug!(
            segment = self.stage.segment_index,
            packet_size = demuxer.packet_size(),
            "MPEG-TS demuxer ready"
        );

        self.demuxer = Some(demuxer);
        self.needs_probe = false;
        Ok(true)
    }

    /// Drain what the demuxer and remuxer still hold at the end of a segment.
    fn finish_segment(&mut self) {
        if let Some(demuxer) = self.demuxer.as_mut() {
            demuxer.flush(&mut self.stage);
            let dropped = demuxer.malformed_count();
            if dropped > 0 {
                tracing::warn!(segment = self.stage.segment_index, dropped, "Skipped malformed packets");
            }
        }
        let segments = self.stage.remuxer.flush_stashed_samples();
        self.stage.emit_segments(segments);
    }
}

impl ChunkConsumer for Session {
    fn on_data_arrival(&mut self, chunk: &[u8], byte_start: u64) -> usize {
        if self.stage.fatal.is_some() {
            return 0;
        }

        if self.needs_probe {
            if byte_start > 0 && self.demuxer.is_some() {
                // continuing an existing stream at an offset
                self.needs_probe = false;
                let base = self.current_segment().timestamp_base;
                if let Some(demuxer) = self.demuxer.as_mut() {
                    demuxer.set_timestamp_base(base);
                }
            } else {
                match self.setup_demuxer(chunk) {
                    Ok(true) => {}
                    Ok(false) => return 0,
                    Err(error) => {
                        self.stage.fail(error);
                        return 0;
                    }
                }
            }
        }

        let Some(demuxer) = self.demuxer.as_mut() else {
            return 0;
        };
        match demuxer.parse_chunks(chunk, byte_start, &mut self.stage) {
            Ok(consumed) => consumed,
            Err(error) => {
                self.stage
                    .fail(TransmuxError::demux(DemuxErrorKind::FormatError, error.to_string()));
                0
            }
        }
    }

    fn on_seeked(&mut self) {
        self.stage.remuxer.insert_discontinuity();
    }

    fn on_recovered_early_eof(&mut self) {
        self.stage.emit(TransmuxEvent::RecoveredEarlyEof);
    }

    fn on_redirect(&mut self, redirected_url: &str) {
        let index = self.stage.segment_index;
        self.source.segments[index].redirected_url = Some(redirected_url.to_string());
    }
}

/// Drives loading, demuxing and remuxing of a [`MediaDataSource`].
pub struct TransmuxingController {
    config: TransmuxConfig,
    loader: Arc<dyn Loader>,
    session: Session,
    io: Option<IoController>,
    statistics_enabled: bool,
    statistics: Arc<RwLock<Option<StatisticsInfo>>>,
}

impl TransmuxingController {
    /// Create a session. Events are delivered on the returned receiver.
    pub fn new(
        source: MediaDataSource,
        config: TransmuxConfig,
        loader: Arc<dyn Loader>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransmuxEvent>)> {
        config.validate()?;
        if source.segments.is_empty() {
            return Err(TransmuxError::Config("media source has no segments".to_string()));
        }

        let (events, receiver) = mpsc::unbounded_channel();
        let segment_count = source.segment_count();
        let stage = RemuxStage {
            remuxer: Remuxer::new(&config),
            events,
            segment_index: 0,
            segment_count,
            duration: source.duration,
            media_info: None,
            segment_infos: vec![None; segment_count],
            keyframes: vec![KeyframeIndex::default(); segment_count],
            pending_seek_time: None,
            pending_resolve_seek_point: None,
            deferred_seek: None,
            fatal: None,
        };

        let controller = Self {
            session: Session {
                config: config.clone(),
                source,
                demuxer: None,
                needs_probe: true,
                audio_decoder: None,
                stage,
            },
            config,
            loader,
            io: None,
            statistics_enabled: false,
            statistics: Arc::new(RwLock::new(None)),
        };
        Ok((controller, receiver))
    }

    /// Software decoder for MPEG audio Layer II, created per demuxer.
    pub fn with_audio_decoder<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn AudioDecoder> + Send + 'static,
    {
        self.session.audio_decoder = Some(Box::new(factory));
        self
    }

    pub fn start(&mut self) {
        self.load_segment(0, None);
        self.statistics_enabled = true;
    }

    pub fn stop(&mut self) {
        self.internal_abort();
        self.statistics_enabled = false;
    }

    pub fn pause(&mut self) {
        if let Some(io) = self.io.as_mut().filter(|io| io.is_working()) {
            io.pause();
            self.statistics_enabled = false;
        }
    }

    pub fn resume(&mut self) {
        if let Some(io) = self.io.as_mut().filter(|io| io.is_paused()) {
            io.resume();
            self.session.on_seeked();
            self.statistics_enabled = true;
        }
    }

    /// Seek to the keyframe at or before `milliseconds`. Ignored until the
    /// source has a keyframe index.
    pub fn seek(&mut self, milliseconds: i64) {
        if !self.session.stage.is_seekable() {
            tracing::debug!(milliseconds, "Source not seekable yet, seek ignored");
            return;
        }

        let target = self.session.source.segment_index_containing(milliseconds);
        let stage = &mut self.session.stage;

        if target == stage.segment_index {
            if stage.segment_infos[target].is_none() {
                // loading started but media info has not arrived yet
                stage.pending_seek_time = Some(milliseconds);
            } else {
                let keyframe = stage.keyframes[target].nearest_keyframe(milliseconds);
                stage.remuxer.seek();
                if let Some(io) = self.io.as_mut() {
                    io.seek(keyframe.map_or(0, |k| k.file_position));
                }
                self.session.on_seeked();
                self.session.stage.pending_resolve_seek_point = keyframe.map(|k| k.milliseconds);
                tracing::debug!(milliseconds, keyframe = ?keyframe, "Intra-segment seek");
            }
        } else if stage.segment_infos[target].is_none() {
            stage.pending_seek_time = Some(milliseconds);
            self.internal_abort();
            self.session.stage.remuxer.seek();
            self.session.stage.remuxer.insert_discontinuity();
            self.load_segment(target, None);
            tracing::debug!(milliseconds, segment = target, "Cross-segment seek, awaiting media info");
        } else {
            let keyframe = stage.keyframes[target].nearest_keyframe(milliseconds);
            self.internal_abort();
            self.session.stage.remuxer.seek();
            self.session.stage.remuxer.insert_discontinuity();
            let base = self.session.source.segments[target].timestamp_base;
            if let Some(demuxer) = self.session.demuxer.as_mut() {
                demuxer.reset_media_info();
                demuxer.set_timestamp_base(base);
            }
            self.load_segment(target, keyframe.map(|k| k.file_position));
            self.session.stage.pending_resolve_seek_point = keyframe.map(|k| k.milliseconds);
            self.session.stage.report_segment_media_info(target);
            tracing::debug!(milliseconds, segment = target, keyframe = ?keyframe, "Cross-segment seek");
        }

        self.statistics_enabled = true;
    }

    pub fn handle_command(&mut self, command: TransmuxCommand) {
        tracing::debug!(command = ?command, "Transmux command");
        match command {
            TransmuxCommand::Start => self.start(),
            TransmuxCommand::Pause => self.pause(),
            TransmuxCommand::Resume => self.resume(),
            TransmuxCommand::Seek(milliseconds) => self.seek(milliseconds),
            TransmuxCommand::Stop => self.stop(),
        }
    }

    /// Whether a request is open or pending.
    pub fn is_loading(&self) -> bool {
        self.io.as_ref().is_some_and(|io| io.is_working())
    }

    pub fn current_segment_index(&self) -> usize {
        self.session.stage.segment_index
    }

    /// Statistics as of the last report.
    pub fn statistics(&self) -> Option<StatisticsInfo> {
        self.statistics.read().clone()
    }

    fn internal_abort(&mut self) {
        if let Some(mut io) = self.io.take() {
            io.abort();
        }
    }

    fn load_segment(&mut self, index: usize, from: Option<u64>) {
        let from = from.filter(|&position| position > 0);
        self.session.stage.segment_index = index;
        self.session.needs_probe = from.is_none();

        let source = self.session.source.data_source(index);
        tracing::info!(segment = index, url = %source.url, from = ?from, "Loading segment");

        let mut io = IoController::new(source, &self.config, Arc::clone(&self.loader));
        io.open(from);
        self.io = Some(io);
    }

    /// Move the pipeline forward by one loader step.
    pub async fn step(&mut self) {
        let Some(io) = self.io.as_mut() else {
            return;
        };

        let status = io.step(&mut self.session).await;

        if let Some(error) = self.session.stage.fatal.take() {
            self.on_demux_error(error);
            return;
        }

        match status {
            Ok(IoStatus::Complete) => self.on_io_complete(),
            Ok(IoStatus::Idle | IoStatus::Buffering) => {}
            Err(error) => self.on_io_error(error),
        }

        if let Some(target) = self.session.stage.deferred_seek.take() {
            self.session.stage.pending_seek_time = None;
            self.seek(target);
        }
    }

    fn on_io_complete(&mut self) {
        self.session.finish_segment();

        let next = self.session.stage.segment_index + 1;
        if next < self.session.source.segment_count() {
            self.internal_abort();
            self.load_segment(next, None);
        } else {
            tracing::info!("Loading complete");
            self.session.stage.emit(TransmuxEvent::LoadingComplete);
            self.statistics_enabled = false;
        }
    }

    fn on_io_error(&mut self, error: LoaderError) {
        tracing::error!(
            kind = error.kind(),
            code = error.code(),
            msg = error.message(),
            "IOException"
        );
        self.session.stage.emit(TransmuxEvent::IoError(error));
        self.internal_abort();
        self.statistics_enabled = false;
    }

    fn on_demux_error(&mut self, error: TransmuxError) {
        tracing::error!("DemuxException: {}", error);
        let (kind, message) = match error {
            TransmuxError::Demux { kind, message } => (kind, message),
            other => (DemuxErrorKind::FormatError, other.to_string()),
        };
        self.session.stage.emit(TransmuxEvent::DemuxError(kind, message));
        self.internal_abort();
        self.statistics_enabled = false;
    }

    pub fn report_statistics(&mut self) {
        let Some(io) = self.io.as_mut() else {
            return;
        };
        let info = StatisticsInfo {
            url: io.current_url().to_string(),
            has_redirect: io.has_redirect(),
            redirected_url: io.current_redirected_url().map(str::to_string),
            speed: io.current_speed(),
            loader_type: io.loader_type().to_string(),
            current_segment_index: self.session.stage.segment_index,
            total_segment_count: self.session.source.segment_count(),
        };
        *self.statistics.write() = Some(info.clone());
        self.session.stage.emit(TransmuxEvent::StatisticsInfo(info));
    }

    /// Process commands and drive loading until stopped or cancelled.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<TransmuxCommand>,
        cancel: CancellationToken,
    ) {
        let period = Duration::from_millis(self.config.statistics_info_report_interval_ms);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let loading = self.is_loading();
            let reporting = self.statistics_enabled;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.stop();
                    break;
                }
                command = commands.recv() => match command {
                    Some(TransmuxCommand::Stop) | None => {
                        self.stop();
                        break;
                    }
                    Some(command) => self.handle_command(command),
                },
                _ = ticker.tick(), if reporting => self.report_statistics(),
                _ = self.step(), if loading => {}
            }
        }
        tracing::debug!("Transmuxing session ended");
    }

    /// Run the session on the tokio runtime.
    pub fn spawn(self) -> TransmuxHandle {
        let (commands, receiver) = mpsc::channel(COMMAND_CAPACITY);
        let cancel = CancellationToken::new();
        let statistics = Arc::clone(&self.statistics);
        let task = tokio::spawn(self.run(receiver, cancel.clone()));
        TransmuxHandle {
            commands,
            cancel,
            statistics,
            task,
        }
    }
}

/// Control side of a spawned session.
pub struct TransmuxHandle {
    commands: mpsc::Sender<TransmuxCommand>,
    cancel: CancellationToken,
    statistics: Arc<RwLock<Option<StatisticsInfo>>>,
    task: tokio::task::JoinHandle<()>,
}

impl TransmuxHandle {
    /// Queue a command. Returns false once the session has ended.
    pub async fn send(&self, command: TransmuxCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    pub fn latest_statistics(&self) -> Option<StatisticsInfo> {
        self.statistics.read().clone()
    }

    /// Cancel the session and wait for it to wind down.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(error) = self.task.await {
            tracing::warn!("Transmuxing task ended abnormally: {}", error);
        }
    }
}
