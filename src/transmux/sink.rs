//! Writes fMP4 output to a directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tsforged_common::TrackType;
use tsforged_media::{InitSegment, MediaSegment};

use super::events::{MediaSink, TransmuxEvent};

/// [`MediaSink`] that stores every segment as a file.
///
/// Init segments go to `video-init.mp4` / `audio-init.mp4`; a repeated init
/// segment for the same track overwrites the previous one. Media segments
/// go to `video-00001.m4s`, `audio-00001.m4s` and so on, numbered by their
/// sequence number. The last reported media info is saved as
/// `media-info.json` at end of stream.
pub struct FileSink {
    dir: PathBuf,
    written: Vec<PathBuf>,
    write_media_info: bool,
    media_info: Option<serde_json::Value>,
}

impl FileSink {
    /// Create the output directory if needed.
    pub fn create(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            written: Vec::new(),
            write_media_info: true,
            media_info: None,
        })
    }

    pub fn with_media_info(mut self, enabled: bool) -> Self {
        self.write_media_info = enabled;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files written so far, in write order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn write(&mut self, name: String, data: &[u8]) -> io::Result<()> {
        let path = self.dir.join(name);
        fs::write(&path, data)?;
        tracing::trace!(path = %path.display(), bytes = data.len(), "Wrote segment");
        self.written.push(path);
        Ok(())
    }
}

fn track_prefix(track_type: TrackType) -> &'static str {
    match track_type {
        TrackType::Video => "video",
        TrackType::Audio => "audio",
    }
}

impl MediaSink for FileSink {
    fn append_init_segment(&mut self, segment: &InitSegment) -> io::Result<()> {
        tracing::info!(
            track = %segment.track_type,
            codec = %segment.codec,
            "Init segment"
        );
        let name = format!("{}-init.mp4", track_prefix(segment.track_type));
        self.write(name, &segment.data)
    }

    fn append_media_segment(&mut self, segment: &MediaSegment) -> io::Result<()> {
        let name = format!(
            "{}-{:05}.m4s",
            track_prefix(segment.track_type),
            segment.sequence_number
        );
        self.write(name, &segment.data)
    }

    fn end_of_stream(&mut self) -> io::Result<()> {
        if let Some(info) = self.media_info.take() {
            let json = serde_json::to_vec_pretty(&info).map_err(io::Error::other)?;
            fs::write(self.dir.join("media-info.json"), json)?;
        }
        tracing::info!(files = self.written.len(), dir = %self.dir.display(), "End of stream");
        Ok(())
    }

    fn on_event(&mut self, event: &TransmuxEvent) {
        match event {
            TransmuxEvent::MediaInfo(info) if self.write_media_info => match serde_json::to_value(info) {
                Ok(value) => self.media_info = Some(value),
                Err(e) => tracing::warn!("Cannot serialize media info: {}", e),
            },
            TransmuxEvent::Metadata(metadata) => {
                tracing::debug!(metadata = ?metadata, "Timed metadata");
            }
            TransmuxEvent::RecoveredEarlyEof => {
                tracing::warn!("Recovered from early EOF");
            }
            _ => {}
        }
    }
}
