//! Receiver of everything the demuxer produces

use tsforged_common::{AudioTrack, DecodedAudio, MediaInfo, TrackMetadata, VideoTrack};

use crate::metadata::TimedMetadata;

/// Callbacks invoked synchronously from [`TsDemuxer`](super::TsDemuxer).
///
/// `on_data_available` hands out the pending sample batches. The receiver is
/// expected to drain them; samples left in a track are offered again on the
/// next call.
pub trait DemuxSink {
    /// A video or audio init segment is due. Always precedes the first
    /// batch of samples that depends on it.
    fn on_track_metadata(&mut self, metadata: TrackMetadata);

    /// Stream description became complete, or changed after completion.
    fn on_media_info(&mut self, info: &MediaInfo);

    fn on_data_available(
        &mut self,
        audio: Option<&mut AudioTrack>,
        video: Option<&mut VideoTrack>,
    );

    fn on_timed_metadata(&mut self, metadata: TimedMetadata) {
        let _ = metadata;
    }

    /// PCM from the software decoder for streams that cannot be packaged.
    fn on_decoded_audio(&mut self, audio: DecodedAudio) {
        let _ = audio;
    }
}
