//! Aggregate stream description and keyframe index.

use serde::Serialize;

/// Keyframe positions of one segment, sorted by time.
///
/// Both arrays are non-decreasing; a keyframe whose time precedes the last
/// recorded one is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeyframeIndex {
    /// Keyframe presentation times in milliseconds.
    pub times: Vec<i64>,
    /// Byte offsets of the TS packet starting each keyframe.
    pub file_positions: Vec<u64>,
}

/// A keyframe resolved from an index lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keyframe {
    pub index: usize,
    pub milliseconds: i64,
    pub file_position: u64,
}

impl KeyframeIndex {
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Record a keyframe. Returns false if it would break ordering.
    pub fn push(&mut self, milliseconds: i64, file_position: u64) -> bool {
        if let (Some(&last_time), Some(&last_pos)) =
            (self.times.last(), self.file_positions.last())
        {
            if milliseconds < last_time || file_position < last_pos {
                return false;
            }
            if milliseconds == last_time && file_position == last_pos {
                return false;
            }
        }
        self.times.push(milliseconds);
        self.file_positions.push(file_position);
        true
    }

    /// Keyframe at or before `milliseconds`, or the first keyframe when the
    /// target precedes all of them.
    pub fn nearest_keyframe(&self, milliseconds: i64) -> Option<Keyframe> {
        if self.times.is_empty() {
            return None;
        }
        // partition_point: count of keyframes with time <= target
        let after = self.times.partition_point(|&t| t <= milliseconds);
        let index = after.saturating_sub(1);
        Some(Keyframe {
            index,
            milliseconds: self.times[index],
            file_position: self.file_positions[index],
        })
    }
}

/// Stream description for a logical source.
///
/// For a multi-segment source the top-level value aggregates the first
/// segment's codec fields; per-segment records live in `segments`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaInfo {
    pub mime_type: Option<String>,
    /// Duration in milliseconds.
    pub duration: Option<u64>,

    pub has_audio: Option<bool>,
    pub has_video: Option<bool>,
    pub audio_codec: Option<String>,
    pub video_codec: Option<String>,
    pub audio_data_rate: Option<u32>,
    pub video_data_rate: Option<u32>,

    pub audio_sample_rate: Option<u32>,
    pub audio_channel_count: Option<u8>,

    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub profile: Option<String>,
    pub level: Option<String>,
    pub ref_frames: Option<u32>,
    pub chroma_format: Option<String>,
    pub sar_num: Option<u32>,
    pub sar_den: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyframes: Option<KeyframeIndex>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<MediaInfo>,
    pub segment_count: Option<usize>,
}

impl MediaInfo {
    /// True once every field required by the present streams is known.
    pub fn is_complete(&self) -> bool {
        let audio_complete = match self.has_audio {
            Some(false) => true,
            Some(true) => {
                self.audio_codec.is_some()
                    && self.audio_sample_rate.is_some()
                    && self.audio_channel_count.is_some()
            }
            None => false,
        };

        let video_complete = match self.has_video {
            Some(false) => true,
            Some(true) => {
                self.video_codec.is_some()
                    && self.width.is_some()
                    && self.height.is_some()
                    && self.fps.is_some()
                    && self.profile.is_some()
                    && self.level.is_some()
                    && self.ref_frames.is_some()
                    && self.chroma_format.is_some()
                    && self.sar_num.is_some()
                    && self.sar_den.is_some()
            }
            None => false,
        };

        self.mime_type.is_some() && audio_complete && video_complete
    }

    pub fn has_keyframes_index(&self) -> bool {
        self.keyframes.as_ref().is_some_and(|k| !k.is_empty())
    }

    /// A source is seekable once any segment has indexed keyframes.
    pub fn is_seekable(&self) -> bool {
        self.has_keyframes_index() || self.segments.iter().any(MediaInfo::has_keyframes_index)
    }

    pub fn nearest_keyframe(&self, milliseconds: i64) -> Option<Keyframe> {
        self.keyframes
            .as_ref()
            .and_then(|k| k.nearest_keyframe(milliseconds))
    }

    /// Copy of this record without children, as reported for one segment.
    pub fn segment_view(&self, duration: Option<u64>, segment_count: Option<usize>) -> MediaInfo {
        MediaInfo {
            duration,
            segment_count,
            keyframes: None,
            segments: Vec::new(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_info() -> MediaInfo {
        MediaInfo {
            mime_type: Some("video/mp2t; codecs=\"avc1.64001f\"".into()),
            has_audio: Some(false),
            has_video: Some(true),
            video_codec: Some("avc1.64001f".into()),
            width: Some(1280),
            height: Some(720),
            fps: Some(25.0),
            profile: Some("High".into()),
            level: Some("3.1".into()),
            ref_frames: Some(4),
            chroma_format: Some("4:2:0".into()),
            sar_num: Some(1),
            sar_den: Some(1),
            ..Default::default()
        }
    }

    #[test]
    fn test_complete_video_only() {
        assert!(video_info().is_complete());
    }

    #[test]
    fn test_incomplete_when_field_missing() {
        let mut info = video_info();
        info.sar_den = None;
        assert!(!info.is_complete());

        let mut info = video_info();
        info.mime_type = None;
        assert!(!info.is_complete());
    }

    #[test]
    fn test_audio_presence_unknown_is_incomplete() {
        let mut info = video_info();
        info.has_audio = None;
        assert!(!info.is_complete());
    }

    #[test]
    fn test_nearest_keyframe_binary_search() {
        let mut index = KeyframeIndex::default();
        assert!(index.push(0, 0));
        assert!(index.push(2000, 188 * 100));
        assert!(index.push(4000, 188 * 250));

        let kf = index.nearest_keyframe(3999).unwrap();
        assert_eq!(kf.index, 1);
        assert_eq!(kf.milliseconds, 2000);
        assert_eq!(kf.file_position, 188 * 100);

        assert_eq!(index.nearest_keyframe(4000).unwrap().index, 2);
        assert_eq!(index.nearest_keyframe(99_999).unwrap().index, 2);
        assert_eq!(index.nearest_keyframe(-5).unwrap().index, 0);
    }

    #[test]
    fn test_keyframe_index_stays_monotonic() {
        let mut index = KeyframeIndex::default();
        assert!(index.push(1000, 500));
        assert!(!index.push(900, 600));
        assert!(!index.push(1100, 400));
        assert!(!index.push(1000, 500));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_seekable_through_segments() {
        let mut info = video_info();
        assert!(!info.is_seekable());
        let mut segment = video_info();
        let mut index = KeyframeIndex::default();
        index.push(0, 0);
        segment.keyframes = Some(index);
        info.segments.push(segment);
        assert!(info.is_seekable());
    }
}
