//! Per-track history of emitted media segments.
//!
//! The remuxer consults this history after a discontinuity to place the next
//! batch relative to the segment that precedes it in the original timeline.

use tsforged_common::TrackType;

/// Timing of one remuxed sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    /// Corrected decode timestamp in milliseconds.
    pub dts: i64,
    /// Corrected presentation timestamp in milliseconds.
    pub pts: i64,
    pub duration: i64,
    /// Decode timestamp before correction.
    pub original_dts: i64,
    pub is_sync_point: bool,
    /// Byte offset of the sample in the source, for keyframes.
    pub file_position: Option<u64>,
}

impl SampleInfo {
    pub fn new(dts: i64, pts: i64, duration: i64, original_dts: i64, is_sync_point: bool) -> Self {
        Self {
            dts,
            pts,
            duration,
            original_dts,
            is_sync_point,
            file_position: None,
        }
    }
}

/// Summary of one emitted media segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSegmentInfo {
    pub begin_dts: i64,
    pub end_dts: i64,
    pub begin_pts: i64,
    pub end_pts: i64,
    pub original_begin_dts: i64,
    pub original_end_dts: i64,
    /// Keyframes of the segment; always empty for audio.
    pub sync_points: Vec<SampleInfo>,
    pub first_sample: SampleInfo,
    pub last_sample: SampleInfo,
}

impl MediaSegmentInfo {
    pub fn append_sync_point(&mut self, mut sample: SampleInfo) {
        sample.is_sync_point = true;
        self.sync_points.push(sample);
    }
}

/// Segment summaries of one track ordered by `original_begin_dts`.
#[derive(Debug, Clone)]
pub struct MediaSegmentInfoList {
    track_type: TrackType,
    list: Vec<MediaSegmentInfo>,
}

impl MediaSegmentInfoList {
    pub fn new(track_type: TrackType) -> Self {
        Self {
            track_type,
            list: Vec::new(),
        }
    }

    pub fn track_type(&self) -> TrackType {
        self.track_type
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn clear(&mut self) {
        self.list.clear();
    }

    /// Insert keeping the list ordered. Equal begin timestamps keep arrival order.
    pub fn append(&mut self, info: MediaSegmentInfo) {
        let index = self
            .list
            .partition_point(|s| s.original_begin_dts <= info.original_begin_dts);
        self.list.insert(index, info);
    }

    fn nearest_index_before(&self, original_dts: i64) -> Option<usize> {
        self.list
            .partition_point(|s| s.original_begin_dts <= original_dts)
            .checked_sub(1)
    }

    /// Last segment starting at or before `original_dts`.
    pub fn last_segment_before(&self, original_dts: i64) -> Option<&MediaSegmentInfo> {
        self.nearest_index_before(original_dts)
            .map(|index| &self.list[index])
    }

    pub fn last_sample_before(&self, original_dts: i64) -> Option<&SampleInfo> {
        self.last_segment_before(original_dts)
            .map(|segment| &segment.last_sample)
    }

    /// Last keyframe at or before the segment containing `original_dts`,
    /// walking back over segments without keyframes.
    pub fn last_sync_point_before(&self, original_dts: i64) -> Option<&SampleInfo> {
        let index = self.nearest_index_before(original_dts)?;
        self.list[..=index]
            .iter()
            .rev()
            .find_map(|segment| segment.sync_points.last())
    }

    /// Correction placing a batch starting at `first_original_dts` right
    /// after the segment preceding it. Distances up to `zero_distance_tolerance`
    /// are treated as contiguous.
    pub fn continuity_correction(&self, first_original_dts: i64, zero_distance_tolerance: i64) -> i64 {
        let Some(previous) = self.last_sample_before(first_original_dts) else {
            return 0;
        };

        let mut distance = first_original_dts - (previous.original_dts + previous.duration);
        if distance <= zero_distance_tolerance {
            distance = 0;
        }
        let expected_dts = previous.dts + previous.duration + distance;
        first_original_dts - expected_dts
    }

    pub fn iter(&self) -> impl Iterator<Item = &MediaSegmentInfo> {
        self.list.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Segment of `count` 40 ms samples starting at `original_begin`,
    /// shifted by `correction`.
    fn segment(original_begin: i64, count: i64, correction: i64, keyframe: bool) -> MediaSegmentInfo {
        let begin = original_begin - correction;
        let last_original = original_begin + (count - 1) * 40;
        let mut info = MediaSegmentInfo {
            begin_dts: begin,
            end_dts: begin + count * 40,
            begin_pts: begin,
            end_pts: begin + count * 40,
            original_begin_dts: original_begin,
            original_end_dts: original_begin + count * 40,
            sync_points: Vec::new(),
            first_sample: SampleInfo::new(begin, begin, 40, original_begin, keyframe),
            last_sample: SampleInfo::new(
                last_original - correction,
                last_original - correction,
                40,
                last_original,
                false,
            ),
        };
        if keyframe {
            info.append_sync_point(info.first_sample);
        }
        info
    }

    #[test]
    fn test_append_keeps_order() {
        let mut list = MediaSegmentInfoList::new(TrackType::Video);
        list.append(segment(2000, 5, 0, false));
        list.append(segment(0, 5, 0, false));
        list.append(segment(1000, 5, 0, false));

        let begins: Vec<i64> = list.iter().map(|s| s.original_begin_dts).collect();
        assert_eq!(begins, vec![0, 1000, 2000]);
    }

    #[test]
    fn test_lookups_before() {
        let mut list = MediaSegmentInfoList::new(TrackType::Video);
        list.append(segment(0, 5, 0, true));
        list.append(segment(200, 5, 0, false));
        list.append(segment(400, 5, 0, false));

        assert!(list.last_segment_before(-1).is_none());
        assert_eq!(list.last_segment_before(0).unwrap().original_begin_dts, 0);
        assert_eq!(list.last_segment_before(399).unwrap().original_begin_dts, 200);
        assert_eq!(list.last_sample_before(1000).unwrap().original_dts, 560);

        // Walks back to the only segment with a keyframe
        let sync = list.last_sync_point_before(450).unwrap();
        assert_eq!(sync.original_dts, 0);
        assert!(sync.is_sync_point);
    }

    #[test]
    fn test_continuity_correction() {
        let mut list = MediaSegmentInfoList::new(TrackType::Audio);
        assert_eq!(list.continuity_correction(500, 3), 0);

        // Previous segment ends at original 200, emitted 10 ms early
        list.append(segment(0, 5, 10, false));

        // Contiguous within tolerance: snapped to the emitted end
        assert_eq!(list.continuity_correction(202, 3), 12);
        // A real jump keeps the previous offset
        assert_eq!(list.continuity_correction(5000, 3), 10);
    }
}
