//! Remuxing of demuxed sample batches into fMP4 fragments.

mod remuxer;
mod segment_info;
mod silent;

pub use remuxer::{MediaSegment, Remuxer};
pub use segment_info::{MediaSegmentInfo, MediaSegmentInfoList, SampleInfo};
pub use silent::silent_frame;
