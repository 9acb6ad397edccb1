//! Tsforged-Media: fMP4 serialization and sample remuxing
//!
//! This crate turns demuxed sample batches into appendable fragmented MP4.
//!
//! # Modules
//!
//! - `fmp4` - Init segment (ftyp + moov) and fragment (moof + mdat) writers
//! - `remux` - Timestamp correction, sample stashing, silent frame gap filling
//!   and per-track segment history
//!
//! # Architecture
//!
//! The demuxer announces each track with a [`TrackMetadata`] value, which the
//! [`Remuxer`] turns into an [`InitSegment`]. Sample batches then flow through
//! [`Remuxer::remux`]:
//!
//! 1. The last sample of every batch is held back until its successor gives it
//!    a duration
//! 2. The first sample's timestamp is corrected to continue the previous
//!    segment of the same track
//! 3. AAC timestamps are requantized to exact frame durations, with silent
//!    frames synthesized over large gaps
//! 4. Each batch is written as one moof + mdat pair
//!
//! [`TrackMetadata`]: tsforged_common::TrackMetadata

pub mod error;
pub mod fmp4;
pub mod remux;

pub use error::{Error, Result};
pub use fmp4::{Fmp4Sample, InitSegment, MoofBuilder, SampleFlags};
pub use remux::{MediaSegment, MediaSegmentInfo, MediaSegmentInfoList, Remuxer, SampleInfo};
