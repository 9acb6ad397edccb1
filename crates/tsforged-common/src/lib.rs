//! Tsforged-Common: shared types, configuration, and media info.
//!
//! This crate provides the vocabulary shared by the demuxer, the remuxer and
//! the loader:
//!
//! - **Samples and tracks**: demuxed video/audio samples batched per track
//! - **Track metadata**: per-codec-family parameters that drive init segments
//! - **MediaInfo**: aggregate stream description with a keyframe index
//! - **Configuration**: the immutable per-session [`TransmuxConfig`]
//! - **Error Handling**: common error types and result aliases
//!
//! # Examples
//!
//! ```
//! use tsforged_common::{MediaInfo, TransmuxConfig};
//!
//! let config = TransmuxConfig::default();
//! assert!(config.enable_stash_buffer);
//!
//! let mut info = MediaInfo::default();
//! info.mime_type = Some("video/mp2t; codecs=\"mp4a.40.2\"".to_string());
//! info.has_audio = Some(true);
//! info.has_video = Some(false);
//! assert!(!info.is_complete());
//! ```

pub mod config;
pub mod error;
pub mod media_info;
pub mod types;

pub use config::{AacSignalling, SeekType, TransmuxConfig};
pub use error::{Error, Result};
pub use media_info::{Keyframe, KeyframeIndex, MediaInfo};
pub use types::*;
